//! I/O utilities shared by configuration, prompt, and schema loading.
//!
//! The teacher crate this is descended from reads arbitrarily large streams
//! of CSV/JSONL records; this crate only ever reads small, single-document
//! TOML or JSON files (config, prompts, schemas), so we keep only that slice
//! of the original I/O machinery.

use serde_json::Map;
use tokio::{fs::File, io::AsyncReadExt as _};

use crate::prelude::*;

/// A JSON Object value, without the surrounding [`Value::Object`] wrapper.
pub type JsonObject = Map<String, Value>;

/// Read TOML or JSON from a file, dispatching on the file extension.
pub async fn read_json_or_toml<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let is_json = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("json") | Some("jsonl")
    );
    let mut file = File::open(path)
        .await
        .with_context(|| format!("failed to open file at path: {path:?}"))?;
    let mut data = String::new();
    file.read_to_string(&mut data)
        .await
        .with_context(|| format!("failed to read file at path: {path:?}"))?;
    if is_json {
        serde_json::from_str(&data)
            .with_context(|| format!("failed to parse JSON from file at path: {path:?}"))
    } else {
        toml::from_str(&data)
            .with_context(|| format!("failed to parse TOML from file at path: {path:?}"))
    }
}
