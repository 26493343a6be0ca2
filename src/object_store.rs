//! Object storage wrapper (spec.md §4.ident "Persistence Repositories", §6
//! "Object storage key scheme").
//!
//! The source treats object storage as an abstract repository; only the key
//! scheme (`{owner_id}/{submission_id}/...`) is part of the core's
//! contract (spec.md §6). Grounded in the teacher's `aws.rs` client-
//! construction pattern for the production backend, and in `drivers/echo.rs`
//! for the deterministic in-memory stand-in used by tests — the teacher has
//! no object-store precedent of its own (it reads/writes local files
//! directly), so this module is new.

use std::{collections::HashMap, sync::Mutex};

use crate::prelude::*;

/// Abstract object storage: keyed blob put/get, addressed by
/// `{owner_id}/{submission_id}/...` (spec.md §6).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` to `key`, overwriting any existing value.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Read the bytes stored at `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Build the key for an original uploaded artifact (spec.md §6).
pub fn original_key(owner_id: &str, submission_id: &str, ext: &str) -> String {
    format!("{owner_id}/{submission_id}/original.{ext}")
}

/// Build the key for a named per-stage artifact (spec.md §6: `ocr.json`,
/// `raw_text.txt`, `structured.json`, `validation.json`, `audit_trace.json`).
/// Artifacts are optional for the core's correctness; the audit store is
/// authoritative.
pub fn artifact_key(owner_id: &str, submission_id: &str, artifact: &str) -> String {
    format!("{owner_id}/{submission_id}/{artifact}")
}

/// A filesystem-backed [`ObjectStore`], rooted at a configured directory.
/// The production backend for a single-machine or NFS-backed deployment;
/// a real object-store adapter (S3, GCS) is an external collaborator per
/// spec.md §1.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.contains("..") {
            return Err(anyhow!("object store key must not contain '..': {key:?}"));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    #[instrument(level = "debug", skip(self, bytes))]
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory for {path:?}"))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write object at {path:?}"))
    }

    #[instrument(level = "debug", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read object at {path:?}")),
        }
    }
}

/// An in-memory [`ObjectStore`], used by tests (mirrors the teacher's
/// `drivers::echo::EchoDriver` pattern of a deterministic, no-I/O stand-in).
#[derive(Default)]
pub struct InMemoryObjectStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs
            .lock()
            .expect("object store mutex poisoned")
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().expect("object store mutex poisoned").get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_scheme_matches_spec() {
        assert_eq!(original_key("owner-1", "abc123def456", "pdf"), "owner-1/abc123def456/original.pdf");
        assert_eq!(
            artifact_key("owner-1", "abc123def456", "audit_trace.json"),
            "owner-1/abc123def456/audit_trace.json"
        );
    }

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryObjectStore::default();
        store.put("owner/sub/original.pdf", b"hello").await.unwrap();
        let read = store.get("owner/sub/original.pdf").await.unwrap();
        assert_eq!(read, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn in_memory_store_returns_none_for_missing_key() {
        let store = InMemoryObjectStore::default();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn fs_store_rejects_path_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path());
        let err = store.put("../escape", b"x").await.unwrap_err();
        assert!(err.to_string().contains(".."));
    }

    #[tokio::test]
    async fn fs_store_round_trips_and_creates_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path());
        store.put("owner/sub/original.pdf", b"bytes").await.unwrap();
        let read = store.get("owner/sub/original.pdf").await.unwrap();
        assert_eq!(read, Some(b"bytes".to_vec()));
    }
}
