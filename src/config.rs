//! Worker configuration: the recognized options from spec.md §6, loaded from
//! an optional TOML file and overridable by CLI flags / environment.
//!
//! The teacher crate has no persistent config file — every knob is a
//! `#[derive(Args)]` struct parsed once per CLI invocation (see
//! `page_iter::PageIterOptions`, the old `drivers::LlmOpts`). This worker is a
//! long-running daemon, not a one-shot CLI, so configuration is generalized
//! into a `Config` struct deserialized from TOML (`toml`, already a teacher
//! dependency via `async_utils::io::read_json_or_toml`), with `clap::Parser`
//! flags on the binary for operational overrides (poll interval, job
//! concurrency, database path) — same `clap::Args`-per-concern style the
//! teacher uses, just layered over a file instead of being the only source.

use std::collections::HashMap;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::{async_utils::io::read_json_or_toml, model::DocClass, prelude::*};

/// Command-line flags for the `essay-worker` binary.
#[derive(Debug, Parser)]
#[clap(version, author, about = "Process queued essay-contest submissions.")]
pub struct Opts {
    /// Path to a TOML configuration file. If omitted, built-in defaults are
    /// used for everything not set via environment variables.
    #[clap(long, env = "ESSAY_WORKER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database backing the job queue, record store, and
    /// audit store.
    #[clap(long, env = "ESSAY_WORKER_DB_PATH", default_value = "essay-pipeline.db")]
    pub db_path: PathBuf,

    /// Root directory used by the filesystem-backed object store.
    #[clap(long, env = "ESSAY_WORKER_STORAGE_ROOT", default_value = "storage")]
    pub storage_root: PathBuf,

    /// How many jobs this worker process may run concurrently.
    ///
    /// Spec.md §5 forbids intra-job parallelism across *stages*, but permits
    /// concurrent processing of independent jobs (and of independent pages
    /// within one OCR call), so this caps the work queue's fan-out.
    #[clap(long, default_value = "4")]
    pub concurrency: usize,

    /// Print the effective configuration (after merging file, environment,
    /// and built-in defaults) and exit without processing any jobs.
    #[clap(long)]
    pub config_check: bool,

    /// Which OCR vendor backend to run pages through.
    #[clap(long, value_enum, default_value = "stub")]
    pub ocr_engine: OcrEngineKind,

    /// Model name passed to the LLM capability (field extraction, and OCR
    /// when `--ocr-engine llm-vision` is selected).
    #[clap(long, default_value = "gpt-4o-mini")]
    pub llm_model: String,
}

/// The OCR vendor backend a worker process runs pages through (spec.md
/// §4.2 allows any backend behind the same two-operation contract).
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OcrEngineKind {
    /// No vendor call; returns deterministic fixture text. Used for local
    /// runs and `--config-check` without cloud credentials.
    Stub,
    /// AWS Textract's `DetectDocumentText` API.
    Textract,
    /// A vision-capable chat model asked to transcribe the page verbatim.
    LlmVision,
}

/// The recognized configuration options from spec.md §6.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub worker: WorkerConfig,
    pub validation: ValidationConfig,
    pub extractor: ExtractorConfig,
    pub analyzer: AnalyzerConfig,
    pub ocr: OcrConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            validation: ValidationConfig::default(),
            extractor: ExtractorConfig::default(),
            analyzer: AnalyzerConfig::default(),
            ocr: OcrConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, falling back to
    /// built-in defaults for anything the file doesn't set.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => read_json_or_toml(path)
                .await
                .with_context(|| format!("failed to load config from {path:?}")),
            None => Ok(Self::default()),
        }
    }

    /// Validate cross-field invariants that `serde` defaults can't enforce.
    ///
    /// spec.md §6: "`extractor.llm_temperature` (MUST be 0; configuration
    /// rejects any other value)."
    pub fn validate(&self) -> Result<()> {
        if self.extractor.llm_temperature != 0.0 {
            return Err(anyhow!(
                "extractor.llm_temperature must be 0 (got {}); this is a determinism \
                 contract, not a tunable parameter",
                self.extractor.llm_temperature
            ));
        }
        Ok(())
    }
}

/// `worker.*` options (spec.md §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub job_timeout_s: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_attempts: 2,
            job_timeout_s: 3600,
        }
    }
}

/// `validation.*` options (spec.md §6).
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationConfig {
    /// Required fields per `doc_class`. Defaults to all four of
    /// essay/grade/school/student for every doc class.
    pub required_fields: HashMap<DocClass, Vec<RequiredField>>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            required_fields: HashMap::new(),
        }
    }
}

/// The fields the validator can require, keyed by `doc_class`
/// (spec.md §4.7 / §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredField {
    Essay,
    Grade,
    School,
    Student,
}

/// `extractor.*` options (spec.md §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractorConfig {
    pub llm_temperature: f32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self { llm_temperature: 0.0 }
    }
}

/// `analyzer.*` options (spec.md §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerConfig {
    pub header_score_threshold_native_text: f64,
    pub header_score_threshold_image: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            header_score_threshold_native_text: 0.20,
            header_score_threshold_image: 0.15,
        }
    }
}

/// `ocr.*` options (spec.md §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OcrConfig {
    pub low_confidence_threshold: f64,
    pub escalation_threshold: f64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            low_confidence_threshold: 0.5,
            escalation_threshold: 0.3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes_validation() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn nonzero_temperature_is_rejected() {
        let mut config = Config::default();
        config.extractor.llm_temperature = 0.7;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("llm_temperature"));
    }

    #[test]
    fn defaults_match_spec_thresholds() {
        let config = Config::default();
        assert_eq!(config.worker.poll_interval_ms, 1000);
        assert_eq!(config.worker.max_attempts, 2);
        assert_eq!(config.worker.job_timeout_s, 3600);
        assert_eq!(config.analyzer.header_score_threshold_native_text, 0.20);
        assert_eq!(config.analyzer.header_score_threshold_image, 0.15);
        assert_eq!(config.ocr.low_confidence_threshold, 0.5);
        assert_eq!(config.ocr.escalation_threshold, 0.3);
    }
}
