//! The closed error-kind vocabulary used across the pipeline.
//!
//! The teacher crate lets `anyhow::Error` carry whatever context a `?`
//! happened to attach. That is fine for a CLI that prints an error and exits,
//! but the worker here has to *decide* things based on what failed: degrade
//! locally, retry once, or mark a job failed outright. [`ErrorKind`] is the
//! small closed set the runner pattern-matches on; everything else still
//! flows through `anyhow::Error` for context and source chains.

use thiserror::Error;

/// A stage failure, tagged with the closed error-kind vocabulary.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<anyhow::Error>,
}

impl StageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source),
        }
    }
}

/// The closed set of error kinds a stage may fail with.
///
/// Deliberately exhaustive: adding a new failure mode to the pipeline means
/// adding a variant here, not inventing a new string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// Malformed input file (unreadable, unknown format).
    #[error("input_error")]
    InputError,
    /// Rasterization or page-count failure.
    #[error("analysis_error")]
    AnalysisError,
    /// OCR vendor failure.
    #[error("ocr_error")]
    OcrError,
    /// LLM unavailable, or returned invalid JSON.
    #[error("extraction_error")]
    ExtractionError,
    /// Should never occur; the classifier is deterministic.
    #[error("classification_error")]
    ClassificationError,
    /// Internal validator failure.
    #[error("validation_error")]
    ValidationError,
    /// Object store failure.
    #[error("storage_error")]
    StorageError,
    /// Record store failure.
    #[error("record_error")]
    RecordError,
    /// Audit store failure.
    #[error("audit_error")]
    AuditError,
    /// A suspension point exceeded its deadline (after one retry).
    #[error("timeout")]
    Timeout,
    /// The job was cooperatively cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Is this error kind one the pipeline degrades locally, rather than
    /// aborting the whole run (spec.md §7's propagation policy)?
    pub fn is_degraded_locally(self) -> bool {
        matches!(self, ErrorKind::OcrError | ErrorKind::ExtractionError)
    }

    /// Is this error kind terminal for the whole submission (sets
    /// `status=FAILED`)?
    pub fn is_terminal_for_submission(self) -> bool {
        matches!(
            self,
            ErrorKind::StorageError
                | ErrorKind::RecordError
                | ErrorKind::Timeout
                | ErrorKind::Cancelled
                | ErrorKind::InputError
                | ErrorKind::AnalysisError
                | ErrorKind::ValidationError
                | ErrorKind::ClassificationError
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_kinds_are_not_terminal() {
        assert!(ErrorKind::OcrError.is_degraded_locally());
        assert!(!ErrorKind::OcrError.is_terminal_for_submission());
        assert!(ErrorKind::ExtractionError.is_degraded_locally());
        assert!(!ErrorKind::ExtractionError.is_terminal_for_submission());
    }

    #[test]
    fn storage_and_record_errors_are_terminal() {
        assert!(ErrorKind::StorageError.is_terminal_for_submission());
        assert!(ErrorKind::RecordError.is_terminal_for_submission());
    }
}
