//! Core domain types (spec.md §3: Data Model).
//!
//! Grounded in the teacher's preference for small `#[derive(Serialize,
//! Deserialize, JsonSchema)]` product/sum types (see `queues/ocr/mod.rs`'s
//! `OcrAnalysis`/`ImageSource`) but built fresh: the teacher has no notion of
//! a submission record, review codes, or an audit trail. Closed vocabularies
//! (review reason codes, event types, error kinds) are modeled as enums per
//! spec.md §9's "from loosely-typed value dicts to sum types" redesign flag.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;

use crate::{
    ids::{JobId, OwnerId, SubmissionId, UploadBatchId},
    prelude::*,
};

/// Document format, determined by the Document Analyzer (spec.md §4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocFormat {
    NativeText,
    ImageOnly,
    Hybrid,
}

/// The code-verified final document category (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocClass {
    SingleTyped,
    SingleScanned,
    MultiPageSingle,
    BulkScannedBatch,
    EssayWithHeaderMetadata,
}

/// Structural shape of a document, as detected before `doc_class` is decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Structure {
    Single,
    Multi,
    Template,
    BulkScannedBatch,
}

/// Whether the document matched the official bilingual typed-form layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormLayout {
    TypedForm,
    Freeform,
}

/// A student's grade. Modeled as a sum type rather than a free-form string so
/// that `1..=12`, `"K"`, and `"Pre-K"` are the only representable values
/// (spec.md §4.5: grades accepted only if `1..12` or `K`/`Kindergarten`/`Pre-K`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Numeric(u8),
    Kindergarten,
    PreK,
}

impl Grade {
    /// Parse ordinal ("3rd"), spelled-out ("third"), and word forms, plus the
    /// closed K/Pre-K aliases (spec.md §4.5 grade fallback / verification).
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        let lower = trimmed.to_lowercase();
        match lower.as_str() {
            "k" | "kindergarten" | "kinder" => return Some(Grade::Kindergarten),
            "pre-k" | "prek" | "pre k" => return Some(Grade::PreK),
            _ => {}
        }
        if let Ok(n) = lower.parse::<u8>() {
            return (1..=12).contains(&n).then_some(Grade::Numeric(n));
        }
        // Strip a trailing ordinal suffix: "3rd", "8th", "1st", "2nd".
        let digits: String = lower.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty()
            && let Ok(n) = digits.parse::<u8>()
            && (1..=12).contains(&n)
        {
            return Some(Grade::Numeric(n));
        }
        spelled_out_grade(&lower)
    }
}

fn spelled_out_grade(word: &str) -> Option<Grade> {
    let n = match word {
        "first" => 1,
        "second" => 2,
        "third" => 3,
        "fourth" => 4,
        "fifth" => 5,
        "sixth" => 6,
        "seventh" => 7,
        "eighth" => 8,
        "ninth" => 9,
        "tenth" => 10,
        "eleventh" => 11,
        "twelfth" => 12,
        _ => return None,
    };
    Some(Grade::Numeric(n))
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grade::Numeric(n) => write!(f, "{n}"),
            Grade::Kindergarten => write!(f, "K"),
            Grade::PreK => write!(f, "Pre-K"),
        }
    }
}

/// Fields extracted from a submission (spec.md §3 `extracted_fields`).
#[derive(Clone, Debug, Default, JsonSchema, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub student_name: Option<String>,
    pub school_name: Option<String>,
    pub grade: Option<Grade>,
    pub teacher_name: Option<String>,
    pub father_figure_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub city_or_location: Option<String>,
    pub essay_text: Option<String>,
}

/// The closed vocabulary of review reason codes (spec.md §3).
///
/// Rendered as a semicolon-joined string for persistence, but modeled here as
/// a proper enum so only this set can ever be produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewReasonCode {
    MissingStudentName,
    MissingSchoolName,
    MissingGrade,
    EmptyEssay,
    ShortEssay,
    LowConfidence,
    OcrFailed,
    Escalated,
    TemplateOnly,
    OffPrompt,
    DuplicateSkipped,
}

impl fmt::Display for ReviewReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReviewReasonCode::MissingStudentName => "MISSING_STUDENT_NAME",
            ReviewReasonCode::MissingSchoolName => "MISSING_SCHOOL_NAME",
            ReviewReasonCode::MissingGrade => "MISSING_GRADE",
            ReviewReasonCode::EmptyEssay => "EMPTY_ESSAY",
            ReviewReasonCode::ShortEssay => "SHORT_ESSAY",
            ReviewReasonCode::LowConfidence => "LOW_CONFIDENCE",
            ReviewReasonCode::OcrFailed => "OCR_FAILED",
            ReviewReasonCode::Escalated => "ESCALATED",
            ReviewReasonCode::TemplateOnly => "TEMPLATE_ONLY",
            ReviewReasonCode::OffPrompt => "OFF_PROMPT",
            ReviewReasonCode::DuplicateSkipped => "DUPLICATE_SKIPPED",
        };
        f.write_str(s)
    }
}

/// An ordered set of review reason codes, rendered as a semicolon-joined
/// string (spec.md §3). Insertion order is preserved; duplicates are
/// silently dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReasonCodeSet(Vec<ReviewReasonCode>);

impl ReasonCodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, code: ReviewReasonCode) {
        if !self.0.contains(&code) {
            self.0.push(code);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, code: ReviewReasonCode) -> bool {
        self.0.contains(&code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReviewReasonCode> {
        self.0.iter()
    }
}

impl fmt::Display for ReasonCodeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(";");
        f.write_str(&joined)
    }
}

/// The status of a [`SubmissionRecord`] (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    PendingReview,
    Processed,
    Approved,
    Failed,
}

/// The authoritative per-submission row (spec.md §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub submission_id: SubmissionId,
    pub owner_id: OwnerId,
    pub upload_batch_id: Option<UploadBatchId>,
    pub parent_submission_id: Option<SubmissionId>,
    pub child_index: Option<u32>,
    pub multi_entry_source: Option<bool>,
    pub filename: String,
    pub doc_class: DocClass,
    pub doc_format: DocFormat,
    pub extracted_fields: ExtractedFields,
    pub word_count: u32,
    pub ocr_confidence_avg: f64,
    pub ocr_failed: bool,
    pub needs_review: bool,
    pub status: Status,
    pub review_reason_codes: ReasonCodeSet,
    pub storage_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single OCR-recognized line of text, with its per-line confidence.
#[derive(Clone, Debug, JsonSchema, Serialize, Deserialize)]
pub struct OcrLine {
    pub text: String,
    pub confidence: f64,
}

/// The result of OCRing one chunk (spec.md §3).
#[derive(Clone, Debug, Default, JsonSchema, Serialize, Deserialize)]
pub struct OcrResult {
    pub full_text: String,
    pub lines: Vec<OcrLine>,
    pub confidence_avg: f64,
    pub ocr_failed: bool,
    pub per_page_confidence: Vec<f64>,
}

impl OcrResult {
    /// The degraded result returned whenever a vendor call fails
    /// (spec.md §4.2: "the capability never raises across the pipeline
    /// boundary").
    pub fn failed() -> Self {
        Self {
            full_text: String::new(),
            lines: Vec::new(),
            confidence_avg: 0.0,
            ocr_failed: true,
            per_page_confidence: Vec::new(),
        }
    }
}

/// An inclusive-exclusive page range, `(start, end)`.
pub type ChunkRange = (usize, usize);

/// The output of the Document Analyzer (spec.md §3 / §4.1).
#[derive(Clone, Debug, JsonSchema, Serialize, Deserialize)]
pub struct DocumentAnalysis {
    pub format: DocFormat,
    pub structure: Structure,
    pub form_layout: FormLayout,
    pub page_count: usize,
    pub chunk_ranges: Vec<ChunkRange>,
    pub doc_class: DocClass,
    pub is_scanned_multi_submission: bool,
}

/// A signal recorded into the audit trace: a short, structured note about a
/// decision the pipeline made (e.g. which fallback fired, a verification
/// miss, a classifier divergence).
#[derive(Clone, Debug, JsonSchema, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    pub detail: String,
}

impl Signal {
    pub fn new(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            detail: detail.into(),
        }
    }
}

/// One run of the pipeline over one submission (spec.md §3). Append-only;
/// never updated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditTrace {
    pub submission_id: SubmissionId,
    pub owner_id: OwnerId,
    pub input_fingerprint: String,
    pub signals: Vec<Signal>,
    pub rules_applied: Vec<String>,
    pub outcome: TraceOutcome,
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// The terminal outcome recorded on an [`AuditTrace`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOutcome {
    Saved,
    DuplicateSkipped,
    Failed,
}

/// The closed vocabulary for [`AuditEvent::event_type`] (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Ingested,
    OcrComplete,
    ExtractionComplete,
    ValidationComplete,
    Saved,
    Approved,
    Rejected,
    DuplicateSkipped,
    Escalated,
    Error,
    CachedLlmResult,
}

/// Who (or what) caused an [`AuditEvent`] to be emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Worker,
    ReviewerApproval,
    System,
}

/// One audit event (spec.md §3). Many per run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub submission_id: SubmissionId,
    pub actor_role: ActorRole,
    pub event_type: EventType,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// The state of a queued [`Job`] (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
}

/// A queue element (spec.md §3). Jobs are ephemeral; the record and audit
/// stores are the durable truths.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub payload: Vec<u8>,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub status: JobStatus,
}

/// The upload request enqueued by the (out-of-scope) HTTP layer (spec.md
/// §6). This is the only input the core accepts; no other fields are
/// consumed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadRequest {
    pub file_bytes: Vec<u8>,
    pub filename: String,
    pub owner_id: OwnerId,
    pub access_token: String,
    #[serde(default)]
    pub upload_batch_id: Option<UploadBatchId>,
    #[serde(default)]
    pub ocr_provider_hint: Option<OcrProviderHint>,
}

/// `ocr_provider_hint` (spec.md §6): a caller-supplied hint for which OCR
/// backend to prefer. Advisory only; the worker may ignore it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrProviderHint {
    Google,
    Stub,
    Easyocr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_parses_digits_ordinals_words_and_aliases() {
        assert_eq!(Grade::parse("8"), Some(Grade::Numeric(8)));
        assert_eq!(Grade::parse("3rd"), Some(Grade::Numeric(3)));
        assert_eq!(Grade::parse("eighth"), Some(Grade::Numeric(8)));
        assert_eq!(Grade::parse("K"), Some(Grade::Kindergarten));
        assert_eq!(Grade::parse("Pre-K"), Some(Grade::PreK));
        assert_eq!(Grade::parse("kindergarten"), Some(Grade::Kindergarten));
        assert_eq!(Grade::parse("13"), None);
        assert_eq!(Grade::parse("0"), None);
        assert_eq!(Grade::parse("banana"), None);
    }

    #[test]
    fn reason_code_set_preserves_order_and_dedupes() {
        let mut set = ReasonCodeSet::new();
        set.push(ReviewReasonCode::MissingGrade);
        set.push(ReviewReasonCode::MissingSchoolName);
        set.push(ReviewReasonCode::MissingGrade);
        assert_eq!(set.to_string(), "MISSING_GRADE;MISSING_SCHOOL_NAME");
    }

    #[test]
    fn ocr_failed_result_has_zero_confidence() {
        let result = OcrResult::failed();
        assert!(result.ocr_failed);
        assert_eq!(result.confidence_avg, 0.0);
        assert_eq!(result.full_text, "");
    }
}
