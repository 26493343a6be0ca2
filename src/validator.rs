//! Validator (spec.md §4.7).
//!
//! Applies the config-driven required-field matrix per `doc_class`, appends
//! review-reason codes, and decides `needs_review`. Also implements the
//! "best essay text" word-count selection rule and the approval gate
//! (spec.md §4.7's re-validation contract).

use crate::{
    config::{RequiredField, ValidationConfig},
    model::{DocClass, ExtractedFields, ReasonCodeSet, ReviewReasonCode},
};

/// Words below this count make an essay `SHORT_ESSAY` rather than clean.
const SHORT_ESSAY_WORD_COUNT: u32 = 50;

/// The default required-field set for every `doc_class` (spec.md §6:
/// "default: all four of essay / grade / school / student for every doc
/// class").
const DEFAULT_REQUIRED_FIELDS: &[RequiredField] = &[
    RequiredField::Essay,
    RequiredField::Grade,
    RequiredField::School,
    RequiredField::Student,
];

/// The three reason codes that block approval (spec.md §4.7's "Approval
/// gate").
const BLOCKING_CODES: &[ReviewReasonCode] = &[
    ReviewReasonCode::MissingStudentName,
    ReviewReasonCode::MissingSchoolName,
    ReviewReasonCode::MissingGrade,
];

/// The source an essay's word count was derived from (spec.md §4.7's
/// "best essay text" selection), recorded into the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EssaySource {
    Llm,
    SegmentedBlock,
    RawTextFallback,
    /// No candidate had any words.
    None,
}

impl std::fmt::Display for EssaySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EssaySource::Llm => "llm",
            EssaySource::SegmentedBlock => "segmented_block",
            EssaySource::RawTextFallback => "raw_text_fallback",
            EssaySource::None => "none",
        };
        f.write_str(s)
    }
}

/// The result of selecting the "best" essay text among several candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct BestEssayText {
    pub text: Option<String>,
    pub word_count: u32,
    pub source: EssaySource,
}

/// Choose the candidate with the highest non-zero word count among the
/// LLM-returned essay text, the segmented essay block, and a raw-text
/// fallback with known labels stripped (spec.md §4.7).
pub fn select_best_essay_text(
    llm_essay_text: Option<&str>,
    segmented_essay_block: Option<&str>,
    raw_text_fallback: Option<&str>,
) -> BestEssayText {
    let candidates = [
        (EssaySource::Llm, llm_essay_text),
        (EssaySource::SegmentedBlock, segmented_essay_block),
        (EssaySource::RawTextFallback, raw_text_fallback),
    ];

    let mut best: Option<(EssaySource, &str, u32)> = None;
    for (source, text) in candidates {
        let Some(text) = text else { continue };
        let count = word_count(text);
        if count == 0 {
            continue;
        }
        if best.is_none_or(|(_, _, best_count)| count > best_count) {
            best = Some((source, text, count));
        }
    }

    match best {
        Some((source, text, count)) => BestEssayText {
            text: Some(text.to_string()),
            word_count: count,
            source,
        },
        None => BestEssayText {
            text: None,
            word_count: 0,
            source: EssaySource::None,
        },
    }
}

/// Whitespace-token word count (spec.md §8 property 8's round-trip check).
pub fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

/// The required fields for a `doc_class`, from config if present, else the
/// spec.md §6 default.
pub fn required_fields<'a>(doc_class: DocClass, config: &'a ValidationConfig) -> &'a [RequiredField] {
    config
        .required_fields
        .get(&doc_class)
        .map(Vec::as_slice)
        .unwrap_or(DEFAULT_REQUIRED_FIELDS)
}

/// Inputs the validator needs beyond `ExtractedFields` itself: the OCR
/// quality signals and whether the document was a template with no form
/// fields filled in at all.
#[derive(Debug, Clone, Copy)]
pub struct ValidationInputs<'a> {
    pub fields: &'a ExtractedFields,
    pub word_count: u32,
    pub ocr_failed: bool,
    pub ocr_confidence_avg: f64,
    pub is_template_only: bool,
}

/// Config knobs the validator consults (spec.md §6).
#[derive(Debug, Clone, Copy)]
pub struct ValidationThresholds {
    pub low_confidence_threshold: f64,
    pub escalation_threshold: f64,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            low_confidence_threshold: 0.5,
            escalation_threshold: 0.3,
        }
    }
}

/// The validator's output: the ordered reason-code set and `needs_review`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub reason_codes: ReasonCodeSet,
    pub needs_review: bool,
}

/// Validate extracted fields against the required-field matrix for
/// `doc_class`, plus the essay-length, OCR-quality, and template-only
/// rules (spec.md §4.7).
pub fn validate(
    doc_class: DocClass,
    inputs: ValidationInputs<'_>,
    required: &[RequiredField],
    thresholds: ValidationThresholds,
) -> ValidationOutcome {
    let mut codes = ReasonCodeSet::new();

    if inputs.is_template_only {
        // spec.md §4.7: "Template-only ... no MISSING_* codes are added in
        // that case." Other (non-missing-field) rules still apply.
        codes.push(ReviewReasonCode::TemplateOnly);
    } else {
        for field in required {
            if is_missing(field, inputs.fields) {
                codes.push(missing_code(*field));
            }
        }
    }

    if inputs.word_count < 1 {
        codes.push(ReviewReasonCode::EmptyEssay);
    } else if inputs.word_count < SHORT_ESSAY_WORD_COUNT {
        codes.push(ReviewReasonCode::ShortEssay);
    }

    if inputs.ocr_failed {
        codes.push(ReviewReasonCode::OcrFailed);
    } else if inputs.ocr_confidence_avg < thresholds.low_confidence_threshold {
        codes.push(ReviewReasonCode::LowConfidence);
    }

    if inputs.ocr_confidence_avg < thresholds.escalation_threshold {
        codes.push(ReviewReasonCode::Escalated);
    }

    let needs_review = !codes.is_empty();
    let _ = doc_class; // kept in the signature: callers select `required` per doc_class.
    ValidationOutcome {
        reason_codes: codes,
        needs_review,
    }
}

fn is_missing(field: &RequiredField, fields: &ExtractedFields) -> bool {
    match field {
        RequiredField::Essay => is_blank(fields.essay_text.as_deref()),
        RequiredField::Grade => fields.grade.is_none(),
        RequiredField::School => is_blank(fields.school_name.as_deref()),
        RequiredField::Student => is_blank(fields.student_name.as_deref()),
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

fn missing_code(field: RequiredField) -> ReviewReasonCode {
    match field {
        RequiredField::Essay => ReviewReasonCode::EmptyEssay,
        RequiredField::Grade => ReviewReasonCode::MissingGrade,
        RequiredField::School => ReviewReasonCode::MissingSchoolName,
        RequiredField::Student => ReviewReasonCode::MissingStudentName,
    }
}

/// The approval gate (spec.md §4.7): an approval request is accepted only
/// if re-running the validator yields zero blocking codes.
pub fn passes_approval_gate(outcome: &ValidationOutcome) -> bool {
    !BLOCKING_CODES.iter().any(|code| outcome.reason_codes.contains(*code))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields_with(student: Option<&str>, school: Option<&str>) -> ExtractedFields {
        ExtractedFields {
            student_name: student.map(str::to_string),
            school_name: school.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn missing_required_fields_produce_missing_codes() {
        let fields = fields_with(None, Some("Lincoln Middle"));
        let inputs = ValidationInputs {
            fields: &fields,
            word_count: 200,
            ocr_failed: false,
            ocr_confidence_avg: 0.9,
            is_template_only: false,
        };
        let outcome = validate(
            DocClass::SingleScanned,
            inputs,
            &[RequiredField::Student, RequiredField::School, RequiredField::Grade],
            ValidationThresholds::default(),
        );
        assert!(outcome.reason_codes.contains(ReviewReasonCode::MissingStudentName));
        assert!(outcome.reason_codes.contains(ReviewReasonCode::MissingGrade));
        assert!(!outcome.reason_codes.contains(ReviewReasonCode::MissingSchoolName));
        assert!(outcome.needs_review);
    }

    #[test]
    fn ocr_failed_excludes_low_confidence() {
        let fields = ExtractedFields::default();
        let inputs = ValidationInputs {
            fields: &fields,
            word_count: 100,
            ocr_failed: true,
            ocr_confidence_avg: 0.0,
            is_template_only: false,
        };
        let outcome = validate(DocClass::SingleScanned, inputs, &[], ValidationThresholds::default());
        assert!(outcome.reason_codes.contains(ReviewReasonCode::OcrFailed));
        assert!(!outcome.reason_codes.contains(ReviewReasonCode::LowConfidence));
    }

    #[test]
    fn very_low_confidence_adds_escalated_alongside_low_confidence() {
        let fields = ExtractedFields::default();
        let inputs = ValidationInputs {
            fields: &fields,
            word_count: 100,
            ocr_failed: false,
            ocr_confidence_avg: 0.22,
            is_template_only: false,
        };
        let outcome = validate(DocClass::SingleScanned, inputs, &[], ValidationThresholds::default());
        assert!(outcome.reason_codes.contains(ReviewReasonCode::LowConfidence));
        assert!(outcome.reason_codes.contains(ReviewReasonCode::Escalated));
        assert!(!outcome.reason_codes.contains(ReviewReasonCode::OcrFailed));
    }

    #[test]
    fn template_only_suppresses_missing_codes() {
        let fields = ExtractedFields::default();
        let inputs = ValidationInputs {
            fields: &fields,
            word_count: 0,
            ocr_failed: false,
            ocr_confidence_avg: 1.0,
            is_template_only: true,
        };
        let outcome = validate(
            DocClass::SingleTyped,
            inputs,
            &[RequiredField::Student, RequiredField::School],
            ValidationThresholds::default(),
        );
        assert!(outcome.reason_codes.contains(ReviewReasonCode::TemplateOnly));
        assert!(!outcome.reason_codes.contains(ReviewReasonCode::MissingStudentName));
        // Empty essay is not a "missing field" code and still fires.
        assert!(outcome.reason_codes.contains(ReviewReasonCode::EmptyEssay));
    }

    #[test]
    fn approval_gate_rejects_blocking_codes() {
        let mut codes = ReasonCodeSet::new();
        codes.push(ReviewReasonCode::MissingGrade);
        let outcome = ValidationOutcome {
            reason_codes: codes,
            needs_review: true,
        };
        assert!(!passes_approval_gate(&outcome));
    }

    #[test]
    fn approval_gate_accepts_non_blocking_codes() {
        let mut codes = ReasonCodeSet::new();
        codes.push(ReviewReasonCode::LowConfidence);
        let outcome = ValidationOutcome {
            reason_codes: codes,
            needs_review: true,
        };
        assert!(passes_approval_gate(&outcome));
    }

    #[test]
    fn best_essay_text_picks_highest_word_count_candidate() {
        let result = select_best_essay_text(
            Some("short llm text"),
            Some("a much longer segmented essay block with many more words in it"),
            None,
        );
        assert_eq!(result.source, EssaySource::SegmentedBlock);
        assert_eq!(result.word_count, 12);
    }

    #[test]
    fn best_essay_text_falls_back_through_all_candidates() {
        let result = select_best_essay_text(None, Some(""), Some("raw fallback text here"));
        assert_eq!(result.source, EssaySource::RawTextFallback);
    }

    #[test]
    fn best_essay_text_is_none_when_all_candidates_empty() {
        let result = select_best_essay_text(None, Some(""), None);
        assert_eq!(result.source, EssaySource::None);
        assert_eq!(result.word_count, 0);
    }
}
