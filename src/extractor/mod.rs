//! Extractor (spec.md §4.5): two paths chosen by `form_layout` — rule-based
//! positional extraction for typed forms, LLM-assisted extraction (with
//! mandatory deterministic verification) for scanned/freeform documents.
//! Orchestrates `typed.rs`, `llm.rs`, `verify.rs`, and `llm_cache.rs`.

pub mod llm;
pub mod llm_cache;
pub mod typed;
pub mod verify;

use crate::{
    llm::LlmCapability,
    model::{ExtractedFields, FormLayout, Grade, Signal},
    prelude::*,
};

use llm_cache::LlmResponseCache;

/// The outcome of running the Extractor over one document (spec.md §4.5,
/// §4.9 "EXTRACTION_COMPLETE").
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub fields: ExtractedFields,
    /// The LLM's advisory `doc_type` proposal, if the LLM path ran
    /// (spec.md §4.5 "Classification verification").
    pub llm_doc_type: Option<String>,
    /// Whether every recognized field on the document came back blank —
    /// i.e. a filled-in-nothing template (spec.md §4.7 "Template-only").
    pub is_template_only: bool,
    /// Whether a cached LLM response was served instead of a fresh call
    /// (spec.md §9: emit `CACHED_LLM_RESULT` when served from cache).
    pub served_from_cache: bool,
    /// Audit signals: fallback rules fired, verification drops, etc.
    pub signals: Vec<Signal>,
    /// The named rules this run applied, for `AuditTrace::rules_applied`.
    pub rules_applied: Vec<String>,
}

/// Run the Extractor (spec.md §4.5).
///
/// `contact_block`/`essay_block` come from the Segmenter; `ocr_text` is the
/// full OCR/text-layer text the verification pass checks values against.
#[instrument(level = "debug", skip(llm, cache, contact_block, essay_block, ocr_text))]
pub async fn extract(
    form_layout: FormLayout,
    contact_block: &str,
    essay_block: &str,
    ocr_text: &str,
    llm: &LlmCapability,
    cache: &LlmResponseCache,
) -> Result<ExtractionOutcome> {
    match form_layout {
        FormLayout::TypedForm => Ok(extract_typed(contact_block, essay_block)),
        FormLayout::Freeform => extract_with_llm(contact_block, essay_block, ocr_text, llm, cache).await,
    }
}

pub(crate) fn extract_typed(contact_block: &str, essay_block: &str) -> ExtractionOutcome {
    let fields = typed::extract(contact_block, essay_block);
    let is_template_only = is_all_blank(&fields);
    ExtractionOutcome {
        fields,
        llm_doc_type: None,
        is_template_only,
        served_from_cache: false,
        signals: Vec::new(),
        rules_applied: vec!["typed_form_positional_extraction".to_string()],
    }
}

async fn extract_with_llm(
    contact_block: &str,
    essay_block: &str,
    ocr_text: &str,
    llm: &LlmCapability,
    cache: &LlmResponseCache,
) -> Result<ExtractionOutcome> {
    let mut rules_applied = vec!["llm_assisted_extraction".to_string()];
    let mut signals = Vec::new();

    let prompt_text = "llm_field_extraction_v1";
    let input_text = format!("{contact_block}\n---\n{essay_block}");

    let (raw, served_from_cache) = match cache.get(prompt_text, &input_text) {
        Some(cached) => (llm::parse_cached(&cached), true),
        None => {
            let raw = llm::extract(llm, contact_block, essay_block).await?;
            cache.put(prompt_text, &input_text, llm::raw_to_json(&raw));
            (raw, false)
        }
    };

    let mut fields = ExtractedFields::default();

    if let Some(value) = raw.fields.get("student_name") {
        apply_verified(&mut fields.student_name, verify::verify_text_field(value, ocr_text), &mut signals, "student_name");
    }
    if let Some(value) = raw.fields.get("teacher_name") {
        apply_verified(&mut fields.teacher_name, verify::verify_text_field(value, ocr_text), &mut signals, "teacher_name");
    }
    if let Some(value) = raw.fields.get("father_figure_name") {
        apply_verified(
            &mut fields.father_figure_name,
            verify::verify_text_field(value, ocr_text),
            &mut signals,
            "father_figure_name",
        );
    }
    if let Some(value) = raw.fields.get("phone") {
        apply_verified(&mut fields.phone, verify::verify_text_field(value, ocr_text), &mut signals, "phone");
    }
    if let Some(value) = raw.fields.get("email") {
        apply_verified(&mut fields.email, verify::verify_text_field(value, ocr_text), &mut signals, "email");
    }
    if let Some(value) = raw.fields.get("city_or_location") {
        apply_verified(
            &mut fields.city_or_location,
            verify::verify_text_field(value, ocr_text),
            &mut signals,
            "city_or_location",
        );
    }
    if let Some(value) = raw.fields.get("essay_text") {
        apply_verified(&mut fields.essay_text, verify::verify_text_field(value, ocr_text), &mut signals, "essay_text");
    }

    if let Some(value) = raw.fields.get("school_name") {
        apply_verified(&mut fields.school_name, verify::verify_text_field(value, ocr_text), &mut signals, "school_name");
    }
    if fields.school_name.is_none() {
        if let Some(fallback) = verify::school_name_fallback(contact_block) {
            rules_applied.push("school_name_fallback".to_string());
            signals.push(Signal::new("school_name_fallback", &fallback));
            fields.school_name = Some(fallback);
        }
    }

    if let Some(value) = raw.fields.get("grade") {
        match verify::verify_grade_field(value) {
            verify::Verification::Verified(canonical) => fields.grade = Grade::parse(&canonical),
            verify::Verification::Dropped => {
                signals.push(Signal::new("field_verification_failed", "grade"));
            }
        }
    }
    if fields.grade.is_none() {
        if let Some(grade) = verify::grade_fallback(contact_block) {
            rules_applied.push("grade_fallback".to_string());
            signals.push(Signal::new("grade_fallback", grade.to_string()));
            fields.grade = Some(grade);
        }
    }

    let is_template_only = is_all_blank(&fields);

    Ok(ExtractionOutcome {
        fields,
        llm_doc_type: raw.doc_type,
        is_template_only,
        served_from_cache,
        signals,
        rules_applied,
    })
}

fn apply_verified(slot: &mut Option<String>, verification: verify::Verification, signals: &mut Vec<Signal>, field: &'static str) {
    match verification {
        verify::Verification::Verified(value) => *slot = Some(value),
        verify::Verification::Dropped => {
            signals.push(Signal::new("field_verification_failed", field));
        }
    }
}

fn is_all_blank(fields: &ExtractedFields) -> bool {
    fields.student_name.is_none()
        && fields.school_name.is_none()
        && fields.grade.is_none()
        && fields.teacher_name.is_none()
        && fields.father_figure_name.is_none()
        && fields.phone.is_none()
        && fields.email.is_none()
        && fields.city_or_location.is_none()
        && is_blank(fields.essay_text.as_deref())
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_path_flags_template_only_when_every_field_is_blank() {
        let outcome = extract_typed("no recognizable labels", "");
        assert!(outcome.is_template_only);
        assert!(outcome.llm_doc_type.is_none());
    }

    #[test]
    fn typed_path_is_not_template_only_when_a_field_is_present() {
        let outcome = extract_typed("Student's Name: Jordan Altman", "An essay body.");
        assert!(!outcome.is_template_only);
    }
}
