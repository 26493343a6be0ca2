//! Segmenter (spec.md §4.4).
//!
//! Splits raw OCR/text-layer text into a *contact block* (student/school/
//! contact metadata) and an *essay block*, using layout heuristics rather
//! than a model call. Grounded in the teacher's preference for small pure
//! functions over `&str` (`page_iter.rs`'s MIME sniffing, `analyzer.rs`'s
//! `score_top_strip`); bilingual anchor phrases are `const` tables per
//! spec.md §1's non-goal of "language detection beyond English/Spanish
//! aliases" — English and Spanish only, nothing more.

use crate::model::DocClass;

/// Phrases that mark the start of the essay body, in reading order.
const ESSAY_START_ANCHORS: &[&str] = &[
    "what my father",
    "what my father means",
    "lo que mi padre",
    "lo que significa mi padre",
];

/// Phrases that mark the end of the essay body (the start of a reviewer
/// reaction section, which is not part of the essay).
const ESSAY_END_ANCHORS: &[&str] = &["reaction to this essay", "father-figure reaction", "reaccion al ensayo"];

/// Minimum number of lines kept in the contact block when an anchor is
/// found (spec.md §4.4: "clamped to a minimum of 10 lines").
const MIN_CONTACT_LINES: usize = 10;

/// Maximum fraction of the document kept in the contact block.
const MAX_CONTACT_FRACTION: f64 = 0.4;

/// Fallback contact-block line count per `doc_class`, used when no anchor
/// phrase is found (spec.md §4.4: "N from the doc_class profile").
fn fallback_contact_lines(doc_class: DocClass) -> usize {
    match doc_class {
        DocClass::SingleTyped => 12,
        DocClass::SingleScanned => 14,
        DocClass::MultiPageSingle => 16,
        DocClass::BulkScannedBatch => 14,
        DocClass::EssayWithHeaderMetadata => 8,
    }
}

/// The result of segmenting raw text into contact and essay blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segments {
    pub contact_block: String,
    pub essay_block: String,
    /// Whether a recognized essay-prompt anchor was found (vs. the
    /// doc-class fallback line count being used).
    pub anchor_found: bool,
}

/// Split `text` into a contact block and an essay block (spec.md §4.4).
pub fn segment(text: &str, doc_class: DocClass) -> Segments {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return Segments {
            contact_block: String::new(),
            essay_block: String::new(),
            anchor_found: false,
        };
    }

    let max_contact = ((lines.len() as f64) * MAX_CONTACT_FRACTION).floor() as usize;
    let max_contact = max_contact.max(MIN_CONTACT_LINES).min(lines.len());

    if let Some(start_idx) = find_anchor_line(&lines, ESSAY_START_ANCHORS) {
        let split_at = start_idx.clamp(MIN_CONTACT_LINES.min(lines.len()), max_contact);
        let end_idx = find_anchor_line(&lines[split_at..], ESSAY_END_ANCHORS)
            .map(|offset| split_at + offset)
            .unwrap_or(lines.len());
        return Segments {
            contact_block: lines[..split_at].join("\n"),
            essay_block: lines[split_at..end_idx].join("\n"),
            anchor_found: true,
        };
    }

    let split_at = fallback_contact_lines(doc_class).min(lines.len());
    Segments {
        contact_block: lines[..split_at].join("\n"),
        essay_block: lines[split_at..].join("\n"),
        anchor_found: false,
    }
}

/// Find the index of the first line containing any of `anchors`
/// (case-insensitive substring match).
fn find_anchor_line(lines: &[&str], anchors: &[&str]) -> Option<usize> {
    lines.iter().position(|line| {
        let lower = line.to_lowercase();
        anchors.iter().any(|anchor| lower.contains(anchor))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lines(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("contact line {i}")).collect()
    }

    #[test]
    fn splits_on_essay_start_anchor() {
        let mut lines = sample_lines(12);
        lines.push("What My Father Means To Me".to_string());
        lines.push("My father taught me to ride a bike.".to_string());
        let text = lines.join("\n");
        let segments = segment(&text, DocClass::SingleTyped);
        assert!(segments.anchor_found);
        assert!(segments.contact_block.contains("contact line 11"));
        assert!(segments.essay_block.contains("taught me to ride a bike"));
        assert!(!segments.essay_block.contains("What My Father"));
    }

    #[test]
    fn stops_essay_at_reaction_anchor() {
        let mut lines = sample_lines(10);
        lines.push("What my father means to me".to_string());
        lines.push("My essay body goes here.".to_string());
        lines.push("Father-Figure reaction:".to_string());
        lines.push("Reviewer notes follow.".to_string());
        let text = lines.join("\n");
        let segments = segment(&text, DocClass::SingleTyped);
        assert!(segments.essay_block.contains("essay body"));
        assert!(!segments.essay_block.contains("Reviewer notes"));
    }

    #[test]
    fn falls_back_to_doc_class_profile_when_no_anchor() {
        let lines = sample_lines(30);
        let text = lines.join("\n");
        let segments = segment(&text, DocClass::EssayWithHeaderMetadata);
        assert!(!segments.anchor_found);
        assert_eq!(segments.contact_block.lines().count(), 8);
        assert_eq!(segments.essay_block.lines().count(), 22);
    }

    #[test]
    fn clamps_contact_block_to_minimum_ten_lines() {
        let mut lines = sample_lines(3);
        lines.push("What My Father means".to_string());
        let text = lines.join("\n");
        let segments = segment(&text, DocClass::SingleTyped);
        // Anchor is at line index 3, but the minimum clamp keeps at least
        // min(10, total_lines) lines in the contact block.
        assert_eq!(segments.contact_block.lines().count(), 4.min(lines.len()));
    }

    #[test]
    fn empty_text_produces_empty_segments() {
        let segments = segment("", DocClass::SingleScanned);
        assert_eq!(segments.contact_block, "");
        assert_eq!(segments.essay_block, "");
        assert!(!segments.anchor_found);
    }
}
