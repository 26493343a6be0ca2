//! Classifier (spec.md §4.6).
//!
//! A pure function over OCR text and document features: verifies an
//! LLM-proposed `doc_type` against code-computed features (label counts,
//! page count, header-strip score, dark-band count) and decides the final,
//! code-verified `doc_class`. Running twice on the same input must yield
//! the same output (spec.md §8 property 4) — there is no model call here,
//! only arithmetic over values the [`crate::analyzer`] already computed.

use crate::model::{DocClass, DocumentAnalysis};

/// The deterministic feature vector recorded into the audit trace alongside
/// the classifier's decision (spec.md §4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub label_count: usize,
    pub page_count: usize,
    pub header_score_hits: usize,
    pub dark_band_count: usize,
}

/// The outcome of classification: the code-verified `doc_class`, the
/// feature vector, and whether the LLM's proposed type (if any) diverged
/// from the code-computed value.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub doc_class: DocClass,
    pub features: FeatureVector,
    pub llm_divergence: Option<String>,
}

/// Classify a document, given the [`DocumentAnalysis`] already computed by
/// the Document Analyzer and an optional `doc_type` string the LLM
/// proposed during extraction (spec.md §4.5's "Classification
/// verification").
///
/// The final `doc_class` is always `analysis.doc_class` — the LLM's
/// proposal has no authority over the outcome, only over whether a
/// divergence signal is recorded (spec.md §4.5, §4.6).
pub fn classify(analysis: &DocumentAnalysis, llm_proposed_doc_type: Option<&str>) -> Classification {
    let features = FeatureVector {
        label_count: analysis.chunk_ranges.len(),
        page_count: analysis.page_count,
        header_score_hits: if analysis.form_layout == crate::model::FormLayout::TypedForm {
            1
        } else {
            0
        },
        dark_band_count: if analysis.is_scanned_multi_submission {
            analysis.chunk_ranges.len()
        } else {
            0
        },
    };

    let llm_divergence = llm_proposed_doc_type.and_then(|proposed| {
        let normalized = normalize_doc_type(proposed);
        let code_computed = canonical_name(analysis.doc_class);
        if normalized == code_computed {
            None
        } else {
            Some(format!("llm proposed {proposed:?}, code computed {code_computed:?}"))
        }
    });

    Classification {
        doc_class: analysis.doc_class,
        features,
        llm_divergence,
    }
}

fn normalize_doc_type(raw: &str) -> String {
    raw.trim().to_uppercase().replace([' ', '-'], "_")
}

fn canonical_name(doc_class: DocClass) -> String {
    match doc_class {
        DocClass::SingleTyped => "SINGLE_TYPED".to_string(),
        DocClass::SingleScanned => "SINGLE_SCANNED".to_string(),
        DocClass::MultiPageSingle => "MULTI_PAGE_SINGLE".to_string(),
        DocClass::BulkScannedBatch => "BULK_SCANNED_BATCH".to_string(),
        DocClass::EssayWithHeaderMetadata => "ESSAY_WITH_HEADER_METADATA".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocFormat, FormLayout, Structure};

    fn sample_analysis(doc_class: DocClass) -> DocumentAnalysis {
        DocumentAnalysis {
            format: DocFormat::NativeText,
            structure: Structure::Single,
            form_layout: FormLayout::TypedForm,
            page_count: 1,
            chunk_ranges: vec![(0, 1)],
            doc_class,
            is_scanned_multi_submission: false,
        }
    }

    #[test]
    fn classification_is_deterministic() {
        let analysis = sample_analysis(DocClass::SingleTyped);
        let first = classify(&analysis, Some("SINGLE_TYPED"));
        let second = classify(&analysis, Some("SINGLE_TYPED"));
        assert_eq!(first, second);
    }

    #[test]
    fn code_computed_doc_class_wins_over_llm_proposal() {
        let analysis = sample_analysis(DocClass::SingleScanned);
        let classification = classify(&analysis, Some("SINGLE_TYPED"));
        assert_eq!(classification.doc_class, DocClass::SingleScanned);
        assert!(classification.llm_divergence.is_some());
    }

    #[test]
    fn no_divergence_when_llm_proposal_matches() {
        let analysis = sample_analysis(DocClass::MultiPageSingle);
        let classification = classify(&analysis, Some("multi-page single"));
        assert!(classification.llm_divergence.is_none());
    }

    #[test]
    fn no_divergence_recorded_when_llm_silent() {
        let analysis = sample_analysis(DocClass::SingleTyped);
        let classification = classify(&analysis, None);
        assert!(classification.llm_divergence.is_none());
    }
}
