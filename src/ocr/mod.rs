//! OCR Capability (spec.md §4.2).
//!
//! An abstract text extractor for images and PDF pages, returning text plus
//! per-line confidence and a failure flag. Grounded in the teacher's
//! `queues/ocr/engines/mod.rs` `OcrEngine` trait and its per-backend modules
//! (`textract.rs`, `llm.rs`); the quality-score formula and the
//! "never raises across the pipeline boundary" failure contract are new,
//! since the teacher's engines return partial failures per-page rather than
//! a single deterministic confidence number.

pub mod engines;

use std::sync::Arc;

use crate::{
    model::{OcrLine, OcrResult},
    page_iter::{Page, PageIter, PageIterOptions},
    prelude::*,
};

pub use engines::OcrEngine;

/// Abstract OCR capability: two operations, `ocr_image` and `ocr_pdf_pages`
/// (spec.md §4.2). Implementations delegate to an [`OcrEngine`] backend.
pub struct OcrCapability {
    engine: Arc<dyn OcrEngine>,
}

impl OcrCapability {
    pub fn new(engine: Arc<dyn OcrEngine>) -> Self {
        Self { engine }
    }

    /// OCR a single already-rasterized image.
    #[instrument(level = "debug", skip(self, bytes))]
    pub async fn ocr_image(&self, bytes: &[u8], mime_type: &str) -> OcrResult {
        let page = Page {
            mime_type: mime_type.to_string(),
            data: bytes.to_vec(),
        };
        match self.engine.ocr_page(&page).await {
            Ok(text) => result_from_text(&text),
            Err(err) => {
                warn!(error = ?err, "OCR vendor call failed");
                OcrResult::failed()
            }
        }
    }

    /// OCR every page in the given byte-range of a PDF.
    ///
    /// `ranges` are inclusive-exclusive page indices, as produced by the
    /// Document Analyzer. Each chunk's pages are OCRed and merged into one
    /// [`OcrResult`], matching `OcrResult::per_page_confidence`'s per-page
    /// shape.
    #[instrument(level = "debug", skip(self, pdf_bytes))]
    pub async fn ocr_pdf_pages(
        &self,
        pdf_bytes: &[u8],
        page_range: (usize, usize),
        page_iter_opts: &PageIterOptions,
    ) -> Result<OcrResult> {
        let tmpdir = tempfile::TempDir::with_prefix("ocr_pages")?;
        let pdf_path = tmpdir.path().join("input.pdf");
        tokio::fs::write(&pdf_path, pdf_bytes)
            .await
            .context("failed to write temp PDF")?;

        let page_iter = PageIter::from_path(&pdf_path, page_iter_opts, None).await?;
        let mut texts = Vec::new();
        let mut confidences = Vec::new();
        let mut any_failed = false;
        for (idx, page) in page_iter.enumerate() {
            if idx < page_range.0 || idx >= page_range.1 {
                continue;
            }
            let page = page?;
            match self.engine.ocr_page(&page).await {
                Ok(text) => {
                    let result = result_from_text(&text);
                    confidences.push(result.confidence_avg);
                    texts.push(result.full_text);
                }
                Err(err) => {
                    warn!(error = ?err, page = idx, "OCR vendor call failed for page");
                    any_failed = true;
                    confidences.push(0.0);
                    texts.push(String::new());
                }
            }
        }

        if any_failed && texts.iter().all(|t| t.is_empty()) {
            return Ok(OcrResult::failed());
        }

        let full_text = texts.join("\n\n");
        let lines = full_text
            .lines()
            .map(|line| OcrLine {
                text: line.to_owned(),
                confidence: confidence_score(line),
            })
            .collect();
        let confidence_avg = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        Ok(OcrResult {
            full_text,
            lines,
            confidence_avg,
            ocr_failed: any_failed && confidence_avg == 0.0,
            per_page_confidence: confidences,
        })
    }
}

fn result_from_text(text: &str) -> OcrResult {
    let confidence_avg = confidence_score(text);
    let lines = text
        .lines()
        .map(|line| OcrLine {
            text: line.to_owned(),
            confidence: confidence_score(line),
        })
        .collect();
    OcrResult {
        full_text: text.to_owned(),
        lines,
        confidence_avg,
        ocr_failed: false,
        per_page_confidence: vec![confidence_avg],
    }
}

/// The quality-score contract (spec.md §4.2): deterministic and
/// implementation-neutral so scores are comparable across OCR providers.
///
/// `α = letters / non_whitespace_chars`, `γ = (non_whitespace -
/// alphanumeric) / non_whitespace`, `score = clamp(0.8·α + 0.2·(1−γ), 0, 1)`.
/// Empty or whitespace-only text scores 0.
pub fn confidence_score(text: &str) -> f64 {
    let non_whitespace = text.chars().filter(|c| !c.is_whitespace()).count();
    if non_whitespace == 0 {
        return 0.0;
    }
    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    let alphanumeric = text.chars().filter(|c| c.is_alphanumeric()).count();

    let alpha = letters as f64 / non_whitespace as f64;
    let gamma = (non_whitespace - alphanumeric) as f64 / non_whitespace as f64;
    let score = 0.8 * alpha + 0.2 * (1.0 - gamma);
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_score_is_zero_for_empty_text() {
        assert_eq!(confidence_score(""), 0.0);
        assert_eq!(confidence_score("   \n\t"), 0.0);
    }

    #[test]
    fn confidence_score_is_high_for_clean_prose() {
        let score = confidence_score("The quick brown fox jumps over the lazy dog");
        assert!(score > 0.9, "expected high confidence, got {score}");
    }

    #[test]
    fn confidence_score_drops_for_symbol_noise() {
        let clean = confidence_score("hello world");
        let noisy = confidence_score("h#ll0 w@@@rld!!!###$$$");
        assert!(noisy < clean);
    }

    #[test]
    fn confidence_score_is_bounded() {
        for text in ["", "a", "!!!", "aaaaaaaaaa", "1234567890"] {
            let score = confidence_score(text);
            assert!((0.0..=1.0).contains(&score), "{text:?} -> {score}");
        }
    }
}
