//! A vendor-free OCR engine used for local development and tests.
//!
//! Grounded in the teacher's `drivers/echo.rs` pattern of deterministic,
//! no-network stand-ins for real backends: rather than calling out to an
//! OCR vendor, this engine always reports that it found no text. That
//! keeps the rest of the pipeline (confidence scoring, escalation,
//! `ocr_failed` handling) exercised without an AWS account or an LLM key.

use crate::{page_iter::Page, prelude::*};

use super::OcrEngine;

/// An OCR engine that always returns empty text.
///
/// Downstream, [`crate::ocr::confidence_score`] scores empty text as `0.0`,
/// which routes submissions through the same `OCR_FAILED`/`LOW_CONFIDENCE`
/// handling a real vendor outage would trigger — useful for rehearsing that
/// path without a vendor dependency.
#[derive(Debug, Default)]
pub struct StubOcrEngine;

#[async_trait]
impl OcrEngine for StubOcrEngine {
    async fn ocr_page(&self, _page: &Page) -> Result<String> {
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_engine_returns_empty_text() {
        let engine = StubOcrEngine;
        let page = Page {
            mime_type: "image/png".to_string(),
            data: vec![0u8; 16],
        };
        let text = engine.ocr_page(&page).await.unwrap();
        assert!(text.is_empty());
    }
}
