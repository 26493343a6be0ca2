//! OCR engine backends.
//!
//! Grounded in the teacher's `queues/ocr/engines/mod.rs` `OcrEngine` trait,
//! trimmed to the single operation this system needs: OCR one already-
//! rasterized page and return raw text. Quality scoring and failure handling
//! live one level up in [`super`], so every backend stays a thin vendor
//! adapter, matching the teacher's `PdfToTextOcrEngine`/`TextractOcrEngine`
//! shape.

pub mod llm_vision;
pub mod stub;
pub mod textract;

use crate::{page_iter::Page, prelude::*};

/// Interface to an OCR engine backend.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// OCR a single rasterized page, returning its raw text.
    async fn ocr_page(&self, page: &Page) -> Result<String>;
}
