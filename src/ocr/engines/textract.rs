//! An OCR engine backed by AWS Textract.
//!
//! Grounded in the teacher's `aws.rs` client-construction pattern
//! (`load_aws_config` + `BehaviorVersion`) and its general shape for
//! wrapping an AWS SDK call in [`retry_stage`](crate::retry::retry_stage).
//! Textract's `DetectDocumentText` operation returns a flat list of
//! `Block`s; `LINE` blocks carry the page's text in reading order, which is
//! all this engine's trimmed [`OcrEngine`] contract needs.

use aws_sdk_textract::{
    primitives::Blob,
    types::{Document, block_type::BlockType},
};

use crate::{aws::load_aws_config, page_iter::Page, prelude::*, retry::retry_stage};

use super::OcrEngine;

/// OCR engine backed by AWS Textract's `DetectDocumentText` API.
pub struct TextractOcrEngine {
    client: aws_sdk_textract::Client,
}

impl TextractOcrEngine {
    /// Build a new client using the ambient AWS configuration (environment,
    /// shared config files, or instance metadata).
    pub async fn new() -> Result<Self> {
        let config = load_aws_config().await?;
        Ok(Self {
            client: aws_sdk_textract::Client::new(&config),
        })
    }
}

#[async_trait]
impl OcrEngine for TextractOcrEngine {
    #[instrument(level = "debug", skip(self, page))]
    async fn ocr_page(&self, page: &Page) -> Result<String> {
        let bytes = page.data.clone();
        let client = self.client.clone();
        let result = retry_stage(
            move || {
                let client = client.clone();
                let bytes = bytes.clone();
                async move {
                    client
                        .detect_document_text()
                        .document(Document::builder().bytes(Blob::new(bytes)).build())
                        .send()
                        .await
                }
            },
            |err| err.as_service_error().is_some_and(|e| e.is_throttling_exception()),
        )
        .await
        .context("AWS Textract call failed")?;

        let text = result
            .blocks()
            .iter()
            .filter(|block| block.block_type() == Some(&BlockType::Line))
            .filter_map(|block| block.text())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(text)
    }
}
