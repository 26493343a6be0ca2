//! An OCR engine backed by an LLM's vision input, used as an alternative to
//! a dedicated OCR vendor for handwritten or low-quality scans (spec.md
//! §4.2 allows any backend behind the same two-operation contract).
//!
//! Grounded in the teacher's (deleted) `queues/ocr/engines/llm.rs`, which
//! sent a page image as a data URL to a chat model and asked it to
//! transcribe the page verbatim. Rebuilt here against [`LlmCapability`] and
//! the extended [`ChatPrompt`] with image support.

use crate::{
    async_utils::io::JsonObject,
    data_url::data_url,
    llm::LlmCapability,
    page_iter::Page,
    prelude::*,
    prompt::{ChatPrompt, Message},
    schema::{Schema, SimpleSchema, SimpleSchemaDetails},
};

use super::OcrEngine;

/// OCR engine that asks a vision-capable chat model to transcribe a page
/// image verbatim.
pub struct LlmVisionOcrEngine {
    llm: LlmCapability,
}

impl LlmVisionOcrEngine {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            llm: LlmCapability::new(model),
        }
    }

    fn prompt() -> ChatPrompt {
        ChatPrompt {
            developer: Some(
                "You transcribe scanned document pages exactly as written, including \
                 handwriting. Preserve line breaks. Do not summarize, translate, or \
                 correct spelling."
                    .to_string(),
            ),
            messages: vec![Message::User {
                text: Some("Transcribe every line of text visible on this page.".to_string()),
                images: vec!["{{image_data_url}}".to_string()],
            }],
            response_schema: Schema::Internal(SimpleSchema {
                description: "Verbatim transcription of the page.".to_string(),
                details: SimpleSchemaDetails::Object {
                    title: Some("Transcription".to_string()),
                    properties: [(
                        "text".to_string(),
                        SimpleSchema {
                            description: "The page's full text, in reading order.".to_string(),
                            details: SimpleSchemaDetails::Scalar {
                                r#type: Default::default(),
                                r#enum: None,
                            },
                        },
                    )]
                    .into_iter()
                    .collect(),
                },
            }),
        }
    }
}

#[async_trait]
impl OcrEngine for LlmVisionOcrEngine {
    #[instrument(level = "debug", skip(self, page))]
    async fn ocr_page(&self, page: &Page) -> Result<String> {
        let url = data_url(&page.mime_type, &page.data);
        let mut bindings = JsonObject::new();
        bindings.insert("image_data_url".to_string(), Value::String(url));

        let response = self.llm.complete(&Self::prompt(), &bindings).await?;
        let text = response
            .get("text")
            .and_then(Value::as_str)
            .context("LLM transcription response missing `text` field")?;
        Ok(text.to_owned())
    }
}
