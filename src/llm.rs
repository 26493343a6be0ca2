//! LLM Capability: a thin wrapper over [`async_openai`] that enforces this
//! system's determinism and validation contract (spec.md §4.5, §6).
//!
//! Grounded in the teacher's `drivers/openai.rs` (deleted this session,
//! since it referenced macros and schema types from a different historical
//! version of `retry.rs`/`schema.rs`) and `queues/chat.rs`'s general shape:
//! build a request from a [`ChatPrompt`], send it with `temperature=0` and a
//! `response_format` pinned to a JSON Schema, validate the reply against
//! that schema with [`jsonschema`], and retry transient failures once via
//! [`retry_stage`].

use std::sync::Arc;

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestMessageContentPartImageArgs, ChatCompletionRequestMessageContentPartTextArgs,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs, ResponseFormat, ResponseFormatJsonSchema,
    },
    error::OpenAIError,
};

use crate::{
    async_utils::io::JsonObject,
    prelude::*,
    prompt::{ChatPrompt, Message},
    retry::{IsKnownTransient, retry_stage},
};

/// The vendor seam an [`LlmCapability`] calls through. Mirrors
/// [`crate::ocr::engines::OcrEngine`]: the capability owns the
/// deterministic, no-network parts of the contract (rendering, schema
/// validation); the backend owns the one vendor round trip.
#[async_trait]
pub trait LlmBackend: Send + Sync + 'static {
    /// Send one chat completion request and return its raw (unvalidated)
    /// JSON-string reply.
    async fn complete_chat(
        &self,
        model: String,
        messages: Vec<ChatCompletionRequestMessage>,
        response_format: ResponseFormat,
    ) -> Result<String>;
}

/// The real backend: [`async_openai::Client`] with `temperature=0` and a
/// `response_format` pinned to the caller's JSON Schema, retried once on a
/// known-transient failure.
pub struct OpenAiLlmBackend {
    client: Client<OpenAIConfig>,
}

#[async_trait]
impl LlmBackend for OpenAiLlmBackend {
    async fn complete_chat(
        &self,
        model: String,
        messages: Vec<ChatCompletionRequestMessage>,
        response_format: ResponseFormat,
    ) -> Result<String> {
        let client = self.client.clone();
        let response = retry_stage(
            move || {
                let client = client.clone();
                let model = model.clone();
                let messages = messages.clone();
                let response_format = response_format.clone();
                async move {
                    let request = CreateChatCompletionRequestArgs::default()
                        .model(model)
                        .temperature(0.0)
                        .messages(messages)
                        .response_format(response_format)
                        .build()?;
                    client.chat().create(request).await
                }
            },
            OpenAIError::is_known_transient,
        )
        .await
        .context("LLM chat completion failed")?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .context("LLM response had no message content")
    }
}

/// An LLM capability: renders a [`ChatPrompt`], calls the model with
/// `temperature=0`, and validates the JSON reply against the prompt's
/// `response_schema`.
pub struct LlmCapability {
    backend: Arc<dyn LlmBackend>,
    model: String,
}

impl LlmCapability {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            backend: Arc::new(OpenAiLlmBackend { client: Client::new() }),
            model: model.into(),
        }
    }

    /// Construct a capability over a given backend — the vendor-free
    /// [`stub::StubLlmBackend`] in tests, or a different vendor adapter.
    pub fn with_backend(backend: Arc<dyn LlmBackend>, model: impl Into<String>) -> Self {
        Self { backend, model: model.into() }
    }

    /// Render `prompt` with `bindings`, call the model, and return the
    /// validated JSON response.
    ///
    /// Returns a [`StageError`](crate::errors::StageError)-compatible error
    /// (via the `ExtractionError`/`ClassificationError` kinds their callers
    /// apply) when the model's reply doesn't satisfy the schema.
    #[instrument(level = "debug", skip(self, prompt, bindings))]
    pub async fn complete(&self, prompt: &ChatPrompt, bindings: &JsonObject) -> Result<Value> {
        let rendered = prompt.render(bindings)?;
        let schema = prompt.response_schema.to_json_schema().await?;

        let mut messages = Vec::new();
        if let Some(developer) = &rendered.developer {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(developer.clone())
                    .build()?,
            ));
        }
        for message in &rendered.messages {
            messages.push(to_request_message(message)?);
        }

        let schema_name = "response";
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: None,
                name: schema_name.to_string(),
                schema: Some(schema.clone()),
                strict: Some(true),
            },
        };

        let content = self.backend.complete_chat(self.model.clone(), messages, response_format).await?;
        let value: Value = serde_json::from_str(&content).context("LLM response was not valid JSON")?;

        validate_against_schema(&value, &schema)?;
        Ok(value)
    }
}

pub mod stub;

/// Validate `value` against a compiled JSON Schema, producing a readable
/// error message listing every violation.
fn validate_against_schema(value: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::validator_for(schema).context("invalid response JSON Schema")?;
    let errors: Vec<String> = compiled.iter_errors(value).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("LLM response failed schema validation: {}", errors.join("; ")))
    }
}

fn to_request_message(message: &Message) -> Result<ChatCompletionRequestMessage> {
    match message {
        Message::User { text, images } => {
            if images.is_empty() {
                let text = text.clone().unwrap_or_default();
                Ok(ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default().content(text).build()?,
                ))
            } else {
                let mut parts = Vec::new();
                if let Some(text) = text {
                    parts.push(ChatCompletionRequestUserMessageContentPart::Text(
                        ChatCompletionRequestMessageContentPartTextArgs::default()
                            .text(text.clone())
                            .build()?,
                    ));
                }
                for image_url in images {
                    parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                        ChatCompletionRequestMessageContentPartImageArgs::default()
                            .image_url(
                                ImageUrlArgs::default()
                                    .url(image_url.clone())
                                    .detail(ImageDetail::High)
                                    .build()?,
                            )
                            .build()?,
                    ));
                }
                Ok(ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(ChatCompletionRequestUserMessageContent::Array(parts))
                        .build()?,
                ))
            }
        }
        Message::Assistant { json } => Ok(ChatCompletionRequestMessage::Assistant(
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(json.to_string())
                .build()?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_validation_rejects_missing_required_field() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"],
            "additionalProperties": false,
        });
        let value = json!({});
        assert!(validate_against_schema(&value, &schema).is_err());
    }

    #[test]
    fn schema_validation_accepts_conforming_value() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"],
            "additionalProperties": false,
        });
        let value = json!({"name": "Jordan"});
        assert!(validate_against_schema(&value, &schema).is_ok());
    }
}
