//! A vendor-free LLM backend used for local development and tests.
//!
//! Grounded in the same pattern as [`crate::ocr::engines::stub::StubOcrEngine`]:
//! rather than calling out to a model vendor, this backend synthesizes a
//! schema-conformant reply with every field left at its zero value (empty
//! string, `0`, `false`). Callers that treat empty strings as "field not
//! present" (see `extractor::llm::parse_response`) see the same behavior a
//! real model would produce for a document with nothing recognizable on it,
//! without a vendor credential or a network call.

use async_openai::types::{ChatCompletionRequestMessage, ResponseFormat};

use crate::prelude::*;

use super::LlmBackend;

/// An LLM backend that never calls out to a vendor; it derives a
/// schema-conformant zero-value reply from the request's `response_format`.
#[derive(Debug, Default)]
pub struct StubLlmBackend;

#[async_trait]
impl LlmBackend for StubLlmBackend {
    async fn complete_chat(
        &self,
        _model: String,
        _messages: Vec<ChatCompletionRequestMessage>,
        response_format: ResponseFormat,
    ) -> Result<String> {
        let schema = match response_format {
            ResponseFormat::JsonSchema { json_schema } => json_schema.schema.unwrap_or_else(|| json!({})),
            _ => json!({}),
        };
        Ok(zero_value_for_schema(&schema).to_string())
    }
}

fn zero_value_for_schema(schema: &Value) -> Value {
    match schema.get("type").and_then(Value::as_str) {
        Some("object") => {
            let mut map = serde_json::Map::new();
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (key, prop_schema) in properties {
                    map.insert(key.clone(), zero_value_for_schema(prop_schema));
                }
            }
            Value::Object(map)
        }
        Some("string") => Value::String(String::new()),
        Some("number") | Some("integer") => Value::Number(0.into()),
        Some("boolean") => Value::Bool(false),
        Some("array") => Value::Array(Vec::new()),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_backend_returns_empty_fields_for_an_object_schema() {
        let backend = StubLlmBackend;
        let response_format = ResponseFormat::JsonSchema {
            json_schema: async_openai::types::ResponseFormatJsonSchema {
                description: None,
                name: "response".to_string(),
                schema: Some(json!({
                    "type": "object",
                    "properties": {
                        "student_name": {"type": "string"},
                        "grade": {"type": "string"},
                    },
                })),
                strict: Some(true),
            },
        };
        let content = backend.complete_chat("gpt-4o-mini".to_string(), Vec::new(), response_format).await.unwrap();
        let value: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["student_name"], "");
        assert_eq!(value["grade"], "");
    }
}
