//! Chat prompt data types shared by the LLM-assisted extractor and the
//! LLM-vision OCR backend.
//!
//! Grounded in the teacher's `prompt.rs` (Handlebars template rendering over
//! a `ChatPrompt`/`Message` pair) and extended with an image part on
//! [`Message`] and a `response_schema` field, following the shape the
//! teacher's own `queues/ocr/engines/llm.rs` backend expected of its prompt
//! type when sending page images as data URLs for vision OCR.

use handlebars::Handlebars;

use crate::{async_utils::io::JsonObject, prelude::*, schema::Schema};

/// Render a prompt as a JSON object, filling in template values for any
/// string fields.
pub trait RenderTemplate {
    type Output;

    fn render_template(&self, handlebars: &Handlebars, bindings: &JsonObject) -> Result<Self::Output>;
}

/// A chat completion prompt: an optional developer/system message, a
/// sequence of user/assistant turns, and the JSON Schema the final
/// assistant turn must conform to.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatPrompt {
    pub developer: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default = "Schema::empty_object")]
    pub response_schema: Schema,
}

impl ChatPrompt {
    /// Render every templated string in the prompt, substituting `bindings`.
    pub fn render(&self, bindings: &JsonObject) -> Result<Rendered> {
        let handlebars = Handlebars::new();
        let developer = self
            .developer
            .as_ref()
            .map(|d| handlebars.render_template(d, bindings))
            .transpose()
            .context("failed to render developer message")?;
        let messages = self
            .messages
            .iter()
            .map(|m| m.render_template(&handlebars, bindings))
            .collect::<Result<Vec<_>>>()?;
        Ok(Rendered {
            developer,
            messages,
        })
    }
}

/// A [`ChatPrompt`] after template substitution, ready to hand to an LLM
/// capability.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub developer: Option<String>,
    pub messages: Vec<Message>,
}

/// One turn of a conversation.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        images: Vec<String>,
    },
    Assistant {
        json: Value,
    },
}

impl RenderTemplate for Message {
    type Output = Message;

    fn render_template(&self, handlebars: &Handlebars, bindings: &JsonObject) -> Result<Self::Output> {
        match self {
            Message::User { text, images } => {
                let text = text
                    .as_ref()
                    .map(|t| handlebars.render_template(t, bindings))
                    .transpose()
                    .context("failed to render user message")?;
                let images = images
                    .iter()
                    .map(|i| handlebars.render_template(i, bindings))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .context("failed to render image template")?;
                Ok(Message::User { text, images })
            }
            Message::Assistant { json } => Ok(Message::Assistant { json: json.clone() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_template_bindings_into_user_text() {
        let prompt = ChatPrompt {
            developer: Some("You are a {{role}}.".to_string()),
            messages: vec![Message::User {
                text: Some("Extract fields from: {{contact_block}}".to_string()),
                images: vec![],
            }],
            response_schema: Schema::empty_object(),
        };
        let mut bindings = JsonObject::new();
        bindings.insert("role".to_string(), Value::String("field extractor".to_string()));
        bindings.insert(
            "contact_block".to_string(),
            Value::String("Student's Name: Jordan".to_string()),
        );
        let rendered = prompt.render(&bindings).unwrap();
        assert_eq!(rendered.developer.as_deref(), Some("You are a field extractor."));
        match &rendered.messages[0] {
            Message::User { text, .. } => {
                assert_eq!(text.as_deref(), Some("Extract fields from: Student's Name: Jordan"));
            }
            _ => panic!("expected user message"),
        }
    }
}
