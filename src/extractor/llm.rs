//! LLM-assisted extraction (spec.md §4.5b): a single prompt submitted to
//! an [`LlmCapability`](crate::llm::LlmCapability) with the contact block
//! (and essay block) as input, enumerating the recognized fields and
//! forbidding fabrication. Built from the teacher's
//! `ChatPrompt`/`SimpleSchema` machinery verbatim — only the prompt text
//! and schema shape are new.

use std::collections::HashMap;

use crate::{
    async_utils::io::JsonObject,
    llm::LlmCapability,
    prelude::*,
    prompt::{ChatPrompt, Message},
    schema::{Schema, ScalarType, SimpleSchema, SimpleSchemaDetails},
};

/// The nine recognized extraction fields plus the classifier-advisory
/// `doc_type` proposal (spec.md §4.5: "The prompt enumerates the
/// recognized options ... and forbids fabrication").
const FIELD_DESCRIPTIONS: &[(&str, &str)] = &[
    ("student_name", "The submitting student's full name, or an empty string if not present."),
    ("school_name", "The student's school name, or an empty string if not present."),
    ("grade", "The student's grade level as written (digit, ordinal, or word), or an empty string."),
    ("teacher_name", "The student's teacher's name, or an empty string if not present."),
    ("father_figure_name", "The father-figure the essay is about, or an empty string if not present."),
    ("phone", "A contact phone number, or an empty string if not present."),
    ("email", "A contact email address, or an empty string if not present."),
    ("city_or_location", "A city or location name, or an empty string if not present."),
    ("essay_text", "The essay body text, or an empty string if none is present."),
    ("doc_type", "Your best guess at the document category, as free text; advisory only."),
];

const DEVELOPER_PROMPT: &str = "You extract structured fields from an essay-contest submission's \
    contact block and essay block. Never invent a value that does not appear in the provided text. \
    When a field is not present, return an empty string for it. Do not guess at handwriting you cannot \
    read with confidence.";

/// Build the [`ChatPrompt`] this extraction path sends to the LLM
/// capability.
fn build_prompt() -> ChatPrompt {
    let mut properties = HashMap::new();
    for (field, description) in FIELD_DESCRIPTIONS {
        properties.insert(
            field.to_string(),
            SimpleSchema {
                description: description.to_string(),
                details: SimpleSchemaDetails::Scalar {
                    r#type: ScalarType::String,
                    r#enum: None,
                },
            },
        );
    }

    ChatPrompt {
        developer: Some(DEVELOPER_PROMPT.to_string()),
        messages: vec![Message::User {
            text: Some(
                "Contact block:\n{{contact_block}}\n\nEssay block:\n{{essay_block}}".to_string(),
            ),
            images: Vec::new(),
        }],
        response_schema: Schema::Internal(SimpleSchema {
            description: "Extracted essay-contest submission fields.".to_string(),
            details: SimpleSchemaDetails::Object {
                properties,
                title: Some("ExtractedFieldsRaw".to_string()),
            },
        }),
    }
}

/// The raw (unverified) string fields returned by the LLM, plus its
/// advisory `doc_type` proposal for the Classifier (spec.md §4.5
/// "Classification verification").
#[derive(Debug, Clone, Default)]
pub struct RawExtraction {
    pub fields: HashMap<&'static str, String>,
    pub doc_type: Option<String>,
}

/// Call the LLM capability with the contact and essay blocks, returning the
/// raw (pre-verification) field values.
#[instrument(level = "debug", skip(llm, contact_block, essay_block))]
pub async fn extract(llm: &LlmCapability, contact_block: &str, essay_block: &str) -> Result<RawExtraction> {
    let prompt = build_prompt();
    let mut bindings = JsonObject::new();
    bindings.insert("contact_block".to_string(), Value::String(contact_block.to_string()));
    bindings.insert("essay_block".to_string(), Value::String(essay_block.to_string()));

    let response = llm.complete(&prompt, &bindings).await.context("LLM field extraction failed")?;
    Ok(parse_response(&response))
}

/// Serialize a [`RawExtraction`] back to the same JSON shape the LLM
/// returns, so it can be round-tripped through [`crate::extractor::
/// llm_cache::LlmResponseCache`].
pub(crate) fn raw_to_json(raw: &RawExtraction) -> Value {
    let mut map = serde_json::Map::new();
    for (field, _) in FIELD_DESCRIPTIONS {
        if *field == "doc_type" {
            continue;
        }
        map.insert((*field).to_string(), Value::String(raw.fields.get(field).cloned().unwrap_or_default()));
    }
    map.insert("doc_type".to_string(), Value::String(raw.doc_type.clone().unwrap_or_default()));
    Value::Object(map)
}

/// Parse a cached response value (previously produced by [`raw_to_json`])
/// back into a [`RawExtraction`].
pub(crate) fn parse_cached(value: &Value) -> RawExtraction {
    parse_response(value)
}

fn parse_response(response: &Value) -> RawExtraction {
    let mut fields = HashMap::new();
    for (field, _) in FIELD_DESCRIPTIONS {
        if *field == "doc_type" {
            continue;
        }
        if let Some(value) = response.get(field).and_then(Value::as_str) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                fields.insert(*field, trimmed.to_string());
            }
        }
    }
    let doc_type = response
        .get("doc_type")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    RawExtraction { fields, doc_type }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_response_drops_empty_string_fields() {
        let response = json!({
            "student_name": "Jordan Altman",
            "school_name": "",
            "grade": "8",
            "doc_type": "single typed",
        });
        let raw = parse_response(&response);
        assert_eq!(raw.fields.get("student_name"), Some(&"Jordan Altman".to_string()));
        assert_eq!(raw.fields.get("school_name"), None);
        assert_eq!(raw.fields.get("grade"), Some(&"8".to_string()));
        assert_eq!(raw.doc_type.as_deref(), Some("single typed"));
    }

    #[test]
    fn parse_response_tolerates_missing_keys() {
        let raw = parse_response(&json!({}));
        assert!(raw.fields.is_empty());
        assert_eq!(raw.doc_type, None);
    }

    #[test]
    fn build_prompt_declares_every_recognized_field() {
        let prompt = build_prompt();
        let Schema::Internal(schema) = &prompt.response_schema else {
            panic!("expected internal schema");
        };
        let SimpleSchemaDetails::Object { properties, .. } = &schema.details else {
            panic!("expected object schema");
        };
        for (field, _) in FIELD_DESCRIPTIONS {
            assert!(properties.contains_key(*field), "missing field {field}");
        }
    }
}
