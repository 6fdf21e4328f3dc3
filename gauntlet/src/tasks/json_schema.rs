//! Structural-validation task: emit a JSON object matching a fixed schema.

use std::path::Path;

use jsonschema::{Draft, Validator};
use serde_json::{Value, json};

use super::{BASE_SYSTEM_PROMPT, Task};
use crate::core::extract::first_fenced_block;
use crate::core::types::{ErrorKind, EvalResult, Message};

pub const TASK_NAME: &str = "json_schema";

fn person_schema() -> Value {
    json!({
        "title": "Person",
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "age": { "type": "integer" },
            "city": { "type": "string" }
        },
        "required": ["name", "age", "city"],
        "additionalProperties": false
    })
}

pub struct JsonSchemaTask {
    schema: Value,
    validator: Validator,
}

impl JsonSchemaTask {
    pub fn new() -> Self {
        let schema = person_schema();
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .expect("person schema should compile");
        Self { schema, validator }
    }
}

impl Default for JsonSchemaTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Task for JsonSchemaTask {
    fn name(&self) -> &str {
        TASK_NAME
    }

    fn prompt(&self) -> Vec<Message> {
        let schema = serde_json::to_string_pretty(&self.schema).unwrap_or_default();
        vec![
            Message::system(BASE_SYSTEM_PROMPT),
            Message::user(format!(
                "Return ONLY valid JSON matching this schema. No explanations, no markdown, just the raw JSON object.\n\n\
                 Schema:\n{schema}\n\n\
                 Generate a JSON object for a fictional person. Return ONLY the JSON object, nothing else."
            )),
        ]
    }

    fn evaluate(&self, response_text: &str, _scratch_dir: &Path) -> EvalResult {
        let mut text = response_text.trim();
        if text.starts_with("```") {
            text = match first_fenced_block(text) {
                Some(block) => block.trim(),
                // Unclosed fence, usually a reply cut off at the token limit.
                None => text.split_once('\n').map_or("", |(_, rest)| rest).trim(),
            };
        }

        let instance: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                return EvalResult::fail(ErrorKind::JsonParseError, format!("Invalid JSON: {err}"))
                    .with_data(json!({ "input": text }));
            }
        };

        let violations: Vec<String> = self
            .validator
            .iter_errors(&instance)
            .map(|err| err.to_string())
            .collect();
        if !violations.is_empty() {
            return EvalResult::fail(
                ErrorKind::SchemaError,
                format!("Schema validation failed:\n- {}", violations.join("\n- ")),
            )
            .with_data(json!({ "input": instance }));
        }

        EvalResult::pass().with_data(json!({ "parsed": instance }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluate(response: &str) -> EvalResult {
        let temp = tempfile::tempdir().expect("tempdir");
        JsonSchemaTask::new().evaluate(response, temp.path())
    }

    #[test]
    fn valid_object_passes() {
        let result = evaluate(r#"{"name":"Ann","age":30,"city":"Lake"}"#);
        assert!(result.success);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.error_kind, None);
        assert_eq!(result.diagnostic.data["parsed"]["age"], 30);
    }

    #[test]
    fn non_json_is_parse_error() {
        let result = evaluate("not json");
        assert!(!result.success);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.error_kind, Some(ErrorKind::JsonParseError));
        assert!(result.diagnostic.message.starts_with("Invalid JSON"));
    }

    #[test]
    fn wrong_type_is_schema_error() {
        let result = evaluate(r#"{"name":"Ann","age":"thirty","city":"Lake"}"#);
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::SchemaError));
        assert!(result.diagnostic.message.contains("thirty"));
    }

    #[test]
    fn missing_and_extra_fields_are_schema_errors() {
        let missing = evaluate(r#"{"name":"Ann","age":30}"#);
        assert_eq!(missing.error_kind, Some(ErrorKind::SchemaError));

        let extra = evaluate(r#"{"name":"Ann","age":30,"city":"Lake","email":"a@b.c"}"#);
        assert_eq!(extra.error_kind, Some(ErrorKind::SchemaError));
    }

    #[test]
    fn single_fenced_object_is_unwrapped() {
        let result = evaluate("```json\n{\"name\":\"Ann\",\"age\":30,\"city\":\"Lake\"}\n```");
        assert!(result.success);
    }

    #[test]
    fn unclosed_fence_is_stripped() {
        let result = evaluate("```json\n{\"name\":\"Ann\",\"age\":30,\"city\":\"Lake\"}\n");
        assert!(result.success, "{:?}", result.diagnostic);

        let truncated = evaluate("```json\n{\"name\":\"Ann\",\"age\":");
        assert_eq!(truncated.error_kind, Some(ErrorKind::JsonParseError));
        assert_eq!(truncated.diagnostic.data["input"], "{\"name\":\"Ann\",\"age\":");
    }

    #[test]
    fn evaluation_is_repeatable() {
        for response in ["not json", r#"{"name":1}"#, r#"{"name":"A","age":1,"city":"B"}"#] {
            let first = evaluate(response);
            let second = evaluate(response);
            assert_eq!(first.success, second.success);
            assert_eq!(first.error_kind, second.error_kind);
        }
    }

    #[test]
    fn prompt_embeds_schema() {
        let prompt = JsonSchemaTask::new().prompt();
        assert_eq!(prompt.len(), 2);
        assert!(prompt[1].content.contains("\"additionalProperties\": false"));
    }
}
