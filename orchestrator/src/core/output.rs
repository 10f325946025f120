//! Structured-output extraction and mode schema checks for engine replies.

use jsonschema::Draft;
use serde_json::Value;

/// Keys that may carry a unified diff in structured output, in lookup order.
const DIFF_KEYS: [&str; 2] = ["patch", "diff"];

/// Why engine output failed the mode contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputProblem {
    /// The mode requires fields but the reply held no JSON object.
    NotStructured,
    /// JSON was found but violates the mode schema.
    Violations(Vec<String>),
}

/// Pull a JSON object out of free-form engine text.
///
/// Tries, in order: the whole text, a fenced ```json block, and the outermost
/// `{ ... }` span.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Some(value) = parse_object(trimmed) {
        return Some(value);
    }
    if let Some(block) = fenced_block(trimmed) {
        if let Some(value) = parse_object(block) {
            return Some(value);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_object(&trimmed[start..=end])
}

fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

/// Names listed under the schema's top-level `required`.
pub fn required_fields(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Compile a mode output schema (Draft 2020-12).
pub fn compile_schema(schema: &Value) -> Result<jsonschema::Validator, String> {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| err.to_string())
}

/// Check `structured` against a mode output schema and its compiled validator.
pub fn check_output(
    schema: &Value,
    validator: &jsonschema::Validator,
    structured: Option<&Value>,
) -> Result<(), OutputProblem> {
    let Some(instance) = structured else {
        if required_fields(schema).is_empty() {
            return Ok(());
        }
        return Err(OutputProblem::NotStructured);
    };
    let messages: Vec<String> = validator
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(OutputProblem::Violations(messages))
    }
}

/// Non-empty diff text carried by structured output, if any.
pub fn diff_payload(structured: &Value) -> Option<&str> {
    DIFF_KEYS
        .iter()
        .filter_map(|key| structured.get(key).and_then(Value::as_str))
        .find(|text| !text.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(schema: &Value, structured: Option<&Value>) -> Result<(), OutputProblem> {
        let validator = compile_schema(schema).expect("schema");
        check_output(schema, &validator, structured)
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["summary", "changes"],
            "properties": {
                "summary": {"type": "string"},
                "changes": {"type": "array"}
            }
        })
    }

    #[test]
    fn extracts_bare_fenced_and_embedded_json() {
        assert_eq!(extract_json(r#"{"a":1}"#), Some(json!({"a": 1})));
        let fenced = "Here you go:\n```json\n{\"a\": 2}\n```\nthanks";
        assert_eq!(extract_json(fenced), Some(json!({"a": 2})));
        let embedded = "result => {\"a\": {\"b\": 3}} <= end";
        assert_eq!(extract_json(embedded), Some(json!({"a": {"b": 3}})));
        assert_eq!(extract_json("[1, 2]"), None);
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn required_fields_are_listed() {
        assert_eq!(required_fields(&schema()), vec!["summary", "changes"]);
        assert!(required_fields(&json!({})).is_empty());
    }

    #[test]
    fn missing_required_field_is_a_violation() {
        let output = json!({"summary": "done"});
        let err = check(&schema(), Some(&output)).unwrap_err();
        match err {
            OutputProblem::Violations(messages) => {
                assert!(messages.iter().any(|m| m.contains("changes")));
            }
            other => panic!("unexpected problem: {other:?}"),
        }
    }

    #[test]
    fn unstructured_output_only_fails_when_fields_are_required() {
        assert_eq!(
            check(&schema(), None),
            Err(OutputProblem::NotStructured)
        );
        assert_eq!(check(&json!({"type": "object"}), None), Ok(()));
    }

    #[test]
    fn valid_output_passes() {
        let output = json!({"summary": "done", "changes": []});
        assert_eq!(check(&schema(), Some(&output)), Ok(()));
    }

    #[test]
    fn diff_payload_prefers_patch_and_skips_blank() {
        assert_eq!(diff_payload(&json!({"patch": "--- a"})), Some("--- a"));
        assert_eq!(diff_payload(&json!({"patch": " ", "diff": "x"})), Some("x"));
        assert_eq!(diff_payload(&json!({"summary": "s"})), None);
    }
}
