//! Parsing and validation of structured step output.
//!
//! Models asked for JSON still wrap it in ```` ```json ```` fences, prefix it
//! with a BOM, or add a sentence before the opening brace. Those wrappers are
//! peeled off deterministically; anything that still does not parse as a
//! JSON object is an [`OutputParseError`].

use crate::error::ValidationWarning;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\n(.*?)\n?```\s*$").unwrap());

const INVISIBLE: [char; 5] = ['\u{FEFF}', '\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}'];

/// Generated text that is not a usable JSON object.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OutputParseError {
    #[error("output is empty")]
    Empty,

    #[error("output is not valid JSON: {0}")]
    NotJson(String),

    #[error("output is JSON but not an object (got {0})")]
    NotAnObject(&'static str),
}

/// Parse generated text into a JSON object.
pub fn parse_structured(text: &str) -> Result<Value, OutputParseError> {
    let cleaned: String = text.chars().filter(|c| !INVISIBLE.contains(c)).collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return Err(OutputParseError::Empty);
    }

    let unfenced = match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    };

    let value = match serde_json::from_str::<Value>(&unfenced) {
        Ok(v) => v,
        Err(first_err) => match embedded_object(&unfenced) {
            Some(slice) => serde_json::from_str::<Value>(slice)
                .map_err(|_| OutputParseError::NotJson(first_err.to_string()))?,
            None => return Err(OutputParseError::NotJson(first_err.to_string())),
        },
    };

    match value {
        Value::Object(_) => Ok(value),
        other => Err(OutputParseError::NotAnObject(kind(&other))),
    }
}

/// The span from the first `{` to the last `}`, if any.
fn embedded_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Required top-level fields that are absent or `null`.
pub fn missing_fields(value: &Value, required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|field| value.get(field.as_str()).map_or(true, Value::is_null))
        .cloned()
        .collect()
}

/// Build a warning when any required field is missing.
pub fn validate_required(step: &str, value: &Value, required: &[String]) -> Option<ValidationWarning> {
    let missing = missing_fields(value, required);
    if missing.is_empty() {
        None
    } else {
        Some(ValidationWarning {
            step: step.to_string(),
            missing_fields: missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_object() {
        assert_eq!(parse_structured(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn strips_json_fences_and_bom() {
        let text = "\u{FEFF}```json\n{\"facts\": []}\n```\n";
        assert_eq!(parse_structured(text).unwrap(), json!({"facts": []}));
    }

    #[test]
    fn recovers_object_after_preamble() {
        let text = "Here is the analysis:\n{\"issues\": [\"whether the lease was valid\"]}\nHope this helps.";
        assert_eq!(
            parse_structured(text).unwrap(),
            json!({"issues": ["whether the lease was valid"]})
        );
    }

    #[test]
    fn rejects_prose() {
        assert!(matches!(
            parse_structured("The court held that the appeal fails."),
            Err(OutputParseError::NotJson(_))
        ));
        assert_eq!(parse_structured("   "), Err(OutputParseError::Empty));
    }

    #[test]
    fn rejects_non_object_json() {
        assert_eq!(parse_structured("[1, 2]"), Err(OutputParseError::NotAnObject("array")));
        assert_eq!(parse_structured("\"text\""), Err(OutputParseError::NotAnObject("string")));
    }

    #[test]
    fn missing_and_null_fields_are_reported() {
        let value = json!({"case_name": "A v B", "court": null});
        let required = vec!["case_name".to_string(), "court".to_string(), "date".to_string()];
        let warning = validate_required("metadata", &value, &required).unwrap();
        assert_eq!(warning.missing_fields, vec!["court", "date"]);
        assert!(validate_required("metadata", &value, &required[..1]).is_none());
    }
}
