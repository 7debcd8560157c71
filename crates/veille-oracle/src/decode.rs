//! Decoding raw oracle text into a [`ClassificationResult`].
//!
//! The answer must be a JSON object mapping category names to arrays of
//! subcategory names, optionally wrapped in `corrected_classifications` and
//! optionally inside a markdown code fence. Names outside the candidate set
//! are dropped; anything else malformed is an error so the call is retried.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use veille_core::{CandidateSet, ClassificationResult};

/// Key some prompts ask the oracle to wrap its answer in.
pub const WRAPPER_KEY: &str = "corrected_classifications";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("empty answer")]
    Empty,

    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("unexpected shape: {0}")]
    Shape(String),
}

/// Strip a surrounding markdown code fence (```json ... ```) if present.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[start + 3..];
    // Skip the info string (`json`) up to the newline or the first brace.
    let body_start = match after.find('\n') {
        Some(i) => i + 1,
        None => after
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(after.len()),
    };
    let body = &after[body_start..];
    let body = match body.rfind("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim()
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

fn unwrap_root(value: Value) -> Result<Map<String, Value>, DecodeError> {
    let mut map = match value {
        Value::Object(map) => map,
        other => {
            return Err(DecodeError::Shape(format!(
                "expected an object, got {}",
                kind(&other)
            )))
        }
    };
    match map.remove(WRAPPER_KEY) {
        Some(Value::Object(inner)) => Ok(inner),
        Some(other) => Err(DecodeError::Shape(format!(
            "{} is {}, expected an object",
            WRAPPER_KEY,
            kind(&other)
        ))),
        None => Ok(map),
    }
}

/// Decode and sanitize one oracle answer against the item's candidates.
///
/// Each category keeps at most `max_subcategories` distinct names, in the
/// order the oracle gave them.
pub fn decode_classification(
    raw: &str,
    candidates: &CandidateSet,
    max_subcategories: usize,
) -> Result<ClassificationResult, DecodeError> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(DecodeError::Empty);
    }
    let value: Value = serde_json::from_str(body).map_err(|e| DecodeError::Json(e.to_string()))?;
    let root = unwrap_root(value)?;

    let mut result = ClassificationResult::new();
    for (category, entry) in root {
        let entries = match entry {
            Value::Array(entries) => entries,
            other => {
                return Err(DecodeError::Shape(format!(
                    "'{}' maps to {}, expected an array",
                    category,
                    kind(&other)
                )))
            }
        };

        let category = category.trim();
        if !candidates.contains_category(category) {
            warn!("Oracle proposed category '{}' outside the candidates, dropping", category);
            continue;
        }

        let mut chosen: Vec<String> = Vec::new();
        for entry in entries {
            let name = match entry {
                Value::String(name) => name,
                other => {
                    return Err(DecodeError::Shape(format!(
                        "'{}' contains {}, expected strings",
                        category,
                        kind(&other)
                    )))
                }
            };
            let name = name.trim();
            if !candidates.allows(category, name) {
                warn!(
                    "Oracle proposed subcategory '{}' outside '{}' candidates, dropping",
                    name, category
                );
                continue;
            }
            if !chosen.iter().any(|c| c == name) {
                chosen.push(name.to_string());
            }
        }

        if chosen.len() > max_subcategories {
            warn!(
                "Oracle chose {} subcategories for '{}', keeping the first {}",
                chosen.len(),
                category,
                max_subcategories
            );
            chosen.truncate(max_subcategories);
        }
        result.insert(category, chosen);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> CandidateSet {
        let mut c = CandidateSet::new();
        c.insert(
            "Cardiologie",
            vec!["HTA".into(), "Arythmie".into(), "Insuffisance".into(), "Valves".into()],
        );
        c.insert("Pneumologie", vec!["Asthme".into()]);
        c
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```{\"a\": 1}```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("  {\"a\": 1} "), "{\"a\": 1}");
        assert_eq!(strip_code_fence("Voici:\n```json\n{}\n```\n"), "{}");
    }

    #[test]
    fn test_decode_bare_object() {
        let r = decode_classification(r#"{"Cardiologie": ["HTA"]}"#, &candidates(), 3).unwrap();
        assert_eq!(r.get("Cardiologie"), Some(&["HTA".to_string()][..]));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_decode_wrapped_and_fenced() {
        let raw = "```json\n{\"corrected_classifications\": {\"Pneumologie\": [\"Asthme\"]}, \"note\": \"ok\"}\n```";
        let r = decode_classification(raw, &candidates(), 3).unwrap();
        assert_eq!(r.get("Pneumologie"), Some(&["Asthme".to_string()][..]));
    }

    #[test]
    fn test_decode_drops_unknown_names() {
        let raw = r#"{"Cardiologie": ["HTA", "Inventée"], "Dermatologie": ["Acné"]}"#;
        let r = decode_classification(raw, &candidates(), 3).unwrap();
        assert_eq!(r.get("Cardiologie"), Some(&["HTA".to_string()][..]));
        assert!(r.get("Dermatologie").is_none());
    }

    #[test]
    fn test_decode_keeps_empty_group() {
        let r = decode_classification(r#"{"Cardiologie": []}"#, &candidates(), 3).unwrap();
        assert_eq!(r.get("Cardiologie"), Some(&[][..]));
    }

    #[test]
    fn test_decode_dedups_and_truncates() {
        let raw = r#"{"Cardiologie": ["HTA", "HTA", "Arythmie", "Valves", "Insuffisance"]}"#;
        let r = decode_classification(raw, &candidates(), 3).unwrap();
        assert_eq!(
            r.get("Cardiologie").unwrap(),
            &["HTA".to_string(), "Arythmie".to_string(), "Valves".to_string()][..]
        );
    }

    #[test]
    fn test_decode_rejects_bad_shapes() {
        let c = candidates();
        assert_eq!(decode_classification("  ", &c, 3), Err(DecodeError::Empty));
        assert!(matches!(decode_classification("nope", &c, 3), Err(DecodeError::Json(_))));
        assert!(matches!(decode_classification("[1]", &c, 3), Err(DecodeError::Shape(_))));
        assert!(matches!(
            decode_classification(r#"{"Cardiologie": "HTA"}"#, &c, 3),
            Err(DecodeError::Shape(_))
        ));
        assert!(matches!(
            decode_classification(r#"{"Cardiologie": [1]}"#, &c, 3),
            Err(DecodeError::Shape(_))
        ));
        assert!(matches!(
            decode_classification(r#"{"corrected_classifications": []}"#, &c, 3),
            Err(DecodeError::Shape(_))
        ));
    }
}
