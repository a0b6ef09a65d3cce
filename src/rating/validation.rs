use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Result of checking a response against the rubric contract
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub is_valid: bool,
    pub feature_count: usize,
    pub message: String,
}

impl Validation {
    fn invalid(feature_count: usize, message: String) -> Self {
        Self {
            is_valid: false,
            feature_count,
            message,
        }
    }
}

fn feature_line_regex() -> &'static Regex {
    static FEATURE_LINE: OnceLock<Regex> = OnceLock::new();
    FEATURE_LINE.get_or_init(|| Regex::new(r"^[^:]+:\s*\d+\s*$").expect("valid feature line regex"))
}

/// Number of lines shaped exactly like `Label: 42`
pub fn count_feature_lines(content: &str) -> usize {
    let regex = feature_line_regex();
    content.lines().filter(|line| regex.is_match(line)).count()
}

/// Message of an `error` object, or of a bare string error
pub fn error_message(response: &Value) -> Option<String> {
    let error = response.get("error")?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .unwrap_or("Unknown");
    Some(message.to_string())
}

/// `choices[0].message.content`, if present and textual
pub fn completion_content(response: &Value) -> Option<&str> {
    response
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
}

/// Check a parsed response against the rubric contract.
///
/// Valid means: no `error` field, at least one choice, at least
/// `expected_features` feature lines, and a finish reason other than
/// `length`.
pub fn validate_response(response: &Value, expected_features: usize) -> Validation {
    if let Some(message) = error_message(response) {
        return Validation::invalid(0, format!("API Error: {}", message));
    }

    let has_choices = response
        .get("choices")
        .and_then(Value::as_array)
        .map_or(false, |choices| !choices.is_empty());
    if !has_choices {
        return Validation::invalid(0, "No choices in response".to_string());
    }

    let feature_count = count_feature_lines(completion_content(response).unwrap_or_default());
    if feature_count < expected_features {
        return Validation::invalid(
            feature_count,
            format!(
                "Incomplete response: {}/{} features",
                feature_count, expected_features
            ),
        );
    }

    let finish_reason = response["choices"][0]["finish_reason"].as_str().unwrap_or_default();
    if finish_reason == "length" {
        return Validation::invalid(
            feature_count,
            "Response truncated (hit token limit)".to_string(),
        );
    }

    Validation {
        is_valid: true,
        feature_count,
        message: "Valid".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::{FEATURE_COUNT, RUBRIC};
    use serde_json::json;

    fn completion(content: &str, finish_reason: &str) -> Value {
        json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": finish_reason
            }]
        })
    }

    fn rubric_content(take: usize) -> String {
        RUBRIC
            .iter()
            .take(take)
            .enumerate()
            .map(|(i, label)| format!("{}: {}", label, i % 101))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_complete_response_is_valid() {
        let validation = validate_response(&completion(&rubric_content(FEATURE_COUNT), "stop"), 138);
        assert!(validation.is_valid);
        assert_eq!(validation.feature_count, 138);
        assert_eq!(validation.message, "Valid");
    }

    #[test]
    fn test_one_missing_feature_is_incomplete() {
        let validation = validate_response(&completion(&rubric_content(137), "stop"), 138);
        assert!(!validation.is_valid);
        assert_eq!(validation.feature_count, 137);
        assert_eq!(validation.message, "Incomplete response: 137/138 features");
    }

    #[test]
    fn test_truncated_response_is_invalid() {
        let validation = validate_response(&completion(&rubric_content(FEATURE_COUNT), "length"), 138);
        assert!(!validation.is_valid);
        assert_eq!(validation.message, "Response truncated (hit token limit)");
    }

    #[test]
    fn test_error_payload_is_invalid() {
        let response = json!({"error": {"message": "model overloaded", "type": "server_error"}});
        let validation = validate_response(&response, 138);
        assert!(!validation.is_valid);
        assert_eq!(validation.message, "API Error: model overloaded");
    }

    #[test]
    fn test_missing_choices_is_invalid() {
        assert_eq!(
            validate_response(&json!({"choices": []}), 138).message,
            "No choices in response"
        );
        assert_eq!(validate_response(&json!({}), 138).message, "No choices in response");
    }

    #[test]
    fn test_feature_line_shapes() {
        let content = "Dominant: 10\nWarm:55  \nKind : 3\nBrave: high\nShy: 4.5\nnote without colon\n: 7";
        // "Kind : 3" matches because the label class allows trailing spaces
        assert_eq!(count_feature_lines(content), 3);
    }

    #[test]
    fn test_crlf_lines_are_counted() {
        assert_eq!(count_feature_lines("Dominant: 1\r\nWarm: 2\r\n"), 2);
    }
}
