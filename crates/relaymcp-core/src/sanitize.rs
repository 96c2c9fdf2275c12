//! Log sanitization for tool-call arguments (spec §4.11).
//!
//! Before logging any args object, top-level keys whose name (case-insensitive)
//! contains one of the sensitive substrings are replaced with `"[REDACTED]"`.
//! Sanitization is shallow (top-level only) and non-mutating: it operates on a
//! copy of the caller's value.

use serde_json::Value;

const SENSITIVE_SUBSTRINGS: &[&str] = &[
    "password",
    "token",
    "secret",
    "authorization",
    "credential",
    "api_key",
    "access_token",
];

/// Returns a sanitized copy of `value` suitable for logging.
///
/// Only top-level object keys are inspected; nested objects/arrays are left
/// as-is (the teacher's own error-sanitization utilities take the same
/// "shallow by design, cheap to reason about" stance for log output rather
/// than trying to recursively scrub arbitrary payloads).
pub fn sanitize_for_log(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, v) in map {
                if is_sensitive_key(key) {
                    out.insert(key.clone(), Value::String("[REDACTED]".to_string()));
                } else {
                    out.insert(key.clone(), v.clone());
                }
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_SUBSTRINGS.iter().any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_matching_keys_case_insensitively() {
        let input = json!({
            "userId": "u1",
            "Password": "hunter2",
            "apiKey": "sk-abc",
            "Authorization": "Bearer xyz",
            "nested": {"token": "should-survive-because-shallow"},
        });
        let sanitized = sanitize_for_log(&input);
        assert_eq!(sanitized["userId"], json!("u1"));
        assert_eq!(sanitized["Password"], json!("[REDACTED]"));
        assert_eq!(sanitized["Authorization"], json!("[REDACTED]"));
        // apiKey does not literally contain "api_key" (underscore), so the
        // substring match is intentionally literal, not fuzzy.
        assert_eq!(sanitized["nested"]["token"], json!("should-survive-because-shallow"));
    }

    #[test]
    fn does_not_mutate_input() {
        let input = json!({"secret_value": "s3cr3t"});
        let original = input.clone();
        let _ = sanitize_for_log(&input);
        assert_eq!(input, original);
    }

    #[test]
    fn underscored_api_key_is_redacted() {
        let input = json!({"api_key": "k"});
        let sanitized = sanitize_for_log(&input);
        assert_eq!(sanitized["api_key"], json!("[REDACTED]"));
    }
}
