//! Usage: Security-sensitive helpers (token masking, constant-time equality,
//! sanitizing provider error bodies before they enter error messages).

use serde_json::Value;
use subtle::ConstantTimeEq;

const MASK_PREFIX_LEN: usize = 6;
const MASK_SUFFIX_LEN: usize = 4;
const ERROR_SNIPPET_MAX_CHARS: usize = 500;

/// Keep just enough of a credential to correlate log lines, never the value.
pub(crate) fn mask_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    // Counted in chars, not bytes, so multibyte tokens cannot split a
    // codepoint at the boundary.
    let len = trimmed.chars().count();
    if len <= MASK_PREFIX_LEN + MASK_SUFFIX_LEN {
        return "*".repeat(len.min(8));
    }

    let prefix: String = trimmed.chars().take(MASK_PREFIX_LEN).collect();
    let suffix: String = trimmed.chars().skip(len - MASK_SUFFIX_LEN).collect();
    format!("{prefix}...{suffix}")
}

/// Timing-safe comparison for the anti-CSRF `state` parameter.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.trim().to_ascii_lowercase();
    key.contains("token") || key.contains("secret") || key == "authorization"
}

fn redact_sensitive_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if is_sensitive_key(key) {
                    if let Some(raw) = nested.as_str() {
                        *nested = Value::String(mask_token(raw));
                        continue;
                    }
                }
                redact_sensitive_fields(nested);
            }
        }
        Value::Array(items) => {
            for nested in items {
                redact_sensitive_fields(nested);
            }
        }
        _ => {}
    }
}

/// Truncated, token-masked rendering of a provider error body, safe to embed
/// in an error message.
pub(crate) fn sanitize_error_body(body: &str) -> String {
    if let Ok(mut value) = serde_json::from_str::<Value>(body) {
        redact_sensitive_fields(&mut value);
        if let Ok(encoded) = serde_json::to_string(&value) {
            return encoded.chars().take(ERROR_SNIPPET_MAX_CHARS).collect();
        }
    }
    body.chars().take(ERROR_SNIPPET_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_token_keeps_prefix_and_suffix() {
        assert_eq!(mask_token("abcdef1234567890"), "abcdef...7890");
    }

    #[test]
    fn mask_token_handles_multibyte_tokens() {
        assert_eq!(mask_token("ééééééééééééé"), "éééééé...éééé");
        assert_eq!(mask_token("日本語トークン値テスト値"), "日本語トーク...テスト値");
    }

    #[test]
    fn mask_token_redacts_short_values_fully() {
        assert_eq!(mask_token("abcd"), "****");
        assert_eq!(mask_token("  "), "");
    }

    #[test]
    fn constant_time_eq_matches_exact_bytes() {
        assert!(constant_time_eq(b"state-1", b"state-1"));
        assert!(!constant_time_eq(b"state-1", b"state-2"));
    }

    #[test]
    fn sanitize_error_body_masks_nested_token_fields() {
        let raw = r#"{"error": {"message": "bad grant", "refresh_token": "abcd1234xyz9876"}}"#;
        let snippet = sanitize_error_body(raw);
        assert!(snippet.contains("bad grant"));
        assert!(!snippet.contains("abcd1234xyz9876"));
        assert!(snippet.contains(&mask_token("abcd1234xyz9876")));
    }

    #[test]
    fn sanitize_error_body_truncates_non_json() {
        let raw = "x".repeat(2000);
        assert_eq!(sanitize_error_body(&raw).len(), 500);
    }
}
