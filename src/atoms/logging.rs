// ── Raven Atoms: Log Hygiene ───────────────────────────────────────────────
// Helpers that keep secrets and oversized payloads out of the logs.

use serde_json::Value;

/// Mask a secret for logging, keeping a short prefix and suffix.
pub fn mask_secret(value: &str) -> String {
    const KEEP: usize = 4;
    if value.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= KEEP * 2 {
        return format!("{}...{}", chars[0], chars[chars.len() - 1]);
    }
    let head: String = chars[..KEEP].iter().collect();
    let tail: String = chars[chars.len() - KEEP..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Render a payload for debug logs, truncated to `limit` characters.
pub fn safe_log_payload(value: &Value, limit: usize) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    };
    truncate_chars(&text, limit)
}

/// Truncate on a char boundary, annotating how much was dropped.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        return text.to_string();
    }
    let head: String = text.chars().take(limit).collect();
    format!("{}...(+{} chars)", head, total - limit)
}

/// Rough size of a JSON payload in characters, for run logging.
pub fn estimate_size(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::String(s) => s.chars().count(),
        other => serde_json::to_string(other).map(|s| s.len()).unwrap_or(0),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mask_secret_long() {
        assert_eq!(mask_secret("sk-abcdefghijklmnop"), "sk-a...mnop");
    }

    #[test]
    fn test_mask_secret_short() {
        assert_eq!(mask_secret("abcd"), "a...d");
        assert_eq!(mask_secret(""), "");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hello...(+6 chars)");
    }

    #[test]
    fn test_safe_log_payload_json() {
        let out = safe_log_payload(&json!({"a": 1}), 100);
        assert_eq!(out, "{\"a\":1}");
    }

    #[test]
    fn test_estimate_size() {
        assert_eq!(estimate_size(&json!(null)), 0);
        assert_eq!(estimate_size(&json!("abcd")), 4);
        assert!(estimate_size(&json!({"a": 1})) > 0);
    }
}
