// Raven Agent Engine — Context Accounting
//
// Advisory token estimate returned alongside every run. Uses a chars/4
// heuristic rather than a tokenizer; good enough for the UI meter this
// feeds and free of model-specific vocabularies.

use serde_json::{json, Value};

/// Known model context windows. Prefix-matched after normalization.
const MODEL_CONTEXT_TOKENS: &[(&str, u64)] = &[("gpt-5.2", 400_000)];

fn normalize_model_name(model: &str) -> String {
    model.trim().to_lowercase()
}

/// Resolve the context window for a model; `override_tokens` wins when
/// non-zero, unknown models resolve to 0 (meter disabled).
pub fn resolve_model_context_tokens(model: &str, override_tokens: u64) -> u64 {
    if override_tokens > 0 {
        return override_tokens;
    }
    let normalized = normalize_model_name(model);
    if normalized.is_empty() {
        return 0;
    }
    for (name, tokens) in MODEL_CONTEXT_TOKENS {
        if normalized == *name || normalized.starts_with(name) {
            return *tokens;
        }
    }
    0
}

/// Heuristic token count: roughly four characters per token.
pub fn count_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    std::cmp::max(1, text.chars().count() as u64 / 4)
}

fn stringify_payload(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn push_content_chunks(content: &Value, chunks: &mut Vec<String>) {
    match content {
        Value::String(s) => chunks.push(s.clone()),
        Value::Array(parts) => {
            for part in parts {
                match part {
                    Value::String(s) => chunks.push(s.clone()),
                    Value::Object(_) => match part["text"].as_str() {
                        Some(text) => chunks.push(text.to_string()),
                        None => chunks.push(stringify_payload(part)),
                    },
                    other => chunks.push(stringify_payload(other)),
                }
            }
        }
        _ => chunks.push(stringify_payload(content)),
    }
}

/// Pull countable text out of an arbitrary `/run` input payload: strings,
/// message lists with string or block content, anything else stringified.
pub fn extract_text_chunks(value: &Value) -> Vec<String> {
    let mut chunks = Vec::new();
    match value {
        Value::Null => {}
        Value::String(s) => chunks.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(s) => chunks.push(s.clone()),
                    Value::Object(map) => match map.get("content") {
                        Some(content) => push_content_chunks(content, &mut chunks),
                        None => chunks.push(stringify_payload(item)),
                    },
                    other => chunks.push(stringify_payload(other)),
                }
            }
        }
        Value::Object(map) => match map.get("content") {
            Some(content) => push_content_chunks(content, &mut chunks),
            None => chunks.push(stringify_payload(value)),
        },
        other => chunks.push(other.to_string()),
    }
    chunks
}

/// Build the context advisory for a request.
pub fn calculate_context(
    model: &str,
    override_tokens: u64,
    instructions: Option<&str>,
    input: &Value,
    extra_chunks: &[String],
) -> Value {
    let mut chunks: Vec<String> = Vec::new();
    if let Some(instructions) = instructions {
        if !instructions.trim().is_empty() {
            chunks.push(instructions.to_string());
        }
    }
    chunks.extend(extract_text_chunks(input));
    chunks.extend(extra_chunks.iter().filter(|c| !c.is_empty()).cloned());

    let used_tokens: u64 = chunks.iter().map(|c| count_tokens(c)).sum();
    let max_tokens = resolve_model_context_tokens(model, override_tokens);
    let remaining = max_tokens.saturating_sub(used_tokens);
    let remaining_ratio = if max_tokens > 0 {
        remaining as f64 / max_tokens as f64
    } else {
        0.0
    };

    json!({
        "maxTokens": max_tokens,
        "usedTokens": used_tokens,
        "remainingTokens": if max_tokens > 0 { remaining } else { 0 },
        "remainingRatio": remaining_ratio,
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────
