// ── Raven Atoms: Core Types ────────────────────────────────────────────────
// Domain and wire types shared by the agent service and the skill engine.
// Wire shapes use camelCase field names; DB records use snake_case.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Request input ──────────────────────────────────────────────────────────

/// `/run` input: either a bare user string or a list of message objects.
/// Message objects are kept as raw JSON — the model API consumes them as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputPayload {
    Text(String),
    Items(Vec<Value>),
}

impl InputPayload {
    /// Normalize to a list of message objects (a bare string becomes a
    /// single user message). Non-object list entries are dropped.
    pub fn normalize_items(&self) -> Vec<Value> {
        match self {
            InputPayload::Text(text) => {
                vec![serde_json::json!({"role": "user", "content": text})]
            }
            InputPayload::Items(items) => items
                .iter()
                .filter(|item| item.is_object())
                .cloned()
                .collect(),
        }
    }

    /// Raw JSON value to hand to the model API.
    pub fn to_value(&self) -> Value {
        match self {
            InputPayload::Text(text) => Value::String(text.clone()),
            InputPayload::Items(items) => Value::Array(items.clone()),
        }
    }
}

/// The most recent user message content in a normalized item list.
pub fn extract_last_user_message(items: &[Value]) -> String {
    for item in items.iter().rev() {
        if item["role"].as_str() == Some("user") {
            if let Some(content) = item["content"].as_str() {
                return content.to_string();
            }
        }
    }
    String::new()
}

// ── MCP wiring (request-scoped) ────────────────────────────────────────────

/// Per-request MCP tool-server configuration passed by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,
    #[serde(default, rename = "allowedTools")]
    pub allowed_tools: Option<Vec<String>>,
}

impl McpConfig {
    /// Allow-list with whitespace-only entries dropped. Empty means "all".
    pub fn allowed(&self) -> Vec<String> {
        self.allowed_tools
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter(|name| !name.trim().is_empty())
            .cloned()
            .collect()
    }
}

// ── Skill definition (LLM-facing shapes) ───────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillStep {
    pub title: String,
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillParameter {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkillExample {
    pub user_input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Draft skill produced by the decompose call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub name: String,
    pub description: String,
    pub entrypoint: String,
    pub steps: Vec<SkillStep>,
}

/// Generalised skill produced by the second learner call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralizedSkillDefinition {
    pub name: String,
    pub description: String,
    pub entrypoint: String,
    pub steps: Vec<SkillStep>,
    #[serde(default)]
    pub parameters: Option<Vec<SkillParameter>>,
    #[serde(default)]
    pub preconditions: Option<Vec<String>>,
    #[serde(default)]
    pub success_criteria: Option<Vec<String>>,
    #[serde(default)]
    pub examples: Option<Vec<SkillExample>>,
    #[serde(default)]
    pub generalization_score: Option<f32>,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Replacement step list produced by feedback repair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillFix {
    pub steps: Vec<SkillStep>,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Catalogue metadata carried alongside a definition on insert/merge.
#[derive(Debug, Clone, Default)]
pub struct SkillMetadata {
    pub parameters: Vec<SkillParameter>,
    pub preconditions: Vec<String>,
    pub success_criteria: Vec<String>,
    pub examples: Vec<SkillExample>,
    pub generalization_score: Option<f32>,
}

// ── Store records ──────────────────────────────────────────────────────────

/// A skill row as loaded from the catalogue.
#[derive(Debug, Clone)]
pub struct SkillRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub entrypoint_text: String,
    pub active_version_id: Option<String>,
    pub parameters: Vec<SkillParameter>,
    pub preconditions: Vec<String>,
    pub success_criteria: Vec<String>,
    pub examples: Vec<SkillExample>,
    pub generalization_score: Option<f32>,
    /// Raw stored vector; empty when the row was loaded without it.
    pub embedding: Vec<f32>,
}

/// An immutable versioned step list.
#[derive(Debug, Clone)]
pub struct SkillVersionRecord {
    pub id: String,
    pub skill_id: String,
    pub version: i64,
    pub steps: Vec<SkillStep>,
}

/// One executed step inside a skill run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    #[serde(default)]
    pub title: Option<String>,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Value>,
    pub timestamp: String,
}

/// A skill run row (one `/run` request handled by the engine).
#[derive(Debug, Clone)]
pub struct SkillRunRecord {
    pub id: String,
    pub skill_id: Option<String>,
    pub skill_version_id: Option<String>,
    pub user_id: String,
    pub input: Option<String>,
    pub step_results: Vec<StepResult>,
}

// ── Feedback ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Positive,
    Neutral,
    Negative,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Positive => "positive",
            Rating::Neutral => "neutral",
            Rating::Negative => "negative",
        }
    }
}

// ── Agent call result ──────────────────────────────────────────────────────

/// What one agent turn produced, as consumed by the skill engine.
#[derive(Debug, Clone, Default)]
pub struct AgentResult {
    pub output: String,
    pub last_response_id: Option<String>,
    pub context: Option<Value>,
    pub trace: Option<Value>,
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_input_payload_string() {
        let payload: InputPayload = serde_json::from_value(json!("hello")).unwrap();
        let items = payload.normalize_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["role"], "user");
        assert_eq!(items[0]["content"], "hello");
    }

    #[test]
    fn test_input_payload_items_drops_non_objects() {
        let payload: InputPayload =
            serde_json::from_value(json!([{"role": "user", "content": "a"}, 42, "x"])).unwrap();
        assert_eq!(payload.normalize_items().len(), 1);
    }

    #[test]
    fn test_extract_last_user_message() {
        let items = vec![
            json!({"role": "user", "content": "first"}),
            json!({"role": "assistant", "content": "reply"}),
            json!({"role": "user", "content": "second"}),
        ];
        assert_eq!(extract_last_user_message(&items), "second");
    }

    #[test]
    fn test_extract_last_user_message_none() {
        let items = vec![json!({"role": "assistant", "content": "reply"})];
        assert_eq!(extract_last_user_message(&items), "");
    }

    #[test]
    fn test_mcp_allowed_filters_blank() {
        let cfg = McpConfig {
            allowed_tools: Some(vec!["node".into(), "  ".into(), "edge".into(), String::new()]),
            ..Default::default()
        };
        assert_eq!(cfg.allowed(), vec!["node".to_string(), "edge".to_string()]);
    }

    #[test]
    fn test_rating_serde() {
        let rating: Rating = serde_json::from_str("\"negative\"").unwrap();
        assert_eq!(rating, Rating::Negative);
        assert_eq!(serde_json::to_string(&Rating::Positive).unwrap(), "\"positive\"");
    }

    #[test]
    fn test_skill_example_camel_case() {
        let example: SkillExample = serde_json::from_value(json!({
            "userInput": "Summarise doc X",
            "outputSummary": "done",
        }))
        .unwrap();
        assert_eq!(example.user_input, "Summarise doc X");
        assert_eq!(example.output_summary.as_deref(), Some("done"));
    }

    #[test]
    fn test_generalized_definition_tolerates_missing_fields() {
        let def: GeneralizedSkillDefinition = serde_json::from_value(json!({
            "name": "n", "description": "d", "entrypoint": "e",
            "steps": [{"title": "t", "instructions": "i"}],
        }))
        .unwrap();
        assert!(def.parameters.is_none());
        assert!(def.generalization_score.is_none());
    }
}
