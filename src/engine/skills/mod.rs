// Raven Skill Engine — Skill Lifecycle
//
// Module layout:
//   normalize  — caps, coercions and merge unions for learned definitions
//   similarity — tokenising, step Jaccard, merge scoring, embedding text
//   retriever  — per-user nearest skill by embedding with thresholds
//   executor   — step-by-step execution of a skill's active version
//   learner    — async decompose → generalise → merge-or-insert pipeline
//   repair     — negative-feedback step rewrite and version promotion
//   service    — the `/run` flow stitching all of the above together

pub mod executor;
pub mod learner;
pub mod normalize;
pub mod repair;
pub mod retriever;
pub mod service;
pub mod similarity;

use crate::atoms::types::McpConfig;
use serde_json::{json, Value};

/// Request-scoped settings the skill engine forwards on every agent call.
#[derive(Debug, Clone)]
pub struct SkillRunContext {
    pub api_key: String,
    pub model: String,
    pub instructions: Option<String>,
    pub user_name: Option<String>,
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
    pub session_id: Option<String>,
    pub temperature: Option<f64>,
    pub openai_base_url: Option<String>,
    pub openai_timeout_ms: Option<u64>,
    pub web_search_enabled: bool,
    pub mcp: Option<McpConfig>,
}

impl SkillRunContext {
    /// Build the agent `/run` payload for one turn. Request-level
    /// instructions and per-turn instructions are stacked with a blank
    /// line between them.
    pub fn agent_payload(
        &self,
        input_items: &[Value],
        turn_instructions: Option<&str>,
        default_timeout_ms: u64,
    ) -> Value {
        let combined = match (self.instructions.as_deref(), turn_instructions) {
            (Some(base), Some(turn)) => Some(format!("{}\n\n{}", base, turn)),
            (Some(base), None) => Some(base.to_string()),
            (None, Some(turn)) => Some(turn.to_string()),
            (None, None) => None,
        };
        json!({
            "apiKey": self.api_key,
            "model": self.model,
            "userName": self.user_name,
            "instructions": combined,
            "input": input_items,
            "temperature": self.temperature.unwrap_or(0.3),
            "openaiBaseUrl": self.openai_base_url,
            "openaiTimeoutMs": self.openai_timeout_ms.unwrap_or(default_timeout_ms),
            "webSearchEnabled": self.web_search_enabled,
            "mcp": self.mcp,
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
