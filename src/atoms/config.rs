// ── Raven Atoms: Configuration ─────────────────────────────────────────────
// Environment-driven configuration, read once at startup by each binary.
// Every knob has a sensible default so the services boot with no env at all.

use std::env;

// ── Catalogue caps ─────────────────────────────────────────────────────────
// Hard bounds on skill cardinalities. These shape both the normaliser and
// the merge logic, so they are compile-time constants rather than env knobs.

pub const MAX_STEPS: usize = 8;
pub const MAX_PARAMETERS: usize = 12;
pub const MAX_PRECONDITIONS: usize = 8;
pub const MAX_SUCCESS_CRITERIA: usize = 8;
pub const MAX_EXAMPLES: usize = 6;
pub const MIN_NAME_LEN: usize = 3;

// ── Env helpers ────────────────────────────────────────────────────────────

fn env_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

// ── Agent service ──────────────────────────────────────────────────────────

/// Configuration for the agent service binary.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Socket address the HTTP server binds to.
    pub bind: String,
    /// Path of the editable system-prompt file.
    pub prompt_path: String,
    /// Override for the model context window (0 = use the built-in table).
    pub model_context_tokens: u64,
    /// Max characters of any payload echoed into debug logs.
    pub log_truncate: usize,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let override_tokens = env_u64(
            "AGENT_MODEL_CONTEXT_TOKENS",
            env_u64("ASSISTANT_MODEL_CONTEXT_TOKENS", 0),
        );
        AgentConfig {
            bind: env_string("AGENT_BIND", "0.0.0.0:8001"),
            prompt_path: env_string("AGENT_PROMPT_PATH", "data/prompt.txt"),
            model_context_tokens: override_tokens,
            log_truncate: env_usize("AGENT_LOG_TRUNCATE", 2000),
        }
    }
}

// ── Skill engine service ───────────────────────────────────────────────────

/// Configuration for the skill engine binary.
#[derive(Debug, Clone)]
pub struct SkillsConfig {
    /// Socket address the HTTP server binds to.
    pub bind: String,
    /// Path of the SQLite skill catalogue.
    pub db_path: String,
    /// `/run` endpoint of the agent service.
    pub agent_service_url: String,
    /// Timeout for calls into the agent service (milliseconds).
    pub agent_service_timeout_ms: u64,
    /// Base URL of the OpenAI-compatible API used for embeddings and
    /// the learner/repair model calls.
    pub openai_base_url: String,
    /// Embedding model name.
    pub embedding_model: String,
    /// Embedding vector dimensionality (fixed per deployment).
    pub embedding_dim: usize,
    /// Timeout for direct OpenAI calls (milliseconds).
    pub openai_timeout_ms: u64,
    /// Retrieval: distance fallback ceiling when similarity is unknown.
    pub match_threshold: f32,
    /// Retrieval: minimum cosine similarity for a skill hit.
    pub match_similarity_threshold: f32,
    /// Learner: minimum combined score to merge into an existing skill.
    pub merge_similarity_threshold: f32,
    /// Learner: additive boost applied to raw similarity in merge scoring.
    pub merge_similarity_eps: f32,
    /// Learner: minimum generalization score to persist a skill at all.
    pub generalization_threshold: f32,
}

impl SkillsConfig {
    pub fn from_env() -> Self {
        SkillsConfig {
            bind: env_string("SKILLS_BIND", "0.0.0.0:8002"),
            db_path: env_string("SKILLS_DB_PATH", "data/skills.db"),
            agent_service_url: env_string("AGENT_SERVICE_URL", "http://agent:8001/run"),
            agent_service_timeout_ms: env_u64("AGENT_SERVICE_TIMEOUT_MS", 600_000),
            openai_base_url: env_string("OPENAI_API_BASE_URL", "https://api.openai.com/v1"),
            embedding_model: env_string("OPENAI_EMBEDDING_MODEL", "text-embedding-3-small"),
            embedding_dim: env_usize("OPENAI_EMBEDDING_DIM", 1536),
            openai_timeout_ms: env_u64("OPENAI_TIMEOUT_MS", 30_000),
            match_threshold: env_f32("SKILLS_MATCH_THRESHOLD", 0.25),
            match_similarity_threshold: env_f32("SKILLS_MATCH_SIMILARITY_THRESHOLD", 0.75),
            merge_similarity_threshold: env_f32("SKILLS_MERGE_SIMILARITY_THRESHOLD", 0.75),
            merge_similarity_eps: env_f32("SKILLS_MERGE_SIMILARITY_EPS", 0.05),
            generalization_threshold: env_f32("SKILLS_GENERALIZATION_THRESHOLD", 0.75),
        }
    }
}

impl Default for SkillsConfig {
    /// Built-in defaults without touching the environment. Used by tests.
    fn default() -> Self {
        SkillsConfig {
            bind: "0.0.0.0:8002".into(),
            db_path: "data/skills.db".into(),
            agent_service_url: "http://agent:8001/run".into(),
            agent_service_timeout_ms: 600_000,
            openai_base_url: "https://api.openai.com/v1".into(),
            embedding_model: "text-embedding-3-small".into(),
            embedding_dim: 1536,
            openai_timeout_ms: 30_000,
            match_threshold: 0.25,
            match_similarity_threshold: 0.75,
            merge_similarity_threshold: 0.75,
            merge_similarity_eps: 0.05,
            generalization_threshold: 0.75,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
