// ── Raven Atoms: Error Types ───────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, DB, Provider, Config…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • HTTP handlers map variants onto status codes in `server::ApiError`;
//     the engine itself never thinks in status codes except for `Provider`,
//     which mirrors the upstream LLM status verbatim.
//   • No variant carries secret material (API keys, tokens) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// LLM API returned a non-success status. `status` mirrors the upstream
    /// HTTP status; `code` is the API-level error code when the body had one.
    #[error("Provider error {status}: {message}")]
    Provider {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// MCP tool-server session failure (connect, initialize, transport).
    #[error("Tool error: {tool}: {message}")]
    Tool { tool: String, message: String },

    /// Request or service configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A referenced record does not exist (run, skill, version).
    #[error("Not found: {0}")]
    NotFound(String),

    /// A required backing service (the skill store) is not available.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create a provider error with status, optional API code and message.
    pub fn provider(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            status,
            code,
            message: message.into(),
        }
    }

    /// Create a tool error with name and message.
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

// ── Migration bridge: String → EngineError ─────────────────────────────────
// Allows `?` on helpers still returning `Result<T, String>` inside functions
// that return `EngineResult<T>`.

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;

// ── Conversion: EngineError → String ───────────────────────────────────────

impl From<EngineError> for String {
    fn from(e: EngineError) -> Self {
        e.to_string()
    }
}
