// Raven — HTTP surface.
//
// Thin axum routers over the engine. The only logic here is request
// validation and the EngineError → HTTP status mapping; everything else
// is a straight call into `engine`.

pub mod agent_api;
pub mod skills_api;

use crate::atoms::error::EngineError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Error wrapper carrying the `{"detail": ...}` body shape the clients
/// expect. Upstream LLM failures mirror their status verbatim.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self.0 {
            EngineError::Config(message) => (StatusCode::BAD_REQUEST, json!(message)),
            EngineError::NotFound(message) => (StatusCode::NOT_FOUND, json!(message)),
            EngineError::Unavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, json!(message)),
            EngineError::Provider {
                status,
                code,
                message,
            } => (
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                json!({
                    "error": code.unwrap_or_else(|| "openai_error".into()),
                    "message": message,
                }),
            ),
            EngineError::Tool { tool, message } => (
                StatusCode::BAD_GATEWAY,
                json!({
                    "error": format!("{}_session_failed", tool),
                    "message": message,
                }),
            ),
            EngineError::Database(e) => {
                log::error!("[server] database error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, json!("skills_store_unavailable"))
            }
            other => {
                log::error!("[server] internal error: {}", other);
                (StatusCode::INTERNAL_SERVER_ERROR, json!(other.to_string()))
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// 400 unless the api key has non-whitespace content.
pub(crate) fn require_api_key(api_key: &str) -> Result<(), ApiError> {
    if api_key.trim().is_empty() {
        return Err(ApiError(EngineError::Config("openai_key_required".into())));
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────
