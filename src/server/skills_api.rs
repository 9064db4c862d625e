// Raven — Skill engine HTTP surface.
//
// POST /run       skill-or-base execution (agent shape + `skill` block)
// POST /feedback  rate a run; negative feedback repairs the skill
// GET  /health    liveness

use crate::atoms::types::{InputPayload, McpConfig, Rating};
use crate::engine::skills::repair::{handle_feedback, FeedbackParams};
use crate::engine::skills::service::{run_skill_request, SkillsState};
use crate::engine::skills::SkillRunContext;
use crate::server::{require_api_key, ApiError};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

// ── Wire shapes ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillRunRequest {
    pub api_key: String,
    pub model: String,
    pub input: InputPayload,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub openai_base_url: Option<String>,
    #[serde(default)]
    pub openai_timeout_ms: Option<u64>,
    #[serde(default)]
    pub web_search_enabled: Option<bool>,
    #[serde(default)]
    pub mcp: Option<McpConfig>,
}

fn default_temperature() -> Option<f64> {
    Some(0.3)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillRunResponse {
    pub output: String,
    pub last_response_id: Option<String>,
    pub context: Option<Value>,
    pub trace: Option<Value>,
    pub skill: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillFeedbackRequest {
    pub api_key: String,
    pub model: String,
    pub user_id: String,
    pub run_id: String,
    pub rating: Rating,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub openai_base_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillFeedbackResponse {
    pub run_id: String,
    pub updated: bool,
    pub skill_id: Option<String>,
    pub skill_version_id: Option<String>,
    pub new_version_id: Option<String>,
}

// ── Handlers ───────────────────────────────────────────────────────────────

async fn run_handler(
    State(state): State<Arc<SkillsState>>,
    Json(request): Json<SkillRunRequest>,
) -> Result<Json<SkillRunResponse>, ApiError> {
    require_api_key(&request.api_key)?;

    let ctx = SkillRunContext {
        api_key: request.api_key,
        model: request.model,
        instructions: request.instructions,
        user_name: request.user_name,
        user_id: request.user_id.filter(|u| !u.trim().is_empty()),
        thread_id: request.thread_id,
        session_id: request.session_id,
        temperature: request.temperature,
        openai_base_url: request.openai_base_url,
        openai_timeout_ms: request.openai_timeout_ms,
        web_search_enabled: request.web_search_enabled.unwrap_or(false),
        mcp: request.mcp,
    };

    let outcome = run_skill_request(&state, ctx, &request.input).await?;

    Ok(Json(SkillRunResponse {
        output: outcome.output,
        last_response_id: outcome.last_response_id,
        context: outcome.context,
        trace: outcome.trace,
        skill: json!({
            "runId": outcome.skill.run_id,
            "skillId": outcome.skill.skill_id,
            "skillVersionId": outcome.skill.skill_version_id,
            "found": outcome.skill.found,
            "matchDistance": outcome.skill.match_distance,
        }),
    }))
}

async fn feedback_handler(
    State(state): State<Arc<SkillsState>>,
    Json(request): Json<SkillFeedbackRequest>,
) -> Result<Json<SkillFeedbackResponse>, ApiError> {
    require_api_key(&request.api_key)?;

    let outcome = handle_feedback(
        &state.store,
        &state.config,
        FeedbackParams {
            run_id: request.run_id,
            user_id: request.user_id,
            api_key: request.api_key,
            model: request.model,
            openai_base_url: request.openai_base_url,
            rating: request.rating,
            feedback: request.feedback,
        },
    )
    .await?;

    Ok(Json(SkillFeedbackResponse {
        run_id: outcome.run_id,
        updated: outcome.updated,
        skill_id: outcome.skill_id,
        skill_version_id: outcome.skill_version_id,
        new_version_id: outcome.new_version_id,
    }))
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ── Router ─────────────────────────────────────────────────────────────────

pub fn router(state: Arc<SkillsState>) -> Router {
    Router::new()
        .route("/run", post(run_handler))
        .route("/feedback", post(feedback_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Tests ──────────────────────────────────────────────────────────────────
