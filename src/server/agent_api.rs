// Raven — Agent service HTTP surface.
//
// POST /run        one agent turn (tool loop included)
// POST /context    advisory token accounting for a prospective request
// GET  /prompt     current system prompt
// POST /prompt     replace the system prompt
// GET  /prompt/ui  minimal HTML prompt editor
// GET  /health     liveness

use crate::atoms::config::AgentConfig;
use crate::atoms::types::{InputPayload, McpConfig};
use crate::engine::agent::{build_instructions, run_agent, AgentRunParams};
use crate::engine::context::calculate_context;
use crate::engine::prompt::{load_prompt_text, save_prompt_text};
use crate::server::{require_api_key, ApiError};
use axum::extract::State;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

// ── Wire shapes ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunRequest {
    pub api_key: String,
    pub model: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    pub input: InputPayload,
    #[serde(default)]
    pub max_turns: Option<u32>,
    #[serde(default = "default_temperature")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub openai_base_url: Option<String>,
    #[serde(default)]
    pub openai_timeout_ms: Option<u64>,
    #[serde(default)]
    pub mcp: Option<McpConfig>,
}

fn default_temperature() -> Option<f64> {
    Some(0.3)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunResponse {
    pub output: String,
    pub last_response_id: Option<String>,
    pub context: Option<Value>,
    pub trace: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContextRequest {
    pub model: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub user_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PromptUpdateRequest {
    pub prompt: String,
}

// ── Handlers ───────────────────────────────────────────────────────────────

async fn run_handler(
    State(config): State<Arc<AgentConfig>>,
    Json(request): Json<AgentRunRequest>,
) -> Result<Json<AgentRunResponse>, ApiError> {
    require_api_key(&request.api_key)?;

    let outcome = run_agent(
        &config,
        AgentRunParams {
            api_key: request.api_key,
            model: request.model,
            input: request.input.to_value(),
            instructions: request.instructions,
            user_name: request.user_name,
            temperature: request.temperature,
            openai_base_url: request.openai_base_url,
            openai_timeout_ms: request.openai_timeout_ms,
            max_turns: request.max_turns,
            mcp: request.mcp,
        },
    )
    .await?;

    Ok(Json(AgentRunResponse {
        output: outcome.output,
        last_response_id: outcome.last_response_id,
        context: Some(outcome.context),
        trace: outcome.trace,
    }))
}

async fn context_handler(
    State(config): State<Arc<AgentConfig>>,
    Json(request): Json<AgentContextRequest>,
) -> Json<Value> {
    let instructions = build_instructions(
        &load_prompt_text(Path::new(&config.prompt_path)),
        request.user_name.as_deref(),
        request.instructions.as_deref(),
    );
    let context = calculate_context(
        &request.model,
        config.model_context_tokens,
        Some(&instructions),
        &request.input,
        &[],
    );
    Json(json!({ "context": context }))
}

async fn get_prompt_handler(State(config): State<Arc<AgentConfig>>) -> Json<Value> {
    Json(json!({ "prompt": load_prompt_text(Path::new(&config.prompt_path)) }))
}

async fn update_prompt_handler(
    State(config): State<Arc<AgentConfig>>,
    Json(request): Json<PromptUpdateRequest>,
) -> Result<Json<Value>, ApiError> {
    let prompt = save_prompt_text(Path::new(&config.prompt_path), &request.prompt)?;
    Ok(Json(json!({ "prompt": prompt })))
}

async fn prompt_ui_handler(State(config): State<Arc<AgentConfig>>) -> Html<String> {
    let prompt = escape_html(&load_prompt_text(Path::new(&config.prompt_path)));
    Html(format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Raven Prompt Editor</title>
  <style>
    body {{ margin: 0; font-family: sans-serif; background: #f3f4f6; color: #1b1f2a; }}
    .card {{ max-width: 920px; margin: 48px auto; background: #fff; border: 1px solid #e1e6ef;
             border-radius: 12px; padding: 28px; }}
    h1 {{ font-size: 20px; margin: 0 0 6px; }}
    p {{ margin: 0 0 18px; color: #4c5566; }}
    textarea {{ width: 100%; min-height: 320px; box-sizing: border-box; padding: 12px;
                font-family: monospace; font-size: 14px; border: 1px solid #d2d9e5;
                border-radius: 8px; }}
    .row {{ display: flex; justify-content: space-between; align-items: center; margin-top: 16px; }}
    button {{ border: none; border-radius: 8px; padding: 10px 18px; font-weight: 600;
              background: #111827; color: #fff; cursor: pointer; }}
    .status {{ font-size: 13px; color: #64748b; }}
  </style>
</head>
<body>
  <div class="card">
    <h1>Raven Prompt Editor</h1>
    <p>Edit the system prompt used by the agent service.</p>
    <textarea id="prompt">{prompt}</textarea>
    <div class="row">
      <span class="status" id="status">Ready.</span>
      <button id="save">Save</button>
    </div>
  </div>
  <script>
    const statusEl = document.getElementById('status');
    const saveBtn = document.getElementById('save');
    const promptEl = document.getElementById('prompt');
    saveBtn.addEventListener('click', async () => {{
      const text = promptEl.value || '';
      if (!text.trim()) {{ statusEl.textContent = 'Prompt cannot be empty.'; return; }}
      saveBtn.disabled = true;
      statusEl.textContent = 'Saving...';
      try {{
        const res = await fetch('/prompt', {{
          method: 'POST',
          headers: {{ 'content-type': 'application/json' }},
          body: JSON.stringify({{ prompt: text }}),
        }});
        const body = await res.json().catch(() => ({{}}));
        statusEl.textContent = res.ok ? 'Saved.' : (body?.detail || 'Save failed.');
      }} catch (err) {{
        statusEl.textContent = 'Save failed.';
      }} finally {{
        saveBtn.disabled = false;
      }}
    }});
  </script>
</body>
</html>
"#
    ))
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// ── Router ─────────────────────────────────────────────────────────────────

pub fn router(config: Arc<AgentConfig>) -> Router {
    Router::new()
        .route("/run", post(run_handler))
        .route("/context", post(context_handler))
        .route("/prompt", get(get_prompt_handler).post(update_prompt_handler))
        .route("/prompt/ui", get(prompt_ui_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(config)
}

// ── Tests ──────────────────────────────────────────────────────────────────
