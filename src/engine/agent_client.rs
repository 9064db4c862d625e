// Raven Skill Engine — Agent Service Client
//
// The skill engine never talks to the LLM for answer turns itself; every
// turn (base solution or skill step) goes through the agent service. The
// `AgentCaller` trait is the seam: production uses the HTTP client below,
// executor tests plug in a scripted mock.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::AgentResult;
use async_trait::async_trait;
use log::warn;
use serde_json::Value;
use std::time::Duration;

#[async_trait]
pub trait AgentCaller: Send + Sync {
    /// POST one `/run` payload to the agent and return its answer.
    async fn run(&self, payload: Value) -> EngineResult<AgentResult>;
}

/// HTTP client for the agent service.
pub struct HttpAgentClient {
    client: reqwest::Client,
    url: String,
}

impl HttpAgentClient {
    pub fn new(url: &str, timeout_ms: u64) -> Self {
        HttpAgentClient {
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms.max(1000)))
                .build()
                .unwrap_or_default(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl AgentCaller for HttpAgentClient {
    async fn run(&self, payload: Value) -> EngineResult<AgentResult> {
        let response = self.client.post(&self.url).json(&payload).send().await?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            let detail = &body["detail"];
            let code = detail["error"].as_str().map(str::to_string);
            let message = detail["message"]
                .as_str()
                .or_else(|| detail.as_str())
                .or_else(|| body["error"].as_str())
                .unwrap_or("agent_failed")
                .to_string();
            warn!(
                "[skills] agent_call_failed status={} code={:?} message={}",
                status, code, message
            );
            return Err(EngineError::provider(
                status.as_u16(),
                code.or(Some("agent_failed".into())),
                message,
            ));
        }

        Ok(agent_result_from_body(&body))
    }
}

/// Defensive mapping of an agent `/run` body onto `AgentResult`.
pub fn agent_result_from_body(body: &Value) -> AgentResult {
    AgentResult {
        output: body["output"].as_str().unwrap_or_default().to_string(),
        last_response_id: body["lastResponseId"].as_str().map(str::to_string),
        context: non_null(&body["context"]),
        trace: non_null(&body["trace"]),
    }
}

fn non_null(value: &Value) -> Option<Value> {
    if value.is_null() {
        None
    } else {
        Some(value.clone())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
