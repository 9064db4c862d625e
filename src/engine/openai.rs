// Raven Agent Engine — OpenAI Responses Client
//
// Single operation: `parse` — a Responses API call with a structured
// output format and optional function tools. Output items are kept as
// raw JSON and accessed defensively; the model sometimes emits item
// shapes we have no interest in (reasoning, refusals) and those must
// never break extraction.

use crate::atoms::error::{EngineError, EngineResult};
use log::error;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Default request timeout when the caller supplies none (milliseconds).
const DEFAULT_TIMEOUT_MS: u64 = 120_000;

// ── Client ─────────────────────────────────────────────────────────────────

pub struct ModelClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ModelClient {
    pub fn new(api_key: &str, base_url: Option<&str>, timeout_ms: Option<u64>) -> Self {
        let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        ModelClient {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url
                .filter(|u| !u.trim().is_empty())
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Issue one Responses API call. `input` is either a string, a message
    /// list, or a list of `function_call_output` items from a tool round.
    pub async fn parse(&self, request: &ParseRequest) -> EngineResult<ModelResponse> {
        let url = format!("{}/responses", self.base_url);

        let mut body = json!({
            "model": request.model,
            "input": request.input,
            "parallel_tool_calls": request.parallel_tool_calls,
            "text": {"format": request.text_format},
        });
        if let Some(instructions) = &request.instructions {
            body["instructions"] = json!(instructions);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(tools) = &request.tools {
            if !tools.is_empty() {
                body["tools"] = json!(tools);
            }
        }
        if let Some(prev) = &request.previous_response_id {
            body["previous_response_id"] = json!(prev);
        }

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let err = parse_error_body(status.as_u16(), &body_text);
            error!("[openai] Responses call failed: {}", err);
            return Err(err);
        }

        Ok(response.json::<ModelResponse>().await?)
    }
}

// ── Request / response shapes ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ParseRequest {
    pub model: String,
    pub instructions: Option<String>,
    pub input: Value,
    pub temperature: Option<f64>,
    /// Function tool definitions, already normalized.
    pub tools: Option<Vec<Value>>,
    pub parallel_tool_calls: bool,
    pub previous_response_id: Option<String>,
    /// `text.format` payload — a json_schema structured-output format.
    pub text_format: Value,
}

/// The Responses API reply, output items kept as raw JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub output: Vec<Value>,
    #[serde(default)]
    pub usage: Option<Value>,
}

/// A pending function call extracted from the output list.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub call_id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

impl ModelResponse {
    /// All `function_call` items, in output order.
    pub fn function_calls(&self) -> Vec<FunctionCall> {
        self.output
            .iter()
            .filter(|item| item["type"].as_str() == Some("function_call"))
            .map(|item| FunctionCall {
                call_id: item["call_id"].as_str().map(str::to_string),
                name: item["name"].as_str().map(str::to_string),
                arguments: item["arguments"].as_str().map(str::to_string),
            })
            .collect()
    }

    /// Aggregated text of all `output_text` parts inside `message` items.
    pub fn output_text(&self) -> String {
        let mut text = String::new();
        for item in &self.output {
            let Some(content) = item["content"].as_array() else {
                continue;
            };
            for part in content {
                if part["type"].as_str() == Some("output_text") {
                    if let Some(t) = part["text"].as_str() {
                        text.push_str(t);
                    }
                }
            }
        }
        text
    }

    /// The first `output_text` block, if any.
    pub fn first_text_block(&self) -> Option<String> {
        for item in &self.output {
            let content = item["content"].as_array()?;
            for part in content {
                if part["type"].as_str() == Some("output_text") {
                    if let Some(t) = part["text"].as_str() {
                        return Some(t.to_string());
                    }
                }
            }
        }
        None
    }

    /// Deserialize the structured output. Returns `None` when the model
    /// produced no text or text that does not match the schema.
    pub fn output_parsed<T: DeserializeOwned>(&self) -> Option<T> {
        let text = self.output_text();
        if text.trim().is_empty() {
            return None;
        }
        serde_json::from_str(&text).ok()
    }
}

/// Count output items by their `type` tag, for debug logging.
pub fn summarize_output_items(output: &[Value]) -> std::collections::BTreeMap<String, usize> {
    let mut counts = std::collections::BTreeMap::new();
    for item in output {
        let label = item["type"].as_str().unwrap_or("unknown").to_string();
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
}

/// Turn a non-2xx Responses API body into a typed provider error.
fn parse_error_body(status: u16, body: &str) -> EngineError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let err = &parsed["error"];
    let code = err["code"]
        .as_str()
        .or_else(|| err["type"].as_str())
        .map(str::to_string);
    let message = err["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| crate::atoms::logging::truncate_chars(body, 200));
    EngineError::provider(status, code, message)
}

// ── Structured output formats ──────────────────────────────────────────────
// Hand-written JSON Schemas for the `text.format` parameter. `strict: true`
// requires every property to be listed in `required` and objects to be
// closed with `additionalProperties: false`.

/// `{ "message": string }` — the assistant's final answer envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantResponse {
    pub message: String,
}

pub fn assistant_response_format() -> Value {
    json!({
        "type": "json_schema",
        "name": "AssistantResponse",
        "strict": true,
        "schema": {
            "type": "object",
            "properties": {
                "message": {"type": "string"}
            },
            "required": ["message"],
            "additionalProperties": false
        }
    })
}

fn step_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "instructions": {"type": "string"},
            "notes": {"type": ["string", "null"]}
        },
        "required": ["title", "instructions", "notes"],
        "additionalProperties": false
    })
}

pub fn skill_definition_format() -> Value {
    json!({
        "type": "json_schema",
        "name": "SkillDefinition",
        "strict": true,
        "schema": {
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "description": {"type": "string"},
                "entrypoint": {"type": "string"},
                "steps": {"type": "array", "items": step_schema()}
            },
            "required": ["name", "description", "entrypoint", "steps"],
            "additionalProperties": false
        }
    })
}

pub fn generalized_skill_format() -> Value {
    json!({
        "type": "json_schema",
        "name": "GeneralizedSkillDefinition",
        "strict": true,
        "schema": {
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "description": {"type": "string"},
                "entrypoint": {"type": "string"},
                "steps": {"type": "array", "items": step_schema()},
                "parameters": {
                    "type": ["array", "null"],
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "description": {"type": "string"},
                            "example": {"type": ["string", "null"]}
                        },
                        "required": ["name", "description", "example"],
                        "additionalProperties": false
                    }
                },
                "preconditions": {"type": ["array", "null"], "items": {"type": "string"}},
                "successCriteria": {"type": ["array", "null"], "items": {"type": "string"}},
                "examples": {
                    "type": ["array", "null"],
                    "items": {
                        "type": "object",
                        "properties": {
                            "userInput": {"type": "string"},
                            "outputSummary": {"type": ["string", "null"]},
                            "notes": {"type": ["string", "null"]},
                            "runId": {"type": ["string", "null"]}
                        },
                        "required": ["userInput", "outputSummary", "notes", "runId"],
                        "additionalProperties": false
                    }
                },
                "generalizationScore": {"type": ["number", "null"]},
                "rationale": {"type": ["string", "null"]}
            },
            "required": [
                "name", "description", "entrypoint", "steps", "parameters",
                "preconditions", "successCriteria", "examples",
                "generalizationScore", "rationale"
            ],
            "additionalProperties": false
        }
    })
}

pub fn skill_fix_format() -> Value {
    json!({
        "type": "json_schema",
        "name": "SkillFix",
        "strict": true,
        "schema": {
            "type": "object",
            "properties": {
                "steps": {"type": "array", "items": step_schema()},
                "rationale": {"type": ["string", "null"]}
            },
            "required": ["steps", "rationale"],
            "additionalProperties": false
        }
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response() -> ModelResponse {
        serde_json::from_value(json!({
            "id": "resp_1",
            "output": [
                {
                    "type": "function_call",
                    "call_id": "call_1",
                    "name": "node",
                    "arguments": "{\"action\":\"create\"}"
                },
                {
                    "type": "message",
                    "role": "assistant",
                    "content": [
                        {"type": "output_text", "text": "{\"message\":\"done\"}"}
                    ]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_function_calls_extraction() {
        let calls = sample_response().function_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name.as_deref(), Some("node"));
        assert_eq!(calls[0].call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_output_text_aggregation() {
        assert_eq!(sample_response().output_text(), "{\"message\":\"done\"}");
    }

    #[test]
    fn test_output_parsed() {
        let parsed: AssistantResponse = sample_response().output_parsed().unwrap();
        assert_eq!(parsed.message, "done");
    }

    #[test]
    fn test_output_parsed_garbage() {
        let resp: ModelResponse = serde_json::from_value(json!({
            "output": [{"type": "message", "content": [
                {"type": "output_text", "text": "not json"}
            ]}]
        }))
        .unwrap();
        assert!(resp.output_parsed::<AssistantResponse>().is_none());
        assert_eq!(resp.first_text_block().as_deref(), Some("not json"));
    }

    #[test]
    fn test_empty_response_is_total() {
        let resp = ModelResponse::default();
        assert!(resp.function_calls().is_empty());
        assert_eq!(resp.output_text(), "");
        assert!(resp.first_text_block().is_none());
        assert!(resp.output_parsed::<AssistantResponse>().is_none());
    }

    #[test]
    fn test_unknown_items_ignored() {
        let resp: ModelResponse = serde_json::from_value(json!({
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [{"type": "output_text", "text": "hi"}]}
            ]
        }))
        .unwrap();
        assert_eq!(resp.output_text(), "hi");
        assert!(resp.function_calls().is_empty());
    }

    #[test]
    fn test_parse_error_body() {
        let err = parse_error_body(
            429,
            r#"{"error":{"code":"rate_limit_exceeded","message":"slow down"}}"#,
        );
        match err {
            EngineError::Provider {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 429);
                assert_eq!(code.as_deref(), Some("rate_limit_exceeded"));
                assert_eq!(message, "slow down");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_error_body_unstructured() {
        let err = parse_error_body(500, "upstream exploded");
        match err {
            EngineError::Provider { status, code, message } => {
                assert_eq!(status, 500);
                assert!(code.is_none());
                assert_eq!(message, "upstream exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_summarize_output_items() {
        let resp = sample_response();
        let counts = summarize_output_items(&resp.output);
        assert_eq!(counts.get("function_call"), Some(&1));
        assert_eq!(counts.get("message"), Some(&1));
    }

    #[test]
    fn test_formats_are_strict_closed_objects() {
        for format in [
            assistant_response_format(),
            skill_definition_format(),
            generalized_skill_format(),
            skill_fix_format(),
        ] {
            assert_eq!(format["type"], "json_schema");
            assert_eq!(format["strict"], true);
            assert_eq!(format["schema"]["additionalProperties"], false);
        }
    }
}
