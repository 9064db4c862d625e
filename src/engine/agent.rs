// Raven Agent Engine — Agent Orchestrator
//
// One agent turn: compose instructions, open the tool-server session,
// advertise tools to the model, resolve tool-call rounds until the model
// stops asking, extract the final answer. A failed tool call is reported
// to the model as `isError: true` and the run continues; a failed model
// call ends the run.

use crate::atoms::config::AgentConfig;
use crate::atoms::logging::{estimate_size, mask_secret, safe_log_payload};
use crate::atoms::types::McpConfig;
use crate::engine::context::calculate_context;
use crate::engine::mcp::{result_content, McpClient};
use crate::engine::openai::{
    assistant_response_format, summarize_output_items, AssistantResponse, FunctionCall,
    ModelClient, ModelResponse, ParseRequest,
};
use crate::engine::prompt::load_prompt_text;
use crate::atoms::error::{EngineError, EngineResult};
use log::{debug, info, log_enabled, Level};
use serde_json::{json, Value};
use std::path::Path;
use std::time::{Duration, Instant};
use uuid::Uuid;

// ── Run parameters / outcome ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AgentRunParams {
    pub api_key: String,
    pub model: String,
    /// Raw `/run` input: string or message list.
    pub input: Value,
    pub instructions: Option<String>,
    pub user_name: Option<String>,
    pub temperature: Option<f64>,
    pub openai_base_url: Option<String>,
    pub openai_timeout_ms: Option<u64>,
    /// Accepted on the wire for forward compatibility; the loop does not
    /// consult it. Termination comes from the model producing no calls.
    pub max_turns: Option<u32>,
    pub mcp: Option<McpConfig>,
}

#[derive(Debug, Clone)]
pub struct AgentRunOutcome {
    pub output: String,
    pub last_response_id: Option<String>,
    pub context: Value,
    pub trace: Option<Value>,
}

// ── Entry point ────────────────────────────────────────────────────────────

pub async fn run_agent(
    config: &AgentConfig,
    params: AgentRunParams,
) -> EngineResult<AgentRunOutcome> {
    let run_id = Uuid::new_v4().to_string();
    let started = Instant::now();

    info!(
        "[agent] run_start id={} model={} maxTurns={:?} inputSize={} mcp={}",
        run_id,
        params.model,
        params.max_turns,
        estimate_size(&params.input),
        if mcp_configured(&params.mcp) { "yes" } else { "no" },
    );
    if log_enabled!(Level::Debug) {
        debug!(
            "[agent] run_context id={} apiKey={} baseUrl={:?} timeoutMs={:?} temperature={:?}",
            run_id,
            mask_secret(&params.api_key),
            params.openai_base_url,
            params.openai_timeout_ms,
            params.temperature,
        );
        debug!(
            "[agent] run_input id={} payload={}",
            run_id,
            safe_log_payload(&params.input, config.log_truncate)
        );
    }

    let instructions = build_instructions(
        &load_prompt_text(Path::new(&config.prompt_path)),
        params.user_name.as_deref(),
        params.instructions.as_deref(),
    );

    let model = ModelClient::new(
        &params.api_key,
        params.openai_base_url.as_deref(),
        params.openai_timeout_ms,
    );

    // Tool-server session — a scoped resource. Opened before the first
    // model call, closed on every exit path below (Drop is the backstop).
    let session = match &params.mcp {
        Some(mcp) if mcp_configured(&params.mcp) => {
            let timeout = params
                .openai_timeout_ms
                .map(Duration::from_millis);
            info!(
                "[agent] mcp_config id={} url={:?} sessionId={:?} allowedTools={}",
                run_id,
                mcp.url,
                mcp.session_id,
                mcp.allowed().len(),
            );
            match McpClient::connect(mcp, timeout).await {
                Ok(client) => Some(client),
                Err(e) => return Err(EngineError::tool("mcp", e)),
            }
        }
        _ => None,
    };

    let outcome = drive_run(config, &run_id, &params, &instructions, &model, session.as_ref()).await;

    if let Some(session) = &session {
        session.close().await;
    }

    match &outcome {
        Ok(result) => {
            info!(
                "[agent] run_done id={} ms={} outputSize={} lastResponseId={:?}",
                run_id,
                started.elapsed().as_millis(),
                result.output.len(),
                result.last_response_id,
            );
        }
        Err(e) => {
            info!(
                "[agent] run_error id={} ms={} error={}",
                run_id,
                started.elapsed().as_millis(),
                e
            );
        }
    }

    outcome
}

/// The model-call / tool-resolve loop, separated from session lifecycle.
async fn drive_run(
    config: &AgentConfig,
    run_id: &str,
    params: &AgentRunParams,
    instructions: &str,
    model: &ModelClient,
    session: Option<&McpClient>,
) -> EngineResult<AgentRunOutcome> {
    let allowed = params
        .mcp
        .as_ref()
        .map(|mcp| mcp.allowed())
        .unwrap_or_default();

    let function_tools: Vec<Value> = session
        .map(|session| {
            session
                .tools
                .iter()
                .filter(|tool| !tool.name.trim().is_empty())
                .filter(|tool| allowed.is_empty() || allowed.contains(&tool.name))
                .map(|tool| {
                    json!({
                        "type": "function",
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": normalize_tool_schema(&tool.input_schema),
                        "strict": false,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    if let Some(session) = session {
        info!(
            "[agent] mcp_tools id={} total={} allowed={}",
            run_id,
            session.tools.len(),
            function_tools.len()
        );
    }

    let tools_enabled = !function_tools.is_empty();
    let mut request = ParseRequest {
        model: params.model.clone(),
        instructions: Some(instructions.to_string()),
        input: params.input.clone(),
        temperature: params.temperature,
        tools: tools_enabled.then(|| function_tools.clone()),
        parallel_tool_calls: tools_enabled,
        previous_response_id: None,
        text_format: assistant_response_format(),
    };

    let mut response = model.parse(&request).await?;
    let mut tool_output_chunks: Vec<String> = Vec::new();
    let mut trace_tools: Vec<Value> = Vec::new();

    while let Some(session) = session {
        let calls = prioritize_tool_calls(response.function_calls());
        if calls.is_empty() {
            break;
        }

        let mut outputs: Vec<Value> = Vec::new();
        for call in &calls {
            let (Some(call_id), Some(name)) = (call.call_id.as_deref(), call.name.as_deref())
            else {
                continue;
            };
            let args = parse_tool_args(call.arguments.as_deref());
            let payload = match session.call_tool(name, args.clone()).await {
                Ok(result) => json!({
                    "isError": result.is_error,
                    "content": result_content(&result),
                }),
                // Protocol-level failure: non-fatal, the model decides how
                // to recover.
                Err(message) => json!({
                    "isError": true,
                    "content": message,
                }),
            };
            if log_enabled!(Level::Debug) {
                debug!(
                    "[agent] tool_call id={} name={} args={} error={}",
                    run_id,
                    name,
                    safe_log_payload(&args, config.log_truncate),
                    payload["isError"],
                );
            }
            trace_tools.push(json!({"name": name, "isError": payload["isError"]}));
            let serialized = serde_json::to_string(&payload["content"])?;
            if serialized != "null" {
                tool_output_chunks.push(serialized);
            }
            outputs.push(json!({
                "type": "function_call_output",
                "call_id": call_id,
                "output": serde_json::to_string(&payload)?,
            }));
        }

        if outputs.is_empty() {
            break;
        }

        request.input = Value::Array(outputs);
        request.previous_response_id = response.id.clone();
        response = model.parse(&request).await?;
    }

    let output = extract_final_text(&response);
    if log_enabled!(Level::Debug) {
        debug!(
            "[agent] run_output id={} payload={}",
            run_id,
            safe_log_payload(&Value::String(output.clone()), config.log_truncate)
        );
        debug!(
            "[agent] openai_response id={} usage={} outputTypes={:?}",
            run_id,
            safe_log_payload(&response.usage.clone().unwrap_or(Value::Null), config.log_truncate),
            summarize_output_items(&response.output),
        );
    }

    let mut extra_chunks = tool_output_chunks;
    if !output.is_empty() {
        extra_chunks.push(output.clone());
    }
    let context = calculate_context(
        &params.model,
        config.model_context_tokens,
        Some(instructions),
        &params.input,
        &extra_chunks,
    );

    let trace = if trace_tools.is_empty() {
        None
    } else {
        Some(json!({ "tools": trace_tools }))
    };

    Ok(AgentRunOutcome {
        output,
        last_response_id: response.id.clone(),
        context,
        trace,
    })
}

fn mcp_configured(mcp: &Option<McpConfig>) -> bool {
    mcp.as_ref()
        .and_then(|m| m.url.as_deref())
        .map(|u| !u.trim().is_empty())
        .unwrap_or(false)
}

// ── Instruction assembly ───────────────────────────────────────────────────

/// System prompt ∥ user-name line ∥ caller extras, newline-joined.
pub fn build_instructions(prompt: &str, user_name: Option<&str>, extra: Option<&str>) -> String {
    let mut parts = vec![prompt.to_string()];
    if let Some(name) = user_name.map(str::trim).filter(|n| !n.is_empty()) {
        parts.push(format!("The user name is \"{}\".", name));
    }
    if let Some(extra) = extra.map(str::trim).filter(|e| !e.is_empty()) {
        parts.push(extra.to_string());
    }
    parts.join("\n")
}

// ── Tool-call helpers ──────────────────────────────────────────────────────

/// Parse a function call's argument string. Anything that is not a JSON
/// object becomes an empty object — the call still runs.
pub fn parse_tool_args(raw: Option<&str>) -> Value {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return json!({});
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if value.is_object() => value,
        _ => json!({}),
    }
}

/// Edges that create relations must run after the calls that mint the ids
/// they reference, so `edge` + `action=="create"` is deferred.
fn tool_call_priority(call: &FunctionCall) -> i32 {
    if call.name.as_deref() == Some("edge") {
        let args = parse_tool_args(call.arguments.as_deref());
        if args["action"].as_str() == Some("create") {
            return 10;
        }
    }
    0
}

/// Stable sort by priority: equal-priority calls keep their input order.
pub fn prioritize_tool_calls(calls: Vec<FunctionCall>) -> Vec<FunctionCall> {
    let mut indexed: Vec<(usize, FunctionCall)> = calls.into_iter().enumerate().collect();
    indexed.sort_by_key(|(index, call)| (tool_call_priority(call), *index));
    indexed.into_iter().map(|(_, call)| call).collect()
}

// ── Tool schema normalisation ──────────────────────────────────────────────

/// Close an MCP tool schema for the Responses API: the model rejects open
/// schemas, so every object gets `additionalProperties: false` and every
/// property a type-carrying key. Idempotent.
pub fn normalize_tool_schema(schema: &Value) -> Value {
    let mut normalized = match schema {
        Value::Object(map) => Value::Object(map.clone()),
        _ => json!({}),
    };
    let obj = normalized.as_object_mut().expect("object by construction");

    obj.insert("type".into(), json!("object"));

    if !obj.get("properties").map(Value::is_object).unwrap_or(false) {
        obj.insert("properties".into(), json!({}));
    }

    if let Some(props) = obj.get_mut("properties").and_then(Value::as_object_mut) {
        let keys: Vec<String> = props.keys().cloned().collect();
        for key in keys {
            let prop = props.get_mut(&key).expect("key just listed");
            if !prop.is_object() {
                *prop = json!({"type": "string"});
                continue;
            }
            let prop_obj = prop.as_object_mut().expect("checked object");
            let has_type_key = ["type", "anyOf", "oneOf", "allOf"]
                .iter()
                .any(|k| prop_obj.contains_key(*k));
            if !has_type_key {
                prop_obj.insert("type".into(), json!("object"));
            }
            if prop_obj.get("type").and_then(Value::as_str) == Some("object") {
                if !prop_obj
                    .get("properties")
                    .map(Value::is_object)
                    .unwrap_or(false)
                {
                    prop_obj.insert("properties".into(), json!({}));
                }
                prop_obj.insert("additionalProperties".into(), json!(false));
            }
        }
    }

    obj.insert("additionalProperties".into(), json!(false));
    normalized
}

// ── Final-text extraction ──────────────────────────────────────────────────

/// Total over any response: parsed message → aggregated output_text →
/// first output_text block → empty. Always trimmed.
pub fn extract_final_text(response: &ModelResponse) -> String {
    if let Some(parsed) = response.output_parsed::<AssistantResponse>() {
        if !parsed.message.trim().is_empty() {
            return parsed.message.trim().to_string();
        }
    }
    let text = response.output_text();
    if !text.trim().is_empty() {
        return text.trim().to_string();
    }
    response
        .first_text_block()
        .map(|t| t.trim().to_string())
        .unwrap_or_default()
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, arguments: &str) -> FunctionCall {
        FunctionCall {
            call_id: Some(format!("call_{}", name)),
            name: Some(name.to_string()),
            arguments: Some(arguments.to_string()),
        }
    }

    #[test]
    fn test_build_instructions_all_parts() {
        let text = build_instructions("System.", Some(" Ada "), Some("Extra."));
        assert_eq!(text, "System.\nThe user name is \"Ada\".\nExtra.");
    }

    #[test]
    fn test_build_instructions_blank_parts_skipped() {
        let text = build_instructions("System.", Some("   "), None);
        assert_eq!(text, "System.");
    }

    #[test]
    fn test_parse_tool_args() {
        assert_eq!(parse_tool_args(Some(r#"{"a":1}"#)), json!({"a":1}));
        assert_eq!(parse_tool_args(Some("not json")), json!({}));
        assert_eq!(parse_tool_args(Some("[1,2]")), json!({}));
        assert_eq!(parse_tool_args(Some("")), json!({}));
        assert_eq!(parse_tool_args(None), json!({}));
    }

    #[test]
    fn test_prioritize_edge_create_last() {
        // S1: edge-create is deferred behind node-create.
        let calls = vec![
            call("edge", r#"{"action":"create"}"#),
            call("node", r#"{"action":"create"}"#),
        ];
        let ordered = prioritize_tool_calls(calls);
        assert_eq!(ordered[0].name.as_deref(), Some("node"));
        assert_eq!(ordered[1].name.as_deref(), Some("edge"));
    }

    #[test]
    fn test_prioritize_is_stable() {
        let calls = vec![
            call("a", "{}"),
            call("edge", r#"{"action":"create"}"#),
            call("b", "{}"),
            call("edge", r#"{"action":"update"}"#),
            call("c", "{}"),
        ];
        let ordered = prioritize_tool_calls(calls);
        let names: Vec<_> = ordered.iter().map(|c| c.name.as_deref().unwrap()).collect();
        // Equal-priority calls keep input order; only edge-create moves.
        assert_eq!(names, vec!["a", "b", "edge", "c", "edge"]);
        assert_eq!(
            ordered[4].arguments.as_deref(),
            Some(r#"{"action":"create"}"#)
        );
    }

    #[test]
    fn test_normalize_schema_closure() {
        let schema = json!({
            "properties": {
                "title": {"type": "string"},
                "weird": 42,
                "untyped": {"description": "no type"},
                "nested": {"type": "object"},
            }
        });
        let normalized = normalize_tool_schema(&schema);
        assert_eq!(normalized["type"], "object");
        assert_eq!(normalized["additionalProperties"], false);
        assert_eq!(normalized["properties"]["weird"]["type"], "string");
        assert_eq!(normalized["properties"]["untyped"]["type"], "object");
        assert_eq!(normalized["properties"]["nested"]["additionalProperties"], false);
        assert!(normalized["properties"]["nested"]["properties"].is_object());
    }

    #[test]
    fn test_normalize_schema_idempotent() {
        let inputs = [
            json!(null),
            json!("not a schema"),
            json!({"type": "string"}),
            json!({
                "type": "object",
                "properties": {
                    "x": {"anyOf": [{"type": "string"}, {"type": "number"}]},
                    "y": {"type": "object", "properties": {"z": {"type": "number"}}},
                }
            }),
        ];
        for input in inputs {
            let once = normalize_tool_schema(&input);
            let twice = normalize_tool_schema(&once);
            assert_eq!(once, twice);
            assert_eq!(once["type"], "object");
            assert_eq!(once["additionalProperties"], false);
        }
    }

    #[test]
    fn test_normalize_schema_keeps_any_of() {
        let schema = json!({
            "properties": {"x": {"anyOf": [{"type": "string"}]}}
        });
        let normalized = normalize_tool_schema(&schema);
        assert!(normalized["properties"]["x"]["anyOf"].is_array());
        assert!(normalized["properties"]["x"].get("type").is_none());
    }

    #[test]
    fn test_extract_final_text_prefers_parsed() {
        let response: ModelResponse = serde_json::from_value(json!({
            "output": [{"type": "message", "content": [
                {"type": "output_text", "text": "{\"message\":\"  hi  \"}"}
            ]}]
        }))
        .unwrap();
        assert_eq!(extract_final_text(&response), "hi");
    }

    #[test]
    fn test_extract_final_text_plain() {
        let response: ModelResponse = serde_json::from_value(json!({
            "output": [{"type": "message", "content": [
                {"type": "output_text", "text": "  plain answer "}
            ]}]
        }))
        .unwrap();
        assert_eq!(extract_final_text(&response), "plain answer");
    }

    #[test]
    fn test_extract_final_text_empty_response() {
        assert_eq!(extract_final_text(&ModelResponse::default()), "");
    }

    #[test]
    fn test_mcp_configured() {
        assert!(!mcp_configured(&None));
        assert!(!mcp_configured(&Some(McpConfig::default())));
        assert!(!mcp_configured(&Some(McpConfig {
            url: Some("   ".into()),
            ..Default::default()
        })));
        assert!(mcp_configured(&Some(McpConfig {
            url: Some("http://tools:9000/mcp".into()),
            ..Default::default()
        })));
    }
}
