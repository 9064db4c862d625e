// Raven Agent Engine — MCP Client
//
// Manages one streamable HTTP session against the remote tool server:
// initialize handshake, tools/list, tools/call, session teardown.
// The session is a scoped resource — `close()` must run on every exit
// path, and Drop performs a detached best-effort close as a backstop.

use super::transport::StreamableHttpTransport;
use super::types::*;
use crate::atoms::types::McpConfig;
use log::{info, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// MCP protocol version we advertise.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// A connected MCP client for a single tool-server session.
pub struct McpClient {
    transport: Arc<StreamableHttpTransport>,
    /// Monotonically increasing request ID.
    next_id: AtomicU64,
    /// Server identity from the initialize response.
    pub server_info: Option<McpServerInfo>,
    /// Tools fetched at connect time.
    pub tools: Vec<McpToolDef>,
    closed: AtomicBool,
}

impl McpClient {
    /// Open the session: connect the transport, perform the initialize
    /// handshake and fetch the tool list.
    pub async fn connect(config: &McpConfig, timeout: Option<Duration>) -> Result<Self, String> {
        let url = config
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or("MCP transport requires a URL")?;

        info!("[mcp] Connecting to tool server at {}", url);

        let headers = build_headers(config)?;
        let transport = StreamableHttpTransport::connect(url, headers, timeout)?;

        let mut client = McpClient {
            transport: Arc::new(transport),
            next_id: AtomicU64::new(1),
            server_info: None,
            tools: vec![],
            closed: AtomicBool::new(false),
        };

        client.initialize().await?;
        client.refresh_tools().await?;

        Ok(client)
    }

    /// MCP `initialize` handshake.
    async fn initialize(&mut self) -> Result<(), String> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: McpClientCapabilities::default(),
            client_info: McpClientInfo {
                name: "Raven".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };

        let req = JsonRpcRequest::new(
            self.next_id(),
            "initialize",
            Some(serde_json::to_value(&params).map_err(|e| e.to_string())?),
        );

        let resp = self.transport.send_request(req).await?;

        if let Some(err) = resp.error {
            return Err(format!(
                "MCP initialize failed: {} (code={})",
                err.message, err.code
            ));
        }

        if let Some(result) = resp.result {
            let init: InitializeResult =
                serde_json::from_value(result).map_err(|e| format!("Parse init result: {}", e))?;
            info!(
                "[mcp] Tool server initialized (protocol={})",
                init.protocol_version
            );
            self.server_info = init.server_info;
        }

        // Send `initialized` notification (required by spec)
        self.transport
            .send_notification("notifications/initialized", None)
            .await?;

        Ok(())
    }

    /// Fetch (or refresh) the tool list from the server.
    pub async fn refresh_tools(&mut self) -> Result<(), String> {
        let req = JsonRpcRequest::new(self.next_id(), "tools/list", None);
        let resp = self.transport.send_request(req).await?;

        if let Some(err) = resp.error {
            // Server may not support tools — that's OK
            if err.code == -32601 {
                info!("[mcp] Tool server does not expose tools");
                self.tools = vec![];
                return Ok(());
            }
            return Err(format!(
                "tools/list failed: {} (code={})",
                err.message, err.code
            ));
        }

        if let Some(result) = resp.result {
            let list: ToolsListResult =
                serde_json::from_value(result).map_err(|e| format!("Parse tools/list: {}", e))?;
            info!("[mcp] Tool server exposes {} tools", list.tools.len());
            self.tools = list.tools;
        } else {
            self.tools = vec![];
        }

        Ok(())
    }

    /// Call a tool. Protocol-level failures come back as `Err`; tool-level
    /// failures are an `is_error` result the caller forwards to the model.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, String> {
        let params = ToolCallParams {
            name: tool_name.into(),
            arguments,
        };

        let req = JsonRpcRequest::new(
            self.next_id(),
            "tools/call",
            Some(serde_json::to_value(&params).map_err(|e| e.to_string())?),
        );

        let resp = self.transport.send_request(req).await?;

        if let Some(err) = resp.error {
            return Err(format!(
                "tools/call '{}' failed: {} (code={})",
                tool_name, err.message, err.code
            ));
        }

        let result_val = resp
            .result
            .ok_or_else(|| format!("tools/call '{}': empty result", tool_name))?;

        serde_json::from_value(result_val).map_err(|e| format!("Parse tools/call result: {}", e))
    }

    /// Terminate the session. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("[mcp] Closing tool-server session");
        self.transport.close().await;
    }

    /// Get the next request ID.
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        // Best-effort detached close — the async close() should run first.
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let transport = Arc::clone(&self.transport);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                transport.close().await;
            });
        } else {
            warn!("[mcp] Dropped outside a runtime; session left to server timeout");
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────────

/// Assemble the injected headers for the tool-server session.
fn build_headers(config: &McpConfig) -> Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();
    if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| format!("Invalid token header: {}", e))?;
        headers.insert(AUTHORIZATION, value);
    }
    if let Some(session_id) = config.session_id.as_deref().filter(|s| !s.is_empty()) {
        headers.insert(
            "x-session-id",
            HeaderValue::from_str(session_id).map_err(|e| format!("Invalid session id: {}", e))?,
        );
    }
    if let Some(user_id) = config.user_id.as_deref().filter(|u| !u.is_empty()) {
        headers.insert(
            "x-user-id",
            HeaderValue::from_str(user_id).map_err(|e| format!("Invalid user id: {}", e))?,
        );
    }
    Ok(headers)
}

/// Serialise a tool result for the model: prefer `structuredContent`,
/// fall back to the content-block array, else JSON null.
pub fn result_content(result: &ToolCallResult) -> Value {
    if let Some(structured) = &result.structured_content {
        return structured.clone();
    }
    if !result.content.is_empty() {
        return serde_json::to_value(&result.content).unwrap_or(Value::Null);
    }
    Value::Null
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_content_prefers_structured() {
        let result = ToolCallResult {
            content: vec![McpContent::Text {
                text: "ignored".into(),
            }],
            structured_content: Some(serde_json::json!({"ok": true})),
            is_error: false,
        };
        assert_eq!(result_content(&result), serde_json::json!({"ok": true}));
    }

    #[test]
    fn test_result_content_blocks() {
        let result = ToolCallResult {
            content: vec![McpContent::Text {
                text: "Hello".into(),
            }],
            structured_content: None,
            is_error: false,
        };
        let value = result_content(&result);
        assert_eq!(value[0]["type"], "text");
        assert_eq!(value[0]["text"], "Hello");
    }

    #[test]
    fn test_result_content_empty() {
        let result = ToolCallResult {
            content: vec![],
            structured_content: None,
            is_error: true,
        };
        assert_eq!(result_content(&result), Value::Null);
    }

    #[test]
    fn test_build_headers() {
        let config = McpConfig {
            url: Some("http://tools:9000/mcp".into()),
            token: Some("secret".into()),
            session_id: Some("sess-1".into()),
            user_id: Some("user-1".into()),
            allowed_tools: None,
        };
        let headers = build_headers(&config).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer secret");
        assert_eq!(headers.get("x-session-id").unwrap(), "sess-1");
        assert_eq!(headers.get("x-user-id").unwrap(), "user-1");
    }

    #[test]
    fn test_build_headers_empty() {
        let headers = build_headers(&McpConfig::default()).unwrap();
        assert!(headers.is_empty());
    }
}
