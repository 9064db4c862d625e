// Raven Agent Engine — MCP Streamable HTTP Transport
//
// JSON-RPC over a streamable HTTP session: every request is a POST to the
// server URL; responses arrive either as a plain JSON body or as an SSE
// stream (`text/event-stream`) that we scan for the matching response id.
// The server-assigned `mcp-session-id` header is captured on the first
// response and replayed on every subsequent request; DELETE terminates
// the session.

use super::types::{JsonRpcRequest, JsonRpcResponse};
use futures::StreamExt;
use log::{debug, warn};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use std::time::Duration;

const SESSION_HEADER: &str = "mcp-session-id";

/// A live streamable HTTP transport to one MCP server.
pub struct StreamableHttpTransport {
    client: reqwest::Client,
    url: String,
    /// Server-assigned session id, set after `initialize`.
    session_id: Mutex<Option<String>>,
}

impl StreamableHttpTransport {
    /// Build the transport. `headers` carries caller-supplied auth and
    /// identity headers (`authorization`, `x-session-id`, `x-user-id`);
    /// `timeout` bounds every request including SSE reads.
    pub fn connect(
        url: &str,
        headers: HeaderMap,
        timeout: Option<Duration>,
    ) -> Result<Self, String> {
        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let client = builder
            .build()
            .map_err(|e| format!("Build MCP HTTP client: {}", e))?;
        Ok(StreamableHttpTransport {
            client,
            url: url.to_string(),
            session_id: Mutex::new(None),
        })
    }

    /// Send a JSON-RPC request and wait for the matching response.
    pub async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, String> {
        let id = request.id;
        let response = self
            .post(serde_json::to_value(&request).map_err(|e| format!("Serialize error: {}", e))?)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("MCP server returned {}: {}", status, body));
        }

        self.capture_session_id(response.headers());

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("text/event-stream") {
            self.read_sse_response(response, id).await
        } else {
            response
                .json::<JsonRpcResponse>()
                .await
                .map_err(|e| format!("Parse MCP response: {}", e))
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), String> {
        let notif = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params.unwrap_or(serde_json::json!({})),
        });
        let response = self.post(notif).await?;
        // Servers answer notifications with 200 or 202 and an empty body.
        if !response.status().is_success() {
            return Err(format!(
                "MCP notification '{}' returned {}",
                method,
                response.status()
            ));
        }
        Ok(())
    }

    /// Terminate the session on the server. Best effort.
    pub async fn close(&self) {
        let mut req = self.client.delete(&self.url);
        if let Some(sid) = self.session_id.lock().clone() {
            req = req.header(SESSION_HEADER, sid);
        }
        match req.send().await {
            Ok(resp) => debug!("[mcp] Session terminated ({})", resp.status()),
            Err(e) => debug!("[mcp] Session terminate failed: {}", e),
        }
    }

    // ── Internals ──────────────────────────────────────────────────────

    async fn post(&self, body: serde_json::Value) -> Result<reqwest::Response, String> {
        let mut req = self
            .client
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(&body);
        if let Some(sid) = self.session_id.lock().clone() {
            req = req.header(SESSION_HEADER, sid);
        }
        req.send()
            .await
            .map_err(|e| format!("MCP request failed: {}", e))
    }

    fn capture_session_id(&self, headers: &HeaderMap<HeaderValue>) {
        if let Some(sid) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
            let mut guard = self.session_id.lock();
            if guard.as_deref() != Some(sid) {
                debug!("[mcp] Session id assigned");
                *guard = Some(sid.to_string());
            }
        }
    }

    /// Read an SSE body until the response with the matching id arrives.
    async fn read_sse_response(
        &self,
        response: reqwest::Response,
        id: u64,
    ) -> Result<JsonRpcResponse, String> {
        let mut byte_stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(|e| format!("SSE read error: {}", e))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();
                if let Some(resp) = parse_sse_line(&line, id) {
                    return Ok(resp);
                }
            }
        }

        Err(format!("SSE stream ended without a response for id={}", id))
    }
}

/// Parse one SSE line; returns the JSON-RPC response when the line carries
/// the frame we are waiting for. Other frames (notifications, requests
/// from the server, responses to other ids) are ignored.
fn parse_sse_line(line: &str, id: u64) -> Option<JsonRpcResponse> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    match serde_json::from_str::<JsonRpcResponse>(data) {
        Ok(resp) if resp.id == Some(id) => Some(resp),
        Ok(_) => None,
        Err(e) => {
            warn!("[mcp] Unparseable SSE frame: {}", e);
            None
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
