// Raven Agent Engine — MCP (Model Context Protocol)
//
// Tool adapter: a scoped streamable HTTP session against the remote tool
// server. `client` owns the handshake and tools/list+call, `transport`
// the JSON-RPC framing, `types` the protocol shapes.

pub mod client;
pub mod transport;
pub mod types;

pub use client::{result_content, McpClient};
pub use types::{McpToolDef, ToolCallResult};
