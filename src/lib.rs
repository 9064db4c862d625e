// Raven — AI assistant backend.
//
// Two services share this crate: the agent service (one LLM turn with MCP
// tool calling) and the skill engine (retrieve / execute / learn / repair
// per-user skills). `atoms` is the dependency-free foundation, `engine`
// the core logic, `server` the thin axum surface.

pub mod atoms;
pub mod engine;
pub mod server;
