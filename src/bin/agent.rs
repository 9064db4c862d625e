// raven-agent — the agent service binary.
//
// One LLM conversation turn per request, with MCP tool calling against a
// remote tool server. Configuration comes from the environment; see
// `AgentConfig::from_env`.

use anyhow::Context;
use log::info;
use raven::atoms::config::AgentConfig;
use raven::server::agent_api;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Arc::new(AgentConfig::from_env());
    info!(
        "[agent] Starting on {} (prompt at {})",
        config.bind, config.prompt_path
    );

    let app = agent_api::router(Arc::clone(&config));
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;

    axum::serve(listener, app).await.context("serve agent")?;
    Ok(())
}
