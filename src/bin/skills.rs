// raven-skills — the skill engine binary.
//
// Retrieves, executes, learns and repairs per-user skills; every model
// turn goes through the agent service. Configuration comes from the
// environment; see `SkillsConfig::from_env`.

use anyhow::Context;
use log::info;
use raven::atoms::config::SkillsConfig;
use raven::engine::agent_client::HttpAgentClient;
use raven::engine::skills::service::SkillsState;
use raven::engine::store::SkillStore;
use raven::server::skills_api;
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = SkillsConfig::from_env();
    let store = SkillStore::open(Path::new(&config.db_path), config.embedding_dim)
        .with_context(|| format!("open skill store at {}", config.db_path))?;
    info!(
        "[skills] Starting on {} (agent at {}, vector={})",
        config.bind,
        config.agent_service_url,
        if store.vector_enabled() { "yes" } else { "no" }
    );

    let agent = HttpAgentClient::new(&config.agent_service_url, config.agent_service_timeout_ms);
    let state = Arc::new(SkillsState {
        store: Arc::new(store),
        config: config.clone(),
        agent: Arc::new(agent),
    });

    let app = skills_api::router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;

    axum::serve(listener, app).await.context("serve skills")?;
    Ok(())
}
