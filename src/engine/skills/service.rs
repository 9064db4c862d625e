// Raven Skill Engine — Run Service
//
// The `/run` flow: look up a matching skill for the user's query and run
// it step-by-step, or fall back to one base agent turn and hand the
// solved run to the async learner. The run row is persisted either way;
// in base mode its skill refs stay null until the learner patches them.

use crate::atoms::config::SkillsConfig;
use crate::atoms::error::EngineResult;
use crate::atoms::types::{AgentResult, InputPayload, StepResult};
use crate::engine::agent_client::AgentCaller;
use crate::engine::embedding::EmbeddingClient;
use crate::engine::skills::executor::execute_skill;
use crate::engine::skills::learner::{spawn_learner, LearnRequest};
use crate::engine::skills::normalize::clamp_text;
use crate::engine::skills::retriever::{retrieve_skill, RetrievalOutcome};
use crate::engine::skills::SkillRunContext;
use crate::engine::store::{NewSkillRun, SkillStore};
use crate::atoms::types::extract_last_user_message;
use log::{info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Shared state of the skill engine service.
pub struct SkillsState {
    pub store: Arc<SkillStore>,
    pub config: SkillsConfig,
    pub agent: Arc<dyn AgentCaller>,
}

/// The `skill` block attached to every `/run` response.
#[derive(Debug, Clone)]
pub struct SkillRunInfo {
    pub run_id: String,
    pub skill_id: Option<String>,
    pub skill_version_id: Option<String>,
    pub found: bool,
    pub match_distance: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct SkillRunOutcome {
    pub output: String,
    pub last_response_id: Option<String>,
    pub context: Option<Value>,
    pub trace: Option<Value>,
    pub skill: SkillRunInfo,
}

pub async fn run_skill_request(
    state: &SkillsState,
    ctx: SkillRunContext,
    input: &InputPayload,
) -> EngineResult<SkillRunOutcome> {
    let run_id = Uuid::new_v4().to_string();
    let started = Instant::now();
    let input_items = input.normalize_items();
    let user_query = clamp_text(&extract_last_user_message(&input_items), 2000);

    info!(
        "[skills] run_start id={} user={} thread={} session={} inputSize={}",
        run_id,
        ctx.user_id.as_deref().unwrap_or("unknown"),
        ctx.thread_id.as_deref().unwrap_or("none"),
        ctx.session_id.as_deref().unwrap_or("none"),
        user_query.len(),
    );

    // ── Retrieval ──────────────────────────────────────────────────────
    let retrieval = match ctx.user_id.as_deref() {
        Some(user_id) if !user_query.is_empty() => {
            let embedder = EmbeddingClient::new(
                &ctx.api_key,
                ctx.openai_base_url
                    .as_deref()
                    .unwrap_or(&state.config.openai_base_url),
                &state.config.embedding_model,
                state.config.openai_timeout_ms,
            );
            retrieve_skill(
                &state.store,
                &embedder,
                &state.config,
                &run_id,
                user_id,
                &user_query,
            )
            .await?
        }
        _ => {
            info!(
                "[skills] skill_search_skipped id={} reason={}",
                run_id,
                if ctx.user_id.is_none() { "missing_user" } else { "empty_query" }
            );
            RetrievalOutcome::default()
        }
    };
    let match_distance = retrieval.distance;

    // ── Skill mode ─────────────────────────────────────────────────────
    if let Some(skill) = retrieval.skill {
        let version = match skill.active_version_id.as_deref() {
            Some(version_id) => {
                let version = state.store.load_version(version_id)?;
                if version.is_none() {
                    warn!(
                        "[skills] skill_version_missing id={} skill={} version={}",
                        run_id, skill.id, version_id
                    );
                }
                version
            }
            None => None,
        };

        if let Some(version) = version.filter(|v| !v.steps.is_empty()) {
            let (step_results, last_result) = execute_skill(
                state.agent.as_ref(),
                &ctx,
                state.config.agent_service_timeout_ms,
                &run_id,
                &skill,
                &version,
                &input_items,
            )
            .await?;

            if let Some(user_id) = ctx.user_id.as_deref() {
                persist_run(
                    state,
                    &run_id,
                    Some(&skill.id),
                    Some(&version.id),
                    user_id,
                    &ctx,
                    &user_query,
                    &step_results,
                );
                info!(
                    "[skills] skill_run_saved id={} skill={} version={} steps={}",
                    run_id,
                    skill.id,
                    version.id,
                    step_results.len()
                );
            }

            info!(
                "[skills] run_done id={} mode=skill ms={}",
                run_id,
                started.elapsed().as_millis()
            );
            return Ok(SkillRunOutcome {
                output: last_result.output,
                last_response_id: last_result.last_response_id,
                context: last_result.context,
                trace: last_result.trace,
                skill: SkillRunInfo {
                    run_id,
                    skill_id: Some(skill.id),
                    skill_version_id: Some(version.id),
                    found: true,
                    match_distance,
                },
            });
        }
    }

    // ── Base mode ──────────────────────────────────────────────────────
    let payload = ctx.agent_payload(&input_items, None, state.config.agent_service_timeout_ms);
    let base_result: AgentResult = state.agent.run(payload).await?;
    info!(
        "[skills] base_solution_done id={} outputSize={}",
        run_id,
        base_result.output.len()
    );

    if let Some(user_id) = ctx.user_id.as_deref() {
        persist_run(state, &run_id, None, None, user_id, &ctx, &user_query, &[]);
        info!("[skills] skill_run_saved id={} skill=none version=none steps=0", run_id);
    }

    // The response is not blocked on learning; a crash between the insert
    // above and learner completion just leaves the run unlinked.
    if let (Some(user_id), false) = (ctx.user_id.as_deref(), user_query.is_empty()) {
        spawn_learner(
            Arc::clone(&state.store),
            state.config.clone(),
            LearnRequest {
                run_id: run_id.clone(),
                user_id: user_id.to_string(),
                api_key: ctx.api_key.clone(),
                model: ctx.model.clone(),
                openai_base_url: ctx.openai_base_url.clone(),
                user_query: user_query.clone(),
                base_output: base_result.output.clone(),
                trace: base_result.trace.clone(),
            },
        );
    }

    info!(
        "[skills] run_done id={} mode=base ms={}",
        run_id,
        started.elapsed().as_millis()
    );
    Ok(SkillRunOutcome {
        output: base_result.output,
        last_response_id: base_result.last_response_id,
        context: base_result.context,
        trace: base_result.trace,
        skill: SkillRunInfo {
            run_id,
            skill_id: None,
            skill_version_id: None,
            found: false,
            match_distance,
        },
    })
}

#[allow(clippy::too_many_arguments)]
fn persist_run(
    state: &SkillsState,
    run_id: &str,
    skill_id: Option<&str>,
    version_id: Option<&str>,
    user_id: &str,
    ctx: &SkillRunContext,
    user_query: &str,
    step_results: &[StepResult],
) {
    let run = NewSkillRun {
        run_id,
        skill_id,
        skill_version_id: version_id,
        user_id,
        thread_id: ctx.thread_id.as_deref(),
        session_id: ctx.session_id.as_deref(),
        input: if user_query.is_empty() { None } else { Some(user_query) },
        step_results,
    };
    if let Err(e) = state.store.insert_run(&run) {
        warn!("[skills] skill_run_save_failed id={} error={}", run_id, e);
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
