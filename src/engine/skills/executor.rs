// Raven Skill Engine — Skill Executor
//
// Runs a skill's active version step by step, strictly serially: step i+1
// sees a recap of the last three outputs before it. Each step is one
// agent turn over the original input with step-scoped instructions. Any
// step failure aborts the run — no partial success.

use crate::atoms::error::EngineResult;
use crate::atoms::types::{AgentResult, SkillRecord, SkillStep, SkillVersionRecord, StepResult};
use crate::engine::agent_client::AgentCaller;
use crate::engine::skills::SkillRunContext;
use chrono::{SecondsFormat, Utc};
use log::info;
use serde_json::Value;

/// Step-scoped instruction block: skill identity, step position, the
/// step's own instructions and a recap of recent outputs.
pub fn build_step_instructions(
    skill: &SkillRecord,
    step: &SkillStep,
    index: usize,
    total: usize,
    prior_results: &[StepResult],
) -> String {
    let mut lines = vec![
        "You are executing a reusable skill step-by-step.".to_string(),
        format!("Skill: {}", skill.name),
        format!("Step {} of {}: {}", index + 1, total, step.title.trim()),
        "Follow the step instructions precisely and report only the result of this step."
            .to_string(),
    ];
    let instructions = step.instructions.trim();
    if !instructions.is_empty() {
        lines.push(format!("Step instructions: {}", instructions));
    }
    if let Some(notes) = step.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        lines.push(format!("Notes: {}", notes));
    }
    if !prior_results.is_empty() {
        let start = prior_results.len().saturating_sub(3);
        let compact: Vec<String> = prior_results[start..]
            .iter()
            .map(|item| {
                format!(
                    "- {}: {}",
                    item.title.as_deref().unwrap_or("Step"),
                    item.output
                )
            })
            .collect();
        lines.push(format!("Previous step results:\n{}", compact.join("\n")));
    }
    lines.join("\n\n")
}

/// Execute every step of the active version. Returns the per-step results
/// and the last step's agent result (which becomes the final response).
pub async fn execute_skill(
    agent: &dyn AgentCaller,
    ctx: &SkillRunContext,
    default_timeout_ms: u64,
    run_id: &str,
    skill: &SkillRecord,
    version: &SkillVersionRecord,
    input_items: &[Value],
) -> EngineResult<(Vec<StepResult>, AgentResult)> {
    let total = version.steps.len();
    let mut step_results: Vec<StepResult> = Vec::with_capacity(total);
    let mut last_result = AgentResult::default();

    for (index, step) in version.steps.iter().enumerate() {
        info!(
            "[skills] skill_step_start id={} skill={} step={}",
            run_id,
            skill.id,
            index + 1
        );
        let instructions = build_step_instructions(skill, step, index, total, &step_results);
        let payload = ctx.agent_payload(input_items, Some(&instructions), default_timeout_ms);
        let result = agent.run(payload).await?;

        step_results.push(StepResult {
            index,
            title: Some(step.title.clone()),
            output: result.output.clone(),
            trace: result.trace.clone(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        });
        info!(
            "[skills] skill_step_done id={} skill={} step={} outputSize={}",
            run_id,
            skill.id,
            index + 1,
            result.output.len()
        );
        last_result = result;
    }

    Ok((step_results, last_result))
}

// ── Tests ──────────────────────────────────────────────────────────────────
