// Raven Skill Engine — Feedback Repair
//
// Negative feedback on a skill-linked run asks the model for a
// replacement step list; the result becomes a new version and the active
// pointer moves to it. Every soft failure along the way downgrades to
// `updated: false` — only a missing run is a caller-visible error.

use crate::atoms::config::{SkillsConfig, MAX_STEPS};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Rating, SkillDefinition, SkillFix, SkillRecord, StepResult};
use crate::engine::openai::{skill_fix_format, ModelClient, ParseRequest};
use crate::engine::skills::learner::format_steps_for_prompt;
use crate::engine::skills::normalize::{clamp_text, normalize_skill_definition};
use crate::engine::store::SkillStore;
use log::{info, warn};
use serde_json::Value;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct FeedbackParams {
    pub run_id: String,
    pub user_id: String,
    pub api_key: String,
    pub model: String,
    pub openai_base_url: Option<String>,
    pub rating: Rating,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FeedbackOutcome {
    pub run_id: String,
    pub updated: bool,
    pub skill_id: Option<String>,
    pub skill_version_id: Option<String>,
    pub new_version_id: Option<String>,
}

impl FeedbackOutcome {
    fn unchanged(run_id: &str, skill_id: Option<String>, version_id: Option<String>) -> Self {
        FeedbackOutcome {
            run_id: run_id.to_string(),
            updated: false,
            skill_id,
            skill_version_id: version_id,
            new_version_id: None,
        }
    }
}

/// `/feedback` flow: persist the rating, then on negative feedback for a
/// skill-linked run, rewrite the step list and promote a new version.
pub async fn handle_feedback(
    store: &SkillStore,
    config: &SkillsConfig,
    params: FeedbackParams,
) -> EngineResult<FeedbackOutcome> {
    let feedback_id = Uuid::new_v4().to_string();
    let started = Instant::now();
    let feedback_text = {
        let clamped = clamp_text(params.feedback.as_deref().unwrap_or(""), 2000);
        if clamped.is_empty() {
            None
        } else {
            Some(clamped)
        }
    };
    info!(
        "[skills] feedback_start id={} run={} user={} rating={}",
        feedback_id,
        params.run_id,
        params.user_id,
        params.rating.as_str()
    );

    let Some(run) = store.get_run(&params.run_id, &params.user_id)? else {
        warn!("[skills] feedback_missing id={} run={}", feedback_id, params.run_id);
        return Err(EngineError::NotFound("skill_run_not_found".into()));
    };

    store.update_run_feedback(
        &params.run_id,
        &params.user_id,
        params.rating,
        feedback_text.as_deref(),
    )?;

    let (skill_id, version_id) = (run.skill_id.clone(), run.skill_version_id.clone());
    if params.rating != Rating::Negative || skill_id.is_none() || version_id.is_none() {
        info!(
            "[skills] feedback_skip id={} run={} reason={}",
            feedback_id,
            params.run_id,
            if params.rating != Rating::Negative { "rating" } else { "missing_skill" }
        );
        return Ok(FeedbackOutcome::unchanged(&params.run_id, skill_id, version_id));
    }
    let (skill_id, version_id) = (skill_id.unwrap(), version_id.unwrap());

    let Some(skill) = store.load_skill(&skill_id, &params.user_id)? else {
        warn!("[skills] feedback_skill_missing id={} skill={}", feedback_id, skill_id);
        return Ok(FeedbackOutcome::unchanged(
            &params.run_id,
            Some(skill_id),
            Some(version_id),
        ));
    };
    let Some(version) = store.load_version(&version_id)? else {
        warn!("[skills] feedback_version_missing id={} version={}", feedback_id, version_id);
        return Ok(FeedbackOutcome::unchanged(
            &params.run_id,
            Some(skill_id),
            Some(version_id),
        ));
    };

    info!(
        "[skills] feedback_fix_start id={} skill={} version={}",
        feedback_id, skill_id, version_id
    );
    let model = ModelClient::new(
        &params.api_key,
        Some(
            params
                .openai_base_url
                .as_deref()
                .unwrap_or(&config.openai_base_url),
        ),
        Some(config.openai_timeout_ms),
    );
    let fix = fix_skill_steps(
        &model,
        &params.model,
        &skill,
        &version.steps,
        &run.step_results,
        feedback_text.as_deref().unwrap_or("Negative feedback"),
    )
    .await;

    let Some(fix) = fix else {
        warn!("[skills] feedback_fix_failed id={} run={}", feedback_id, params.run_id);
        return Ok(FeedbackOutcome::unchanged(
            &params.run_id,
            Some(skill_id),
            Some(version_id),
        ));
    };

    let normalized = normalize_skill_definition(
        &SkillDefinition {
            name: skill.name.clone(),
            description: skill.description.clone().unwrap_or_default(),
            entrypoint: skill.entrypoint_text.clone(),
            steps: fix.steps,
        },
        &skill.entrypoint_text,
    );
    let new_version_id = store.save_fix(&skill_id, &normalized.steps)?;
    info!(
        "[skills] feedback_updated id={} skill={} version={} ms={}",
        feedback_id,
        skill_id,
        new_version_id,
        started.elapsed().as_millis()
    );

    Ok(FeedbackOutcome {
        run_id: params.run_id,
        updated: true,
        skill_id: Some(skill_id),
        skill_version_id: Some(version_id),
        new_version_id: Some(new_version_id),
    })
}

/// Ask the model for a replacement step list.
async fn fix_skill_steps(
    model: &ModelClient,
    model_name: &str,
    skill: &SkillRecord,
    current_steps: &[crate::atoms::types::SkillStep],
    step_results: &[StepResult],
    feedback: &str,
) -> Option<SkillFix> {
    let prompt = [
        "You are improving a reusable skill based on human feedback.".to_string(),
        "Return the updated steps in English only (translate if needed).".to_string(),
        "Return a JSON object with updated steps only.".to_string(),
        "Each step must include title and instructions.".to_string(),
        format!("Limit steps to {}.", MAX_STEPS),
    ];
    let results_block = format_step_results_for_prompt(step_results);
    let input_parts = vec![
        format!("Skill name: {}", skill.name),
        format!("Skill description: {}", skill.description.as_deref().unwrap_or("")),
        format!("Entrypoint: {}", skill.entrypoint_text),
        format!("Current steps:\n{}", format_steps_for_prompt(current_steps)),
        format!(
            "Step results from last run:\n{}",
            if results_block.is_empty() { "No step results.".to_string() } else { results_block }
        ),
        format!("Human feedback:\n{}", clamp_text(feedback, 2000)),
    ];

    let response = model
        .parse(&ParseRequest {
            model: model_name.to_string(),
            instructions: Some(prompt.join("\n")),
            input: Value::String(input_parts.join("\n\n")),
            temperature: Some(0.2),
            tools: None,
            parallel_tool_calls: false,
            previous_response_id: None,
            text_format: skill_fix_format(),
        })
        .await;
    match response {
        Ok(response) => response.output_parsed::<SkillFix>(),
        Err(e) => {
            warn!("[skills] skill_fix_failed error={}", e);
            None
        }
    }
}

/// Bulleted `- title: output` lines of a run's step results, outputs
/// capped, empty outputs skipped.
pub fn format_step_results_for_prompt(results: &[StepResult]) -> String {
    results
        .iter()
        .filter_map(|item| {
            let output = item.output.trim();
            if output.is_empty() {
                return None;
            }
            Some(format!(
                "- {}: {}",
                item.title.as_deref().unwrap_or("Step").trim(),
                clamp_text(output, 800)
            ))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::NewSkillRun;

    fn params(run_id: &str, rating: Rating) -> FeedbackParams {
        FeedbackParams {
            run_id: run_id.into(),
            user_id: "u1".into(),
            api_key: "sk-x".into(),
            model: "gpt-5.2".into(),
            openai_base_url: None,
            rating,
            feedback: Some("include citations".into()),
        }
    }

    #[test]
    fn test_format_step_results() {
        let results = vec![
            StepResult {
                index: 0,
                title: Some("Fetch".into()),
                output: "got it".into(),
                trace: None,
                timestamp: String::new(),
            },
            StepResult {
                index: 1,
                title: None,
                output: "  ".into(),
                trace: None,
                timestamp: String::new(),
            },
        ];
        assert_eq!(format_step_results_for_prompt(&results), "- Fetch: got it");
    }

    #[test]
    fn test_format_step_results_caps_output() {
        let results = vec![StepResult {
            index: 0,
            title: Some("Long".into()),
            output: "x".repeat(2000),
            trace: None,
            timestamp: String::new(),
        }];
        let line = format_step_results_for_prompt(&results);
        assert!(line.chars().count() <= 800 + "- Long: ".len());
    }

    #[tokio::test]
    async fn test_feedback_missing_run_is_not_found() {
        let store = SkillStore::open_in_memory(4).unwrap();
        let err = handle_feedback(&store, &SkillsConfig::default(), params("nope", Rating::Negative))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(ref m) if m == "skill_run_not_found"));
    }

    #[tokio::test]
    async fn test_feedback_positive_persists_and_skips() {
        let store = SkillStore::open_in_memory(4).unwrap();
        store
            .insert_run(&NewSkillRun {
                run_id: "r1",
                skill_id: None,
                skill_version_id: None,
                user_id: "u1",
                thread_id: None,
                session_id: None,
                input: Some("q"),
                step_results: &[],
            })
            .unwrap();
        let outcome = handle_feedback(&store, &SkillsConfig::default(), params("r1", Rating::Positive))
            .await
            .unwrap();
        assert!(!outcome.updated);
        assert!(outcome.new_version_id.is_none());

        let rating: Option<String> = {
            let conn = store.conn.lock();
            conn.query_row(
                "SELECT feedback_rating FROM assistant_skill_runs WHERE id = 'r1'",
                [],
                |row| row.get(0),
            )
            .unwrap()
        };
        assert_eq!(rating.as_deref(), Some("positive"));
    }

    #[tokio::test]
    async fn test_feedback_negative_without_skill_refs_skips() {
        let store = SkillStore::open_in_memory(4).unwrap();
        store
            .insert_run(&NewSkillRun {
                run_id: "r2",
                skill_id: None,
                skill_version_id: None,
                user_id: "u1",
                thread_id: None,
                session_id: None,
                input: Some("q"),
                step_results: &[],
            })
            .unwrap();
        let outcome = handle_feedback(&store, &SkillsConfig::default(), params("r2", Rating::Negative))
            .await
            .unwrap();
        assert!(!outcome.updated);
        assert!(outcome.skill_id.is_none());
    }
}
