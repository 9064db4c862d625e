// Raven Skill Engine — Skill Learner
//
// Fire-and-forget pipeline that turns a solved base run into a catalogue
// entry: decompose the solution into steps, generalise with parameters
// and placeholders, gate on the generalization score, embed, then merge
// into the nearest existing skill or insert a new one and link the run.
//
// The learner is detached from the originating request: it survives the
// client disconnecting, and every failure is logged and swallowed — the
// response the user already received is never affected.

use crate::atoms::config::{
    SkillsConfig, MAX_PRECONDITIONS, MAX_STEPS, MAX_SUCCESS_CRITERIA,
};
use crate::atoms::error::EngineResult;
use crate::atoms::types::{
    GeneralizedSkillDefinition, SkillDefinition, SkillExample, SkillMetadata, SkillStep,
};
use crate::engine::openai::{generalized_skill_format, skill_definition_format, ModelClient, ParseRequest};
use crate::engine::skills::normalize::{
    clamp_text, estimate_generalization_score, merge_examples, merge_parameters,
    merge_string_lists, normalize_examples, normalize_parameters, normalize_skill_definition,
    normalize_string_list,
};
use crate::engine::skills::retriever::match_decision;
use crate::engine::skills::similarity::{build_skill_embedding_text, merge_score, step_similarity};
use crate::engine::embedding::EmbeddingClient;
use crate::engine::store::SkillStore;
use log::{info, warn};
use serde_json::Value;
use std::sync::Arc;

/// Everything the learner needs, owned — the originating request is gone
/// by the time this runs.
#[derive(Debug, Clone)]
pub struct LearnRequest {
    pub run_id: String,
    pub user_id: String,
    pub api_key: String,
    pub model: String,
    pub openai_base_url: Option<String>,
    pub user_query: String,
    pub base_output: String,
    pub trace: Option<Value>,
}

/// Detach a learn attempt onto the runtime. The caller's response is not
/// blocked on it and client cancellation cannot reach it.
pub fn spawn_learner(store: Arc<SkillStore>, config: SkillsConfig, request: LearnRequest) {
    info!(
        "[skills] skill_record_async_queue id={} user={}",
        request.run_id, request.user_id
    );
    tokio::spawn(async move {
        let run_id = request.run_id.clone();
        if let Err(e) = learn_from_run(&store, &config, request).await {
            warn!("[skills] skill_record_async_failed id={} error={}", run_id, e);
        }
    });
}

async fn learn_from_run(
    store: &SkillStore,
    config: &SkillsConfig,
    request: LearnRequest,
) -> EngineResult<()> {
    let run_id = &request.run_id;
    info!(
        "[skills] skill_record_async_start id={} user={}",
        run_id, request.user_id
    );

    let model = ModelClient::new(
        &request.api_key,
        Some(
            request
                .openai_base_url
                .as_deref()
                .unwrap_or(&config.openai_base_url),
        ),
        Some(config.openai_timeout_ms),
    );

    // ── 1. Decompose ───────────────────────────────────────────────────
    let Some(draft) = decompose_skill(&model, &request).await else {
        warn!("[skills] skill_record_async_skip id={} reason=decompose_failed", run_id);
        return Ok(());
    };

    // ── 2. Generalise ──────────────────────────────────────────────────
    let Some(generalized) = generalize_skill(&model, &request, &draft).await else {
        warn!("[skills] skill_record_async_skip id={} reason=generalize_failed", run_id);
        return Ok(());
    };

    // ── 3. Normalise ───────────────────────────────────────────────────
    let normalized = normalize_skill_definition(
        &SkillDefinition {
            name: generalized.name.clone(),
            description: generalized.description.clone(),
            entrypoint: generalized.entrypoint.clone(),
            steps: generalized.steps.clone(),
        },
        &request.user_query,
    );
    let parameters = normalize_parameters(generalized.parameters.as_deref().unwrap_or_default());
    let preconditions = normalize_string_list(
        generalized.preconditions.as_deref().unwrap_or_default(),
        MAX_PRECONDITIONS,
        260,
    );
    let success_criteria = normalize_string_list(
        generalized.success_criteria.as_deref().unwrap_or_default(),
        MAX_SUCCESS_CRITERIA,
        260,
    );
    let fallback_example = SkillExample {
        user_input: request.user_query.clone(),
        output_summary: Some(clamp_text(&request.base_output, 1400)),
        notes: None,
        run_id: Some(run_id.clone()),
    };
    let examples = normalize_examples(
        generalized.examples.as_deref().unwrap_or_default(),
        Some(&fallback_example),
    );

    // ── 4. Score + gate ────────────────────────────────────────────────
    let score = resolve_score(generalized.generalization_score, &normalized, &parameters);
    info!(
        "[skills] skill_generalized id={} name={} score={:.2} params={} preconditions={} success={} examples={} steps={}",
        run_id,
        normalized.name,
        score,
        parameters.len(),
        preconditions.len(),
        success_criteria.len(),
        examples.len(),
        normalized.steps.len(),
    );
    if score < config.generalization_threshold {
        info!(
            "[skills] skill_record_async_skip id={} reason=generalization_low score={:.2} threshold={:.2}",
            run_id, score, config.generalization_threshold
        );
        return Ok(());
    }

    // ── 5. Embed ───────────────────────────────────────────────────────
    let embedder = EmbeddingClient::new(
        &request.api_key,
        request
            .openai_base_url
            .as_deref()
            .unwrap_or(&config.openai_base_url),
        &config.embedding_model,
        config.openai_timeout_ms,
    );
    let embedding_text =
        build_skill_embedding_text(&normalized, &parameters, &preconditions, &success_criteria);
    let Some(embedding) = embedder.embed(&embedding_text).await else {
        warn!("[skills] skill_record_async_skip id={} reason=embedding_failed", run_id);
        return Ok(());
    };

    let metadata = SkillMetadata {
        parameters,
        preconditions,
        success_criteria,
        examples,
        generalization_score: Some(score),
    };

    // ── 6. Candidate lookup + merge-or-insert ──────────────────────────
    if let Some((candidate, distance)) = store.find_nearest(&request.user_id, &embedding)? {
        let candidate_steps: Vec<SkillStep> = match candidate.active_version_id.as_deref() {
            Some(version_id) => store
                .load_version(version_id)?
                .map(|v| v.steps)
                .unwrap_or_default(),
            None => vec![],
        };

        let (similarity, _) =
            match_decision(&candidate.embedding, &embedding, Some(distance), config);
        let step_sim = step_similarity(&normalized.steps, &candidate_steps);
        let combined = merge_score(similarity, step_sim, config.merge_similarity_eps);
        info!(
            "[skills] skill_merge_eval id={} skill={} similarity={:?} step={:.2} score={:.2} threshold={:.2}",
            run_id, candidate.id, similarity, step_sim, combined, config.merge_similarity_threshold
        );

        if combined >= config.merge_similarity_threshold {
            let merged = SkillMetadata {
                parameters: merge_parameters(&candidate.parameters, &metadata.parameters),
                preconditions: merge_string_lists(
                    &candidate.preconditions,
                    &metadata.preconditions,
                    MAX_PRECONDITIONS,
                    260,
                ),
                success_criteria: merge_string_lists(
                    &candidate.success_criteria,
                    &metadata.success_criteria,
                    MAX_SUCCESS_CRITERIA,
                    260,
                ),
                examples: merge_examples(&candidate.examples, &metadata.examples),
                generalization_score: Some(match candidate.generalization_score {
                    Some(existing) => existing.max(score),
                    None => score,
                }),
            };
            let new_version_id =
                store.save_merge(&candidate.id, &normalized, &embedding, &merged)?;
            store.patch_run_skill(run_id, &request.user_id, &candidate.id, &new_version_id)?;
            info!(
                "[skills] skill_merge_saved id={} skill={} new_version={}",
                run_id, candidate.id, new_version_id
            );
            return Ok(());
        }
        info!(
            "[skills] skill_merge_skip id={} skill={} score={:.2}",
            run_id, candidate.id, combined
        );
    }

    // ── 7. Insert new skill ────────────────────────────────────────────
    let (skill_id, version_id) =
        store.insert_skill(&request.user_id, &normalized, &embedding, &metadata)?;
    store.patch_run_skill(run_id, &request.user_id, &skill_id, &version_id)?;
    info!(
        "[skills] skill_record_async_saved id={} skill={} version={} steps={}",
        run_id,
        skill_id,
        version_id,
        normalized.steps.len()
    );
    Ok(())
}

/// Use the model's own score when it gave one, else the heuristic; always
/// clamped to [0,1].
pub fn resolve_score(
    reported: Option<f32>,
    definition: &SkillDefinition,
    parameters: &[crate::atoms::types::SkillParameter],
) -> f32 {
    reported
        .unwrap_or_else(|| estimate_generalization_score(definition, parameters))
        .clamp(0.0, 1.0)
}

// ── LLM calls ──────────────────────────────────────────────────────────────

async fn decompose_skill(model: &ModelClient, request: &LearnRequest) -> Option<SkillDefinition> {
    let prompt = [
        "You are creating a reusable skill from a solved request.".to_string(),
        "Write the skill in English only.".to_string(),
        "Return a concise JSON object with: name, description, entrypoint, steps.".to_string(),
        "Each step must include title and instructions. Keep steps minimal and executable."
            .to_string(),
        format!("Limit steps to {}.", MAX_STEPS),
    ];
    let mut input_parts = vec![
        format!("User request:\n{}", clamp_text(&request.user_query, 2000)),
        format!("Base solution:\n{}", clamp_text(&request.base_output, 2400)),
    ];
    let trace_summary = summarize_tool_trace(request.trace.as_ref());
    if !trace_summary.is_empty() {
        input_parts.push(format!("Tools used: {}", trace_summary));
    }

    let response = model
        .parse(&ParseRequest {
            model: request.model.clone(),
            instructions: Some(prompt.join("\n")),
            input: Value::String(input_parts.join("\n\n")),
            temperature: Some(0.2),
            tools: None,
            parallel_tool_calls: false,
            previous_response_id: None,
            text_format: skill_definition_format(),
        })
        .await;
    match response {
        Ok(response) => response.output_parsed::<SkillDefinition>(),
        Err(e) => {
            warn!("[skills] skill_decompose_failed error={}", e);
            None
        }
    }
}

async fn generalize_skill(
    model: &ModelClient,
    request: &LearnRequest,
    draft: &SkillDefinition,
) -> Option<GeneralizedSkillDefinition> {
    let prompt = [
        "You are generalizing a reusable skill so it can handle similar tasks.".to_string(),
        "All output fields must be in English. Translate any non-English content.".to_string(),
        "Replace specific details (names, paths, ids, dates) with parameters like {project_path}."
            .to_string(),
        "If the input already describes a skill, rewrite it in a more general, reusable form."
            .to_string(),
        "Return a JSON object with: name, description, entrypoint, steps, parameters, preconditions, successCriteria, examples, generalizationScore.".to_string(),
        "Parameters must include name and description; add an example if useful.".to_string(),
        "Preconditions and successCriteria should be short lists.".to_string(),
        "generalizationScore must be a number from 0 to 1.".to_string(),
        format!("Limit steps to {}.", MAX_STEPS),
    ];
    let mut input_parts = vec![
        format!("User request:\n{}", clamp_text(&request.user_query, 2000)),
        format!("Base solution:\n{}", clamp_text(&request.base_output, 2400)),
        format!("Draft skill name: {}", draft.name),
        format!("Draft description: {}", draft.description),
        format!("Draft entrypoint: {}", draft.entrypoint),
        {
            let steps = format_steps_for_prompt(&draft.steps);
            format!(
                "Draft steps:\n{}",
                if steps.is_empty() { "None".to_string() } else { steps }
            )
        },
    ];
    let trace_summary = summarize_tool_trace(request.trace.as_ref());
    if !trace_summary.is_empty() {
        input_parts.push(format!("Tools used: {}", trace_summary));
    }

    let response = model
        .parse(&ParseRequest {
            model: request.model.clone(),
            instructions: Some(prompt.join("\n")),
            input: Value::String(input_parts.join("\n\n")),
            temperature: Some(0.2),
            tools: None,
            parallel_tool_calls: false,
            previous_response_id: None,
            text_format: generalized_skill_format(),
        })
        .await;
    match response {
        Ok(response) => response.output_parsed::<GeneralizedSkillDefinition>(),
        Err(e) => {
            warn!("[skills] skill_generalize_failed error={}", e);
            None
        }
    }
}

// ── Prompt helpers ─────────────────────────────────────────────────────────

/// Names of the tools a run invoked, first 20, comma-joined.
pub fn summarize_tool_trace(trace: Option<&Value>) -> String {
    let Some(tools) = trace.and_then(|t| t["tools"].as_array()) else {
        return String::new();
    };
    let names: Vec<&str> = tools
        .iter()
        .filter_map(|tool| tool["name"].as_str())
        .filter(|name| !name.is_empty())
        .take(20)
        .collect();
    names.join(", ")
}

/// Numbered `i. title: instructions` lines for prompt embedding.
pub fn format_steps_for_prompt(steps: &[SkillStep]) -> String {
    steps
        .iter()
        .enumerate()
        .filter_map(|(i, step)| {
            let instructions = step.instructions.trim();
            if instructions.is_empty() {
                return None;
            }
            let title = step.title.trim();
            let title = if title.is_empty() {
                format!("Step {}", i + 1)
            } else {
                title.to_string()
            };
            Some(format!("{}. {}: {}", i + 1, title, instructions))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Tests ──────────────────────────────────────────────────────────────────
