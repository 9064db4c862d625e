// Raven Skill Engine — Skill Retriever
//
// Embed the user query, ask the store for the user's nearest skill and
// gate the match: cosine over stored vectors when available, else the
// chord-derived similarity from the KNN distance, else the raw distance
// ceiling. Anything below threshold is a miss and the engine falls back
// to a base solution.

use crate::atoms::config::SkillsConfig;
use crate::atoms::error::EngineResult;
use crate::atoms::types::SkillRecord;
use crate::engine::embedding::EmbeddingClient;
use crate::engine::store::{chord_similarity, clamp01, cosine_similarity, SkillStore};
use log::info;

/// What retrieval produced for a query. `distance` is reported back to the
/// caller even on a miss (observability of near-misses).
#[derive(Debug, Default)]
pub struct RetrievalOutcome {
    pub skill: Option<SkillRecord>,
    pub distance: Option<f32>,
}

/// The match decision: computed similarity (if any) and whether the skill
/// clears the retrieval gate.
pub fn match_decision(
    skill_embedding: &[f32],
    query_embedding: &[f32],
    distance: Option<f32>,
    config: &SkillsConfig,
) -> (Option<f32>, bool) {
    let similarity = if !skill_embedding.is_empty() && !query_embedding.is_empty() {
        Some(clamp01(cosine_similarity(skill_embedding, query_embedding)))
    } else {
        distance.map(|d| clamp01(chord_similarity(d)))
    };

    match similarity {
        Some(sim) => (Some(sim), sim >= config.match_similarity_threshold),
        // Distance fallback: a missing distance is a miss too.
        None => (None, distance.is_some_and(|d| d <= config.match_threshold)),
    }
}

/// Retrieve the best matching skill for a user query, or none.
pub async fn retrieve_skill(
    store: &SkillStore,
    embedder: &EmbeddingClient,
    config: &SkillsConfig,
    run_id: &str,
    user_id: &str,
    user_query: &str,
) -> EngineResult<RetrievalOutcome> {
    let Some(query_embedding) = embedder.embed(user_query).await else {
        info!("[skills] skill_search id={} user={} hasEmbedding=no", run_id, user_id);
        return Ok(RetrievalOutcome::default());
    };
    info!("[skills] skill_search id={} user={} hasEmbedding=yes", run_id, user_id);

    let Some((skill, distance)) = store.find_nearest(user_id, &query_embedding)? else {
        return Ok(RetrievalOutcome::default());
    };

    let (similarity, hit) =
        match_decision(&skill.embedding, &query_embedding, Some(distance), config);

    if hit {
        info!(
            "[skills] skill_hit id={} user={} skill={} similarity={:?} distance={:.4}",
            run_id, user_id, skill.id, similarity, distance
        );
        Ok(RetrievalOutcome {
            skill: Some(skill),
            distance: Some(distance),
        })
    } else {
        info!(
            "[skills] skill_miss id={} user={} similarity={:?} distance={:.4} threshold={:.4}",
            run_id, user_id, similarity, distance, config.match_similarity_threshold
        );
        Ok(RetrievalOutcome {
            skill: None,
            distance: Some(distance),
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
