// Raven Skill Engine — Similarity Scoring
//
// Two signals decide whether a freshly learned skill merges into an
// existing one: embedding similarity over the canonical skill text, and
// token-level Jaccard overlap between step lists. The combination is
// biased toward "same intent, slightly different phrasing" — see
// merge_score. The weights and epsilon are tunables, not constants of
// nature.

use crate::atoms::types::{SkillDefinition, SkillParameter, SkillStep};
use crate::engine::store::clamp01;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Lower-cased word tokens (≥2 chars) of a text.
pub fn tokenize_text(value: &str) -> HashSet<String> {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| Regex::new(r"\w{2,}").expect("static regex"))
        .find_iter(&value.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

fn step_tokens(step: &SkillStep) -> HashSet<String> {
    tokenize_text(&format!("{} {}", step.title, step.instructions))
}

/// For each left step, the best Jaccard overlap against any right step;
/// averaged over left steps with tokens. 0.0 when either side is empty.
pub fn step_similarity(left: &[SkillStep], right: &[SkillStep]) -> f32 {
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let right_tokens: Vec<HashSet<String>> = right
        .iter()
        .map(step_tokens)
        .filter(|tokens| !tokens.is_empty())
        .collect();
    if right_tokens.is_empty() {
        return 0.0;
    }

    let mut total = 0.0f32;
    let mut count = 0usize;
    for step in left {
        let tokens = step_tokens(step);
        if tokens.is_empty() {
            continue;
        }
        let mut best = 0.0f32;
        for candidate in &right_tokens {
            let intersection = tokens.intersection(candidate).count();
            let union = tokens.union(candidate).count();
            if union == 0 {
                continue;
            }
            let score = intersection as f32 / union as f32;
            if score > best {
                best = score;
            }
        }
        total += best;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        total / count as f32
    }
}

/// Combine embedding similarity and step overlap into the merge score:
/// `max(sim·0.7 + step·0.3, min(1, sim+eps), step)`. Without a usable
/// similarity the step overlap stands alone.
pub fn merge_score(similarity: Option<f32>, step_sim: f32, eps: f32) -> f32 {
    match similarity {
        None => step_sim,
        Some(sim) => {
            let sim = clamp01(sim);
            let weighted = sim * 0.7 + step_sim * 0.3;
            let boosted = (sim + eps).min(1.0);
            weighted.max(boosted).max(step_sim)
        }
    }
}

/// Canonical text a skill is embedded under: identity, parameters,
/// conditions, then the numbered step list.
pub fn build_skill_embedding_text(
    definition: &SkillDefinition,
    parameters: &[SkillParameter],
    preconditions: &[String],
    success_criteria: &[String],
) -> String {
    let mut parts = vec![
        format!("Name: {}", definition.name),
        format!("Description: {}", definition.description),
        format!("Entrypoint: {}", definition.entrypoint),
    ];
    if !parameters.is_empty() {
        let formatted: Vec<String> = parameters
            .iter()
            .map(|p| match p.example.as_deref() {
                Some(example) if !example.is_empty() => {
                    format!("{}: {} (e.g. {})", p.name, p.description, example)
                }
                _ => format!("{}: {}", p.name, p.description),
            })
            .collect();
        parts.push(format!("Parameters: {}", formatted.join("; ")));
    }
    if !preconditions.is_empty() {
        parts.push(format!("Preconditions: {}", preconditions.join("; ")));
    }
    if !success_criteria.is_empty() {
        parts.push(format!("Success criteria: {}", success_criteria.join("; ")));
    }
    if !definition.steps.is_empty() {
        let step_lines: Vec<String> = definition
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {}: {}", i + 1, step.title, step.instructions))
            .collect();
        parts.push(format!("Steps:\n{}", step_lines.join("\n")));
    }
    parts.join("\n")
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn step(title: &str, instructions: &str) -> SkillStep {
        SkillStep {
            title: title.into(),
            instructions: instructions.into(),
            notes: None,
        }
    }

    #[test]
    fn test_tokenize_text() {
        let tokens = tokenize_text("Read the Document, read it twice! a");
        assert!(tokens.contains("read"));
        assert!(tokens.contains("document"));
        assert!(!tokens.contains("a")); // single chars dropped
    }

    #[test]
    fn test_step_similarity_identical() {
        let steps = vec![step("Fetch", "Fetch the document"), step("Write", "Write a summary")];
        assert!((step_similarity(&steps, &steps) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_step_similarity_disjoint() {
        let left = vec![step("Alpha", "completely unrelated words")];
        let right = vec![step("Omega", "different vocabulary entirely")];
        assert!(step_similarity(&left, &right) < 0.1);
    }

    #[test]
    fn test_step_similarity_empty() {
        let steps = vec![step("A", "text")];
        assert_eq!(step_similarity(&steps, &[]), 0.0);
        assert_eq!(step_similarity(&[], &steps), 0.0);
    }

    #[test]
    fn test_merge_score_weighting() {
        // sim 0.8, step 0.4, eps 0.05:
        // weighted = 0.68, boosted = 0.85, step = 0.4 → 0.85
        let score = merge_score(Some(0.8), 0.4, 0.05);
        assert!((score - 0.85).abs() < 1e-6);
    }

    #[test]
    fn test_merge_score_step_dominates() {
        // sim 0.1, step 0.9: weighted 0.34, boosted 0.15, step 0.9 → 0.9
        let score = merge_score(Some(0.1), 0.9, 0.05);
        assert!((score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_merge_score_without_similarity() {
        assert_eq!(merge_score(None, 0.42, 0.05), 0.42);
    }

    #[test]
    fn test_merge_score_boost_capped() {
        assert!(merge_score(Some(0.99), 0.0, 0.05) <= 1.0);
    }

    #[test]
    fn test_embedding_text_layout() {
        let definition = SkillDefinition {
            name: "Summarise document".into(),
            description: "Summarises any document".into(),
            entrypoint: "Summarise {document}".into(),
            steps: vec![step("Read", "Read {document}"), step("Write", "Write the summary")],
        };
        let parameters = vec![SkillParameter {
            name: "document".into(),
            description: "The document".into(),
            example: Some("doc X".into()),
        }];
        let text = build_skill_embedding_text(
            &definition,
            &parameters,
            &["Document exists".to_string()],
            &["Summary is concise".to_string()],
        );
        assert!(text.starts_with("Name: Summarise document"));
        assert!(text.contains("Parameters: document: The document (e.g. doc X)"));
        assert!(text.contains("Preconditions: Document exists"));
        assert!(text.contains("Success criteria: Summary is concise"));
        assert!(text.contains("Steps:\n1. Read: Read {document}\n2. Write: Write the summary"));
    }

    #[test]
    fn test_embedding_text_minimal() {
        let definition = SkillDefinition {
            name: "n".into(),
            description: "d".into(),
            entrypoint: "e".into(),
            steps: vec![],
        };
        let text = build_skill_embedding_text(&definition, &[], &[], &[]);
        assert_eq!(text, "Name: n\nDescription: d\nEntrypoint: e");
    }
}
