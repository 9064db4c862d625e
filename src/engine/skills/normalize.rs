// Raven Skill Engine — Definition Normaliser
//
// Everything the LLM hands back passes through here before it touches the
// catalogue: text trimmed and capped, list cardinalities enforced,
// parameter names coerced to identifier form, examples deduplicated.
// The merge helpers union incoming metadata with a candidate's existing
// metadata under the same caps — incoming items win ties on order.

use crate::atoms::config::{
    MAX_EXAMPLES, MAX_PARAMETERS, MAX_PRECONDITIONS, MAX_STEPS, MIN_NAME_LEN,
};
use crate::atoms::types::{SkillDefinition, SkillExample, SkillParameter, SkillStep};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Fallback skill name when the model returns something unusable.
const FALLBACK_NAME: &str = "Raven skill";

/// Trim, then cap to `max_len` characters.
pub fn clamp_text(value: &str, max_len: usize) -> String {
    value.trim().chars().take(max_len).collect()
}

fn clamp_opt(value: Option<&str>, max_len: usize) -> Option<String> {
    let clamped = clamp_text(value.unwrap_or(""), max_len);
    if clamped.is_empty() {
        None
    } else {
        Some(clamped)
    }
}

// ── Definition ─────────────────────────────────────────────────────────────

/// Normalize a drafted definition: caps applied, empty steps replaced by a
/// single catch-all step, missing entrypoint backed by the user query.
pub fn normalize_skill_definition(
    definition: &SkillDefinition,
    fallback_entrypoint: &str,
) -> SkillDefinition {
    let mut name = clamp_text(&definition.name, 120);
    if name.chars().count() < MIN_NAME_LEN {
        name = FALLBACK_NAME.to_string();
    }
    let description = clamp_text(&definition.description, 360);
    let entrypoint = {
        let clamped = clamp_text(&definition.entrypoint, 800);
        if clamped.is_empty() {
            clamp_text(fallback_entrypoint, 800)
        } else {
            clamped
        }
    };

    let mut steps: Vec<SkillStep> = Vec::new();
    for step in definition.steps.iter().take(MAX_STEPS) {
        let instructions = clamp_text(&step.instructions, 2000);
        if instructions.is_empty() {
            continue;
        }
        let title = {
            let t = clamp_text(&step.title, 140);
            if t.is_empty() {
                "Step".to_string()
            } else {
                t
            }
        };
        steps.push(SkillStep {
            title,
            instructions,
            notes: clamp_opt(step.notes.as_deref(), 800),
        });
    }
    if steps.is_empty() {
        steps.push(SkillStep {
            title: "Solve request".into(),
            instructions: "Provide the solution in full.".into(),
            notes: None,
        });
    }

    SkillDefinition {
        name,
        description: if description.is_empty() {
            "Reusable skill generated from a solved request.".into()
        } else {
            description
        },
        entrypoint,
        steps,
    }
}

// ── Parameters ─────────────────────────────────────────────────────────────

/// Coerce a parameter name to identifier form: strip surrounding braces,
/// collapse whitespace to underscores, trim stray underscores.
pub fn normalize_parameter_name(value: &str) -> String {
    let mut trimmed = value.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') && trimmed.len() >= 2 {
        trimmed = trimmed[1..trimmed.len() - 1].trim();
    }
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let collapsed = WHITESPACE
        .get_or_init(|| Regex::new(r"\s+").expect("static regex"))
        .replace_all(trimmed, "_");
    clamp_text(collapsed.trim_matches('_'), 60)
}

pub fn normalize_parameters(params: &[SkillParameter]) -> Vec<SkillParameter> {
    let mut out = Vec::new();
    for raw in params.iter().take(MAX_PARAMETERS) {
        let name = normalize_parameter_name(&raw.name);
        if name.is_empty() {
            continue;
        }
        let description = clamp_text(&raw.description, 260);
        if description.is_empty() {
            continue;
        }
        out.push(SkillParameter {
            name,
            description,
            example: clamp_opt(raw.example.as_deref(), 260),
        });
    }
    out
}

// ── String lists ───────────────────────────────────────────────────────────

pub fn normalize_string_list(items: &[String], max_items: usize, max_len: usize) -> Vec<String> {
    let mut out = Vec::new();
    for raw in items {
        let trimmed = clamp_text(raw, max_len);
        if trimmed.is_empty() {
            continue;
        }
        out.push(trimmed);
        if out.len() >= max_items {
            break;
        }
    }
    out
}

// ── Examples ───────────────────────────────────────────────────────────────

/// Deduplicate examples by user input; an optional fallback example (built
/// from the run that taught the skill) is appended if there is room.
pub fn normalize_examples(
    examples: &[SkillExample],
    fallback: Option<&SkillExample>,
) -> Vec<SkillExample> {
    let mut out: Vec<SkillExample> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for raw in examples {
        let user_input = clamp_text(&raw.user_input, 900);
        if user_input.is_empty() || seen.contains(&user_input) {
            continue;
        }
        seen.insert(user_input.clone());
        out.push(SkillExample {
            user_input,
            output_summary: clamp_opt(raw.output_summary.as_deref(), 1400),
            notes: clamp_opt(raw.notes.as_deref(), 800),
            run_id: clamp_opt(raw.run_id.as_deref(), 80),
        });
        if out.len() >= MAX_EXAMPLES {
            break;
        }
    }
    if let Some(fallback) = fallback {
        let user_input = clamp_text(&fallback.user_input, 900);
        if !user_input.is_empty() && !seen.contains(&user_input) && out.len() < MAX_EXAMPLES {
            out.push(SkillExample {
                user_input,
                output_summary: clamp_opt(fallback.output_summary.as_deref(), 1400),
                notes: clamp_opt(fallback.notes.as_deref(), 800),
                run_id: clamp_opt(fallback.run_id.as_deref(), 80),
            });
        }
    }
    out
}

// ── Merge unions ───────────────────────────────────────────────────────────

/// Union by parameter name, incoming first, capped.
pub fn merge_parameters(
    existing: &[SkillParameter],
    incoming: &[SkillParameter],
) -> Vec<SkillParameter> {
    let mut merged = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for param in incoming.iter().chain(existing.iter()) {
        if param.name.is_empty() || seen.contains(&param.name) {
            continue;
        }
        seen.insert(param.name.clone());
        merged.push(param.clone());
        if merged.len() >= MAX_PARAMETERS {
            break;
        }
    }
    merged
}

/// Case-insensitive union of short text lists, incoming first, capped.
pub fn merge_string_lists(
    existing: &[String],
    incoming: &[String],
    max_items: usize,
    max_len: usize,
) -> Vec<String> {
    let mut merged = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for item in incoming.iter().chain(existing.iter()) {
        let trimmed = clamp_text(item, max_len);
        if trimmed.is_empty() {
            continue;
        }
        let key = trimmed.to_lowercase();
        if seen.contains(&key) {
            continue;
        }
        seen.insert(key);
        merged.push(trimmed);
        if merged.len() >= max_items {
            break;
        }
    }
    merged
}

/// Union by example user input, incoming first, capped.
pub fn merge_examples(existing: &[SkillExample], incoming: &[SkillExample]) -> Vec<SkillExample> {
    let mut merged = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for item in incoming.iter().chain(existing.iter()) {
        if item.user_input.is_empty() || seen.contains(&item.user_input) {
            continue;
        }
        seen.insert(item.user_input.clone());
        merged.push(item.clone());
        if merged.len() >= MAX_EXAMPLES {
            break;
        }
    }
    merged
}

// ── Generalization score ───────────────────────────────────────────────────

/// `{identifier}` placeholders in a text.
pub fn count_placeholders(text: &str) -> usize {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{[a-zA-Z0-9_\-]+\}").expect("static regex"))
        .find_iter(text)
        .count()
}

/// Heuristic score for a definition the model did not score itself:
/// base 0.35, plus 0.05 per placeholder (≤8) and 0.04 per parameter (≤12,
/// counted up to 8), clamped to [0,1].
pub fn estimate_generalization_score(
    definition: &SkillDefinition,
    parameters: &[SkillParameter],
) -> f32 {
    let mut placeholders = count_placeholders(&definition.entrypoint);
    for step in &definition.steps {
        placeholders += count_placeholders(&step.instructions);
    }
    let score =
        0.35 + (placeholders.min(8) as f32) * 0.05 + (parameters.len().min(8) as f32) * 0.04;
    score.clamp(0.0, 1.0)
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
    fn test_clamp_text() {
        assert_eq!(clamp_text("  hi  ", 10), "hi");
        assert_eq!(clamp_text("abcdef", 3), "abc");
        assert_eq!(clamp_text("   ", 10), "");
    }

    #[test]
    fn test_normalize_definition_caps_steps() {
        let definition = SkillDefinition {
            name: "Summarise".into(),
            description: "d".into(),
            entrypoint: "Summarise {document}".into(),
            steps: (0..12).map(|i| step(&format!("S{i}"), "do it")).collect(),
        };
        let normalized = normalize_skill_definition(&definition, "fallback");
        assert_eq!(normalized.steps.len(), MAX_STEPS);
    }

    #[test]
    fn test_normalize_definition_short_name_falls_back() {
        let definition = SkillDefinition {
            name: "ab".into(),
            description: String::new(),
            entrypoint: String::new(),
            steps: vec![],
        };
        let normalized = normalize_skill_definition(&definition, "the user query");
        assert_eq!(normalized.name, FALLBACK_NAME);
        assert_eq!(normalized.entrypoint, "the user query");
        assert_eq!(normalized.steps.len(), 1);
        assert_eq!(normalized.steps[0].title, "Solve request");
    }

    #[test]
    fn test_normalize_definition_drops_empty_instruction_steps() {
        let definition = SkillDefinition {
            name: "Valid name".into(),
            description: "d".into(),
            entrypoint: "e".into(),
            steps: vec![step("Keep", "work"), step("Drop", "   ")],
        };
        let normalized = normalize_skill_definition(&definition, "f");
        assert_eq!(normalized.steps.len(), 1);
        assert_eq!(normalized.steps[0].title, "Keep");
    }

    #[test]
    fn test_normalize_parameter_name() {
        assert_eq!(normalize_parameter_name("{project path}"), "project_path");
        assert_eq!(normalize_parameter_name("  doc  id "), "doc_id");
        assert_eq!(normalize_parameter_name("_x_"), "x");
        assert_eq!(normalize_parameter_name("{}"), "");
    }

    #[test]
    fn test_normalize_parameters_drops_invalid() {
        let params = vec![
            SkillParameter {
                name: "{doc}".into(),
                description: "the document".into(),
                example: None,
            },
            SkillParameter {
                name: "   ".into(),
                description: "anonymous".into(),
                example: None,
            },
            SkillParameter {
                name: "nodesc".into(),
                description: "  ".into(),
                example: None,
            },
        ];
        let out = normalize_parameters(&params);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "doc");
    }

    #[test]
    fn test_normalize_string_list_caps() {
        let items: Vec<String> = (0..20).map(|i| format!("item {i}")).collect();
        let out = normalize_string_list(&items, MAX_PRECONDITIONS, 260);
        assert_eq!(out.len(), MAX_PRECONDITIONS);
    }

    #[test]
    fn test_normalize_examples_dedupes_and_appends_fallback() {
        let examples = vec![
            SkillExample {
                user_input: "same".into(),
                output_summary: None,
                notes: None,
                run_id: None,
            },
            SkillExample {
                user_input: "same".into(),
                output_summary: Some("dup".into()),
                notes: None,
                run_id: None,
            },
        ];
        let fallback = SkillExample {
            user_input: "from the run".into(),
            output_summary: Some("out".into()),
            notes: None,
            run_id: Some("r1".into()),
        };
        let out = normalize_examples(&examples, Some(&fallback));
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].user_input, "from the run");
    }

    #[test]
    fn test_normalize_examples_fallback_not_duplicated() {
        let examples = vec![SkillExample {
            user_input: "query".into(),
            output_summary: None,
            notes: None,
            run_id: None,
        }];
        let fallback = SkillExample {
            user_input: "query".into(),
            output_summary: None,
            notes: None,
            run_id: None,
        };
        assert_eq!(normalize_examples(&examples, Some(&fallback)).len(), 1);
    }

    #[test]
    fn test_merge_parameters_union_keeps_incoming_first() {
        let existing = vec![SkillParameter {
            name: "a".into(),
            description: "old a".into(),
            example: None,
        }];
        let incoming = vec![
            SkillParameter {
                name: "a".into(),
                description: "new a".into(),
                example: None,
            },
            SkillParameter {
                name: "b".into(),
                description: "b".into(),
                example: None,
            },
        ];
        let merged = merge_parameters(&existing, &incoming);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].description, "new a");
    }

    #[test]
    fn test_merge_never_shrinks_membership() {
        let existing: Vec<String> = vec!["Alpha".into(), "Beta".into()];
        let incoming: Vec<String> = vec!["gamma".into(), "ALPHA".into()];
        let merged = merge_string_lists(&existing, &incoming, 8, 260);
        // Case-insensitive union: alpha deduped, everything retained.
        assert_eq!(merged, vec!["gamma".to_string(), "ALPHA".into(), "Beta".into()]);
    }

    #[test]
    fn test_merge_examples_by_user_input() {
        let existing = vec![SkillExample {
            user_input: "q1".into(),
            output_summary: None,
            notes: None,
            run_id: None,
        }];
        let incoming = vec![SkillExample {
            user_input: "q1".into(),
            output_summary: Some("new".into()),
            notes: None,
            run_id: None,
        }];
        let merged = merge_examples(&existing, &incoming);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].output_summary.as_deref(), Some("new"));
    }

    #[test]
    fn test_count_placeholders() {
        assert_eq!(count_placeholders("Summarise {document} for {user-id}"), 2);
        assert_eq!(count_placeholders("no placeholders"), 0);
        assert_eq!(count_placeholders("{not a placeholder}"), 0); // space
    }

    #[test]
    fn test_estimate_generalization_score() {
        let definition = SkillDefinition {
            name: "n".into(),
            description: "d".into(),
            entrypoint: "Summarise {document}".into(),
            steps: vec![step("s", "Read {document} and write a summary")],
        };
        let params = vec![SkillParameter {
            name: "document".into(),
            description: "doc".into(),
            example: None,
        }];
        // 0.35 + 2 placeholders * 0.05 + 1 parameter * 0.04
        let score = estimate_generalization_score(&definition, &params);
        assert!((score - 0.49).abs() < 1e-6);
    }

    #[test]
    fn test_estimate_generalization_score_clamped() {
        let text = "{a} {b} {c} {d} {e} {f} {g} {h} {i} {j}";
        let definition = SkillDefinition {
            name: "n".into(),
            description: "d".into(),
            entrypoint: text.into(),
            steps: (0..8).map(|_| step("s", text)).collect(),
        };
        let params: Vec<SkillParameter> = (0..12)
            .map(|i| SkillParameter {
                name: format!("p{i}"),
                description: "x".into(),
                example: None,
            })
            .collect();
        assert_eq!(estimate_generalization_score(&definition, &params), 1.0);
    }
}
