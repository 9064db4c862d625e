// store/runs.rs — skill-run rows.
//
// A run is written once at the end of `/run` and mutated in exactly two
// ways afterwards: the async learner patches in the skill/version ids it
// produced, and `/feedback` fills the rating fields. Everything is scoped
// by (run_id, user_id) so one user can never touch another's runs.

use super::SkillStore;
use crate::atoms::error::EngineResult;
use crate::atoms::types::{Rating, SkillRunRecord, StepResult};
use rusqlite::{params, OptionalExtension};

/// Fields for a new run row.
pub struct NewSkillRun<'a> {
    pub run_id: &'a str,
    pub skill_id: Option<&'a str>,
    pub skill_version_id: Option<&'a str>,
    pub user_id: &'a str,
    pub thread_id: Option<&'a str>,
    pub session_id: Option<&'a str>,
    pub input: Option<&'a str>,
    pub step_results: &'a [StepResult],
}

impl SkillStore {
    /// Insert the run record produced by one `/run` request.
    pub fn insert_run(&self, run: &NewSkillRun<'_>) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO assistant_skill_runs
                 (id, skill_id, skill_version_id, user_id, thread_id, session_id, input, step_results)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.run_id,
                run.skill_id,
                run.skill_version_id,
                run.user_id,
                run.thread_id,
                run.session_id,
                run.input,
                serde_json::to_string(run.step_results)?,
            ],
        )?;
        Ok(())
    }

    /// Link a run to the skill the learner persisted for it.
    pub fn patch_run_skill(
        &self,
        run_id: &str,
        user_id: &str,
        skill_id: &str,
        skill_version_id: &str,
    ) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE assistant_skill_runs
                SET skill_id = ?1,
                    skill_version_id = ?2,
                    updated_at = datetime('now')
              WHERE id = ?3 AND user_id = ?4",
            params![skill_id, skill_version_id, run_id, user_id],
        )?;
        Ok(())
    }

    /// Load one run, scoped to its user.
    pub fn get_run(&self, run_id: &str, user_id: &str) -> EngineResult<Option<SkillRunRecord>> {
        let conn = self.conn.lock();
        let run = conn
            .query_row(
                "SELECT id, skill_id, skill_version_id, user_id, input, step_results
                   FROM assistant_skill_runs
                  WHERE id = ?1 AND user_id = ?2",
                params![run_id, user_id],
                |row| {
                    let raw_steps: Option<String> = row.get(5)?;
                    Ok(SkillRunRecord {
                        id: row.get(0)?,
                        skill_id: row.get(1)?,
                        skill_version_id: row.get(2)?,
                        user_id: row.get(3)?,
                        input: row.get(4)?,
                        step_results: raw_steps
                            .and_then(|text| serde_json::from_str(&text).ok())
                            .unwrap_or_default(),
                    })
                },
            )
            .optional()?;
        Ok(run)
    }

    /// Record feedback on a run. Only the rating fields change.
    pub fn update_run_feedback(
        &self,
        run_id: &str,
        user_id: &str,
        rating: Rating,
        feedback: Option<&str>,
    ) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE assistant_skill_runs
                SET feedback_rating = ?1,
                    feedback_text = ?2,
                    feedback_at = datetime('now'),
                    updated_at = datetime('now')
              WHERE id = ?3 AND user_id = ?4",
            params![rating.as_str(), feedback, run_id, user_id],
        )?;
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_run<'a>(run_id: &'a str, user_id: &'a str) -> NewSkillRun<'a> {
        NewSkillRun {
            run_id,
            skill_id: None,
            skill_version_id: None,
            user_id,
            thread_id: Some("t1"),
            session_id: None,
            input: Some("Summarise doc X"),
            step_results: &[],
        }
    }

    #[test]
    fn test_insert_and_get() {
        let store = SkillStore::open_in_memory(4).unwrap();
        store.insert_run(&sample_run("r1", "u1")).unwrap();
        let run = store.get_run("r1", "u1").unwrap().unwrap();
        assert_eq!(run.input.as_deref(), Some("Summarise doc X"));
        assert!(run.skill_id.is_none());
        assert!(run.step_results.is_empty());
    }

    #[test]
    fn test_get_scoped_to_user() {
        let store = SkillStore::open_in_memory(4).unwrap();
        store.insert_run(&sample_run("r1", "u1")).unwrap();
        assert!(store.get_run("r1", "u2").unwrap().is_none());
    }

    #[test]
    fn test_patch_run_skill() {
        let store = SkillStore::open_in_memory(4).unwrap();
        store.insert_run(&sample_run("r1", "u1")).unwrap();
        store.patch_run_skill("r1", "u1", "s1", "v1").unwrap();
        let run = store.get_run("r1", "u1").unwrap().unwrap();
        assert_eq!(run.skill_id.as_deref(), Some("s1"));
        assert_eq!(run.skill_version_id.as_deref(), Some("v1"));
    }

    #[test]
    fn test_patch_wrong_user_is_noop() {
        let store = SkillStore::open_in_memory(4).unwrap();
        store.insert_run(&sample_run("r1", "u1")).unwrap();
        store.patch_run_skill("r1", "u2", "s1", "v1").unwrap();
        let run = store.get_run("r1", "u1").unwrap().unwrap();
        assert!(run.skill_id.is_none());
    }

    #[test]
    fn test_update_feedback() {
        let store = SkillStore::open_in_memory(4).unwrap();
        store.insert_run(&sample_run("r1", "u1")).unwrap();
        store
            .update_run_feedback("r1", "u1", Rating::Negative, Some("include citations"))
            .unwrap();
        let (rating, text): (Option<String>, Option<String>) = {
            let conn = store.conn.lock();
            conn.query_row(
                "SELECT feedback_rating, feedback_text FROM assistant_skill_runs WHERE id = 'r1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap()
        };
        assert_eq!(rating.as_deref(), Some("negative"));
        assert_eq!(text.as_deref(), Some("include citations"));
    }

    #[test]
    fn test_step_results_round_trip() {
        let store = SkillStore::open_in_memory(4).unwrap();
        let steps = vec![StepResult {
            index: 0,
            title: Some("Fetch".into()),
            output: "fetched".into(),
            trace: None,
            timestamp: "2026-01-01T00:00:00Z".into(),
        }];
        let run = NewSkillRun {
            step_results: &steps,
            ..sample_run("r2", "u1")
        };
        store.insert_run(&run).unwrap();
        let loaded = store.get_run("r2", "u1").unwrap().unwrap();
        assert_eq!(loaded.step_results.len(), 1);
        assert_eq!(loaded.step_results[0].output, "fetched");
    }
}
