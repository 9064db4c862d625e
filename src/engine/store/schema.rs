// Database schema and migrations for the skill catalogue.
// Called once at startup by SkillStore::open() after WAL is enabled.
// Adding a new table or column: append an idempotent CREATE TABLE IF NOT
// EXISTS or ALTER TABLE … ADD COLUMN at the end of run_migrations() —
// never modify existing SQL to keep upgrade paths clean.

use crate::atoms::error::EngineResult;
use log::warn;
use rusqlite::Connection;

pub(crate) fn run_migrations(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS assistant_skills (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            entrypoint_text TEXT NOT NULL,
            embedding BLOB,
            active_version_id TEXT,
            parameters TEXT NOT NULL DEFAULT '[]',
            preconditions TEXT NOT NULL DEFAULT '[]',
            success_criteria TEXT NOT NULL DEFAULT '[]',
            examples TEXT NOT NULL DEFAULT '[]',
            generalization_score REAL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_skills_user
            ON assistant_skills(user_id);

        CREATE TABLE IF NOT EXISTS assistant_skill_versions (
            id TEXT PRIMARY KEY,
            skill_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            steps TEXT NOT NULL DEFAULT '[]',
            base_prompt TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (skill_id, version),
            FOREIGN KEY (skill_id) REFERENCES assistant_skills(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_skill_versions_skill
            ON assistant_skill_versions(skill_id, version);

        CREATE TABLE IF NOT EXISTS assistant_skill_runs (
            id TEXT PRIMARY KEY,
            skill_id TEXT,
            skill_version_id TEXT,
            user_id TEXT NOT NULL,
            thread_id TEXT,
            session_id TEXT,
            input TEXT,
            step_results TEXT NOT NULL DEFAULT '[]',
            feedback_rating TEXT,
            feedback_text TEXT,
            feedback_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_skill_runs_user
            ON assistant_skill_runs(user_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS assistant_skill_vec_map (
            vec_rowid INTEGER PRIMARY KEY,
            skill_id TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            FOREIGN KEY (skill_id) REFERENCES assistant_skills(id) ON DELETE CASCADE
        );
        ",
    )?;
    Ok(())
}

/// Create the vec0 virtual table for KNN retrieval. Returns false when the
/// sqlite-vec extension is not usable on this build; the store then runs
/// with vector search disabled and retrieval always misses.
pub(crate) fn ensure_vector_table(conn: &Connection, dim: usize) -> bool {
    let ddl = format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS assistant_skills_vec USING vec0(embedding float[{}])",
        dim
    );
    match conn.execute_batch(&ddl) {
        Ok(()) => true,
        Err(e) => {
            warn!("[store] Vector index unavailable ({}); retrieval disabled", e);
            false
        }
    }
}
