// store/skills.rs — skill + version persistence.
//
// Writes follow one rule: a skill row, its new version and the active
// pointer always move in a single transaction, with the vec0 index row
// refreshed in the same transaction. Version numbers are allocated as
// max(existing)+1 under the store's connection lock, so they stay
// contiguous per skill even under concurrent merges.

use super::vector::{bytes_to_f32_vec, f32_vec_to_bytes};
use super::SkillStore;
use crate::atoms::error::EngineResult;
use crate::atoms::types::{
    SkillDefinition, SkillMetadata, SkillRecord, SkillStep, SkillVersionRecord,
};
use log::warn;
use rusqlite::{params, OptionalExtension, Row, Transaction};
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// KNN rows fetched before the per-user filter is applied. The vec0 MATCH
/// ranks globally; over-fetching keeps a busy neighbour's skills from
/// shadowing the requesting user's nearest.
const KNN_OVERFETCH: i64 = 16;

fn parse_json_list<T: DeserializeOwned>(raw: Option<String>) -> Vec<T> {
    raw.and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

fn skill_from_row(row: &Row<'_>) -> rusqlite::Result<SkillRecord> {
    let embedding_blob: Option<Vec<u8>> = row.get("embedding")?;
    Ok(SkillRecord {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        entrypoint_text: row.get("entrypoint_text")?,
        active_version_id: row.get("active_version_id")?,
        parameters: parse_json_list(row.get("parameters")?),
        preconditions: parse_json_list(row.get("preconditions")?),
        success_criteria: parse_json_list(row.get("success_criteria")?),
        examples: parse_json_list(row.get("examples")?),
        generalization_score: row.get("generalization_score")?,
        embedding: embedding_blob
            .map(|blob| bytes_to_f32_vec(&blob))
            .unwrap_or_default(),
    })
}

impl SkillStore {
    // ── Lookup ─────────────────────────────────────────────────────────

    /// Nearest skill of this user by embedding, with its L2 distance.
    /// Returns None when vector search is unavailable.
    pub fn find_nearest(
        &self,
        user_id: &str,
        embedding: &[f32],
    ) -> EngineResult<Option<(SkillRecord, f32)>> {
        if !self.vector_enabled() || embedding.is_empty() {
            return Ok(None);
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.name, s.description, s.entrypoint_text, s.active_version_id,
                    s.parameters, s.preconditions, s.success_criteria, s.examples,
                    s.generalization_score, s.embedding, v.distance
               FROM assistant_skills_vec AS v
               JOIN assistant_skill_vec_map AS m ON m.vec_rowid = v.rowid
               JOIN assistant_skills AS s ON s.id = m.skill_id
              WHERE v.embedding MATCH ?1
                AND k = ?2
                AND m.user_id = ?3
              ORDER BY v.distance
              LIMIT 1",
        )?;
        let found = stmt
            .query_row(
                params![f32_vec_to_bytes(embedding), KNN_OVERFETCH, user_id],
                |row| {
                    let skill = skill_from_row(row)?;
                    let distance: f64 = row.get("distance")?;
                    Ok((skill, distance as f32))
                },
            )
            .optional()?;
        Ok(found)
    }

    /// Load a skill by id, scoped to its owner.
    pub fn load_skill(&self, skill_id: &str, user_id: &str) -> EngineResult<Option<SkillRecord>> {
        let conn = self.conn.lock();
        let skill = conn
            .query_row(
                "SELECT id, name, description, entrypoint_text, active_version_id,
                        parameters, preconditions, success_criteria, examples,
                        generalization_score, embedding
                   FROM assistant_skills
                  WHERE id = ?1 AND user_id = ?2",
                params![skill_id, user_id],
                |row| skill_from_row(row),
            )
            .optional()?;
        Ok(skill)
    }

    /// Load a version (any skill) by id.
    pub fn load_version(&self, version_id: &str) -> EngineResult<Option<SkillVersionRecord>> {
        let conn = self.conn.lock();
        let version = conn
            .query_row(
                "SELECT id, skill_id, version, steps
                   FROM assistant_skill_versions
                  WHERE id = ?1",
                params![version_id],
                |row| {
                    Ok(SkillVersionRecord {
                        id: row.get(0)?,
                        skill_id: row.get(1)?,
                        version: row.get(2)?,
                        steps: parse_json_list(row.get(3)?),
                    })
                },
            )
            .optional()?;
        Ok(version)
    }

    // ── Writes ─────────────────────────────────────────────────────────

    /// Insert a brand-new skill with its v1 and set the active pointer.
    pub fn insert_skill(
        &self,
        user_id: &str,
        definition: &SkillDefinition,
        embedding: &[f32],
        metadata: &SkillMetadata,
    ) -> EngineResult<(String, String)> {
        let skill_id = Uuid::new_v4().to_string();
        let version_id = Uuid::new_v4().to_string();
        let steps_json = serde_json::to_string(&definition.steps)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO assistant_skills (
                 id, user_id, name, description, entrypoint_text, embedding,
                 active_version_id, parameters, preconditions, success_criteria,
                 examples, generalization_score
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                skill_id,
                user_id,
                definition.name,
                definition.description,
                definition.entrypoint,
                f32_vec_to_bytes(embedding),
                version_id,
                serde_json::to_string(&metadata.parameters)?,
                serde_json::to_string(&metadata.preconditions)?,
                serde_json::to_string(&metadata.success_criteria)?,
                serde_json::to_string(&metadata.examples)?,
                metadata.generalization_score,
            ],
        )?;
        tx.execute(
            "INSERT INTO assistant_skill_versions (id, skill_id, version, steps)
             VALUES (?1, ?2, 1, ?3)",
            params![version_id, skill_id, steps_json],
        )?;
        self.upsert_vec_row(&tx, &skill_id, user_id, embedding)?;
        tx.commit()?;

        Ok((skill_id, version_id))
    }

    /// Merge into an existing skill: new version with the incoming steps,
    /// refreshed metadata/embedding, active pointer moved — atomically.
    pub fn save_merge(
        &self,
        skill_id: &str,
        definition: &SkillDefinition,
        embedding: &[f32],
        metadata: &SkillMetadata,
    ) -> EngineResult<String> {
        let version_id = Uuid::new_v4().to_string();
        let steps_json = serde_json::to_string(&definition.steps)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let user_id: String = tx.query_row(
            "SELECT user_id FROM assistant_skills WHERE id = ?1",
            params![skill_id],
            |row| row.get(0),
        )?;
        let version = next_version(&tx, skill_id)?;
        tx.execute(
            "INSERT INTO assistant_skill_versions (id, skill_id, version, steps)
             VALUES (?1, ?2, ?3, ?4)",
            params![version_id, skill_id, version, steps_json],
        )?;
        tx.execute(
            "UPDATE assistant_skills
                SET name = ?1,
                    description = ?2,
                    entrypoint_text = ?3,
                    embedding = ?4,
                    active_version_id = ?5,
                    parameters = ?6,
                    preconditions = ?7,
                    success_criteria = ?8,
                    examples = ?9,
                    generalization_score = ?10,
                    updated_at = datetime('now')
              WHERE id = ?11",
            params![
                definition.name,
                definition.description,
                definition.entrypoint,
                f32_vec_to_bytes(embedding),
                version_id,
                serde_json::to_string(&metadata.parameters)?,
                serde_json::to_string(&metadata.preconditions)?,
                serde_json::to_string(&metadata.success_criteria)?,
                serde_json::to_string(&metadata.examples)?,
                metadata.generalization_score,
                skill_id,
            ],
        )?;
        self.upsert_vec_row(&tx, skill_id, &user_id, embedding)?;
        tx.commit()?;

        Ok(version_id)
    }

    /// Feedback fix: new version with replacement steps, metadata and
    /// embedding untouched, active pointer moved — atomically.
    pub fn save_fix(&self, skill_id: &str, steps: &[SkillStep]) -> EngineResult<String> {
        let version_id = Uuid::new_v4().to_string();
        let steps_json = serde_json::to_string(steps)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let version = next_version(&tx, skill_id)?;
        tx.execute(
            "INSERT INTO assistant_skill_versions (id, skill_id, version, steps)
             VALUES (?1, ?2, ?3, ?4)",
            params![version_id, skill_id, version, steps_json],
        )?;
        tx.execute(
            "UPDATE assistant_skills
                SET active_version_id = ?1,
                    updated_at = datetime('now')
              WHERE id = ?2",
            params![version_id, skill_id],
        )?;
        tx.commit()?;

        Ok(version_id)
    }

    /// Refresh the vec0 row for a skill (delete + insert, same tx as the
    /// skill write). Skipped when the index is off or the vector has the
    /// wrong dimensionality for this deployment.
    fn upsert_vec_row(
        &self,
        tx: &Transaction<'_>,
        skill_id: &str,
        user_id: &str,
        embedding: &[f32],
    ) -> EngineResult<()> {
        if !self.vector_enabled() {
            return Ok(());
        }
        if embedding.len() != self.dim() {
            warn!(
                "[store] Embedding dim {} != configured {}; skill {} not indexed",
                embedding.len(),
                self.dim(),
                skill_id
            );
            return Ok(());
        }
        tx.execute(
            "DELETE FROM assistant_skills_vec
              WHERE rowid IN (SELECT vec_rowid FROM assistant_skill_vec_map WHERE skill_id = ?1)",
            params![skill_id],
        )?;
        tx.execute(
            "DELETE FROM assistant_skill_vec_map WHERE skill_id = ?1",
            params![skill_id],
        )?;
        tx.execute(
            "INSERT INTO assistant_skills_vec (embedding) VALUES (?1)",
            params![f32_vec_to_bytes(embedding)],
        )?;
        let vec_rowid = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO assistant_skill_vec_map (vec_rowid, skill_id, user_id)
             VALUES (?1, ?2, ?3)",
            params![vec_rowid, skill_id, user_id],
        )?;
        Ok(())
    }
}

fn next_version(tx: &Transaction<'_>, skill_id: &str) -> EngineResult<i64> {
    let max: i64 = tx.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM assistant_skill_versions WHERE skill_id = ?1",
        params![skill_id],
        |row| row.get(0),
    )?;
    Ok(max + 1)
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{SkillExample, SkillParameter};

    const DIM: usize = 4;

    fn definition(name: &str) -> SkillDefinition {
        SkillDefinition {
            name: name.into(),
            description: "Summarise a document".into(),
            entrypoint: "Summarise {document}".into(),
            steps: vec![SkillStep {
                title: "Summarise".into(),
                instructions: "Produce a concise summary of {document}.".into(),
                notes: None,
            }],
        }
    }

    fn metadata() -> SkillMetadata {
        SkillMetadata {
            parameters: vec![SkillParameter {
                name: "document".into(),
                description: "Document to summarise".into(),
                example: Some("doc X".into()),
            }],
            preconditions: vec!["Document is readable".into()],
            success_criteria: vec!["Summary covers the key points".into()],
            examples: vec![SkillExample {
                user_input: "Summarise doc X".into(),
                output_summary: Some("ok".into()),
                notes: None,
                run_id: None,
            }],
            generalization_score: Some(0.82),
        }
    }

    #[test]
    fn test_insert_sets_active_v1() {
        let store = SkillStore::open_in_memory(DIM).unwrap();
        let (skill_id, version_id) = store
            .insert_skill("u1", &definition("Summarise"), &[1.0, 0.0, 0.0, 0.0], &metadata())
            .unwrap();
        let skill = store.load_skill(&skill_id, "u1").unwrap().unwrap();
        assert_eq!(skill.active_version_id.as_deref(), Some(version_id.as_str()));
        assert_eq!(skill.parameters.len(), 1);
        assert_eq!(skill.embedding.len(), DIM);
        let version = store.load_version(&version_id).unwrap().unwrap();
        assert_eq!(version.version, 1);
        assert_eq!(version.skill_id, skill_id);
        assert_eq!(version.steps.len(), 1);
    }

    #[test]
    fn test_load_skill_scoped_to_user() {
        let store = SkillStore::open_in_memory(DIM).unwrap();
        let (skill_id, _) = store
            .insert_skill("u1", &definition("Summarise"), &[1.0, 0.0, 0.0, 0.0], &metadata())
            .unwrap();
        assert!(store.load_skill(&skill_id, "u2").unwrap().is_none());
    }

    #[test]
    fn test_version_numbers_contiguous_across_merge_and_fix() {
        let store = SkillStore::open_in_memory(DIM).unwrap();
        let (skill_id, _) = store
            .insert_skill("u1", &definition("Summarise"), &[1.0, 0.0, 0.0, 0.0], &metadata())
            .unwrap();
        let v2 = store
            .save_merge(&skill_id, &definition("Summarise v2"), &[0.0, 1.0, 0.0, 0.0], &metadata())
            .unwrap();
        let v3 = store.save_fix(&skill_id, &definition("x").steps).unwrap();

        assert_eq!(store.load_version(&v2).unwrap().unwrap().version, 2);
        assert_eq!(store.load_version(&v3).unwrap().unwrap().version, 3);

        // Active pointer follows the latest insert.
        let skill = store.load_skill(&skill_id, "u1").unwrap().unwrap();
        assert_eq!(skill.active_version_id.as_deref(), Some(v3.as_str()));
    }

    #[test]
    fn test_merge_updates_metadata_and_embedding() {
        let store = SkillStore::open_in_memory(DIM).unwrap();
        let (skill_id, _) = store
            .insert_skill("u1", &definition("Summarise"), &[1.0, 0.0, 0.0, 0.0], &metadata())
            .unwrap();
        let mut merged = metadata();
        merged.generalization_score = Some(0.9);
        merged.preconditions.push("Second precondition".into());
        store
            .save_merge(&skill_id, &definition("Summarise"), &[0.0, 0.0, 1.0, 0.0], &merged)
            .unwrap();
        let skill = store.load_skill(&skill_id, "u1").unwrap().unwrap();
        assert_eq!(skill.generalization_score, Some(0.9));
        assert_eq!(skill.preconditions.len(), 2);
        assert!((skill.embedding[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_find_nearest_per_user() {
        let store = SkillStore::open_in_memory(DIM).unwrap();
        if !store.vector_enabled() {
            return; // extension not available on this build
        }
        store
            .insert_skill("u1", &definition("A"), &[1.0, 0.0, 0.0, 0.0], &metadata())
            .unwrap();
        store
            .insert_skill("u2", &definition("B"), &[0.99, 0.1, 0.0, 0.0], &metadata())
            .unwrap();

        let (skill, distance) = store
            .find_nearest("u1", &[1.0, 0.0, 0.0, 0.0])
            .unwrap()
            .expect("nearest for u1");
        assert_eq!(skill.name, "A");
        assert!(distance < 1e-3);

        let (skill, _) = store
            .find_nearest("u2", &[1.0, 0.0, 0.0, 0.0])
            .unwrap()
            .expect("nearest for u2");
        assert_eq!(skill.name, "B");
    }

    #[test]
    fn test_find_nearest_empty_catalogue() {
        let store = SkillStore::open_in_memory(DIM).unwrap();
        assert!(store.find_nearest("u1", &[1.0, 0.0, 0.0, 0.0]).unwrap().is_none());
    }

    #[test]
    fn test_find_nearest_tracks_merge_embedding() {
        let store = SkillStore::open_in_memory(DIM).unwrap();
        if !store.vector_enabled() {
            return;
        }
        let (skill_id, _) = store
            .insert_skill("u1", &definition("A"), &[1.0, 0.0, 0.0, 0.0], &metadata())
            .unwrap();
        store
            .save_merge(&skill_id, &definition("A"), &[0.0, 1.0, 0.0, 0.0], &metadata())
            .unwrap();
        let (_, distance) = store
            .find_nearest("u1", &[0.0, 1.0, 0.0, 0.0])
            .unwrap()
            .expect("nearest after merge");
        assert!(distance < 1e-3);
    }

    #[test]
    fn test_wrong_dim_embedding_not_indexed() {
        let store = SkillStore::open_in_memory(DIM).unwrap();
        let (skill_id, _) = store
            .insert_skill("u1", &definition("A"), &[1.0, 0.0], &metadata())
            .unwrap();
        // Row exists, raw embedding stored, but no vec row to match.
        assert!(store.load_skill(&skill_id, "u1").unwrap().is_some());
        assert!(store.find_nearest("u1", &[1.0, 0.0, 0.0, 0.0]).unwrap().is_none());
    }
}
