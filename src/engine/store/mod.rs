// Raven Agent Engine — Skill Store
// Per-user skill catalogue in SQLite via rusqlite, with nearest-neighbour
// retrieval through the sqlite-vec extension when it is available.
//
// Module layout:
//   schema  — idempotent migrations + vec0 table creation
//   vector  — f32↔BLOB conversion, cosine / chord similarity
//   skills  — skill + version CRUD, KNN lookup, merge/fix transactions
//   runs    — skill-run rows (insert, patch, feedback)

use crate::atoms::error::EngineResult;
use log::info;
use parking_lot::Mutex;
use rusqlite::ffi::sqlite3_auto_extension;
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::OnceLock;

mod runs;
mod schema;
mod skills;
pub mod vector;

pub use runs::NewSkillRun;
pub use vector::{chord_similarity, clamp01, cosine_similarity, f32_vec_to_bytes};

/// Register the sqlite-vec extension for every subsequent connection.
/// Process-wide, performed at most once.
fn register_vec_extension() -> bool {
    static REGISTERED: OnceLock<bool> = OnceLock::new();
    *REGISTERED.get_or_init(|| {
        let rc = unsafe {
            sqlite3_auto_extension(Some(std::mem::transmute(sqlite3_vec_init as *const ())))
        };
        if rc != 0 {
            log::warn!("[store] sqlite-vec registration failed (rc={})", rc);
        }
        rc == 0
    })
}

/// Thread-safe skill catalogue.
pub struct SkillStore {
    /// The SQLite connection, protected by a Mutex. `pub(crate)` so the
    /// sibling modules implement their queries directly against it.
    pub(crate) conn: Mutex<Connection>,
    /// Whether the vec0 KNN index is usable. Probed once at open.
    vector_enabled: bool,
    /// Embedding dimensionality this deployment is pinned to.
    dim: usize,
}

impl SkillStore {
    /// Open (or create) the catalogue database and initialize tables.
    pub fn open(path: &Path, dim: usize) -> EngineResult<Self> {
        let vec_registered = register_vec_extension();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!("[store] Opening skill store at {:?}", path);
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();

        schema::run_migrations(&conn)?;
        let vector_enabled = vec_registered && schema::ensure_vector_table(&conn, dim);
        info!(
            "[store] Skill store ready vector={}",
            if vector_enabled { "yes" } else { "no" }
        );

        Ok(SkillStore {
            conn: Mutex::new(conn),
            vector_enabled,
            dim,
        })
    }

    /// In-memory store with the full schema. Used by tests.
    pub fn open_in_memory(dim: usize) -> EngineResult<Self> {
        let vec_registered = register_vec_extension();
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();
        schema::run_migrations(&conn)?;
        let vector_enabled = vec_registered && schema::ensure_vector_table(&conn, dim);
        Ok(SkillStore {
            conn: Mutex::new(conn),
            vector_enabled,
            dim,
        })
    }

    pub fn vector_enabled(&self) -> bool {
        self.vector_enabled
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}
