// ── Raven Atoms ────────────────────────────────────────────────────────────
// Foundation layer: error type, configuration, core domain types and log
// hygiene helpers. Nothing in here performs I/O except config env reads.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;
