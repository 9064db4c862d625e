// Raven Agent Engine — System Prompt Store
//
// The system prompt lives in an editable text file. A single process-wide
// cache holds the last-read content, invalidated by comparing the file's
// mtime before every return; concurrent readers may re-read on a miss but
// converge to the same content. A missing file is created with the
// built-in default; an empty file falls back to it.

use crate::atoms::error::{EngineError, EngineResult};
use log::warn;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Built-in system prompt used until the operator edits the prompt file.
pub const DEFAULT_PROMPT: &str = "\
You are Raven, the Smart Tracker AI assistant.
You can use MCP tools to read and update the canvas.
Use tools when a user asks to inspect or change the canvas.
Prefer node with action=\"create\" for new cards and action=\"update\" for edits.
When creating edges between new cards, create the cards first and use their returned ids; do not use placeholder ids.
get_state returns a summary by default (titles + metadata). Use node with action=\"read\" for full content when needed.
If you only need a list of cards, use node with action=\"read\" and mode=\"summary\".
Nodes have energy from 0 to 100 that represents the effort required to complete the card unless the user specifies otherwise.
Energy propagates along edges from source nodes to target nodes.
Each card has a base (own) energy you set directly; total card energy equals its base plus the sum of incoming energies, capped at 100%.
List responses are capped; if a list is truncated, request specific items by id or use a smaller limit.
Use MCP tool list_canvas_participants to fetch taggable people (id, name, email).
Use MCP tool send_alert to notify a canvas participant via their enabled alerting channels.
When tagging someone in a card, include @Name in the content and update node.mentions with {id,label}.
To tag everyone, include @all and add {id:\"all\", label:\"all\"} to node.mentions.
For destructive actions (delete), ask for explicit confirmation first.
If a tool fails, explain what happened and ask how to proceed.
Keep responses concise and actionable.";

struct CachedPrompt {
    path: PathBuf,
    text: String,
    mtime: Option<SystemTime>,
}

static PROMPT_CACHE: Mutex<Option<CachedPrompt>> = Mutex::new(None);

/// Make sure the prompt file exists, seeding it with the default.
fn ensure_prompt_file(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if !path.exists() {
        fs::write(path, format!("{}\n", DEFAULT_PROMPT))?;
    }
    Ok(())
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Load the system prompt, consulting the mtime-guarded cache first.
pub fn load_prompt_text(path: &Path) -> String {
    if let Err(e) = ensure_prompt_file(path) {
        warn!("[agent] Prompt file setup failed at {:?}: {}", path, e);
        return DEFAULT_PROMPT.to_string();
    }

    let mtime = file_mtime(path);

    {
        let guard = PROMPT_CACHE.lock();
        if let Some(cached) = guard.as_ref() {
            if cached.path == path && mtime.is_some() && cached.mtime == mtime {
                return cached.text.clone();
            }
        }
    }

    let text = match fs::read_to_string(path) {
        Ok(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                DEFAULT_PROMPT.to_string()
            } else {
                trimmed.to_string()
            }
        }
        Err(e) => {
            warn!("[agent] Prompt file read failed at {:?}: {}", path, e);
            DEFAULT_PROMPT.to_string()
        }
    };

    *PROMPT_CACHE.lock() = Some(CachedPrompt {
        path: path.to_path_buf(),
        text: text.clone(),
        mtime,
    });
    text
}

/// Persist a new prompt. Blank input is a caller error.
pub fn save_prompt_text(path: &Path, value: &str) -> EngineResult<String> {
    let text = value.trim();
    if text.is_empty() {
        return Err(EngineError::Config("prompt_required".into()));
    }
    ensure_prompt_file(path)?;
    fs::write(path, format!("{}\n", text))?;

    *PROMPT_CACHE.lock() = Some(CachedPrompt {
        path: path.to_path_buf(),
        text: text.to_string(),
        mtime: file_mtime(path),
    });
    Ok(text.to_string())
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_seeds_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prompt.txt");
        let text = load_prompt_text(&path);
        assert_eq!(text, DEFAULT_PROMPT);
        assert!(path.exists());
    }

    #[test]
    fn test_empty_file_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prompt.txt");
        fs::write(&path, "   \n").unwrap();
        assert_eq!(load_prompt_text(&path), DEFAULT_PROMPT);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prompt.txt");
        let saved = save_prompt_text(&path, "  You are a terse assistant.  ").unwrap();
        assert_eq!(saved, "You are a terse assistant.");
        assert_eq!(load_prompt_text(&path), "You are a terse assistant.");
    }

    #[test]
    fn test_save_blank_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prompt.txt");
        let err = save_prompt_text(&path, "   ").unwrap_err();
        assert!(matches!(err, EngineError::Config(ref m) if m == "prompt_required"));
    }
}
