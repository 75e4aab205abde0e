//! Persistence surface for conversation history.
//!
//! A conversation is loaded once at startup and saved in full after every
//! history mutation.  [`JsonFileStore`] keeps one `<conversation_id>.json`
//! per conversation; [`MemoryStore`] keeps everything in process.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use cs_domain::error::{Error, Result};

use crate::history::HistoryEntry;

pub trait HistoryStore: Send + Sync {
    /// Load a conversation.  A conversation never saved loads as empty.
    fn load(&self, conversation_id: &str) -> Result<Vec<HistoryEntry>>;

    /// Replace the stored conversation with `entries`.
    fn save(&self, conversation_id: &str, entries: &[HistoryEntry]) -> Result<()>;
}

/// Conversation ids become file names, so they are restricted to a
/// conservative character set.
pub fn validate_conversation_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(Error::Store(format!("invalid conversation id: {id:?}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSON file store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Serialize, Deserialize)]
struct HistoryFile {
    conversation_id: String,
    saved_at: DateTime<Utc>,
    entries: Vec<HistoryEntry>,
}

pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(Error::Io)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn path_for(&self, conversation_id: &str) -> Result<PathBuf> {
        validate_conversation_id(conversation_id)?;
        Ok(self.dir.join(format!("{conversation_id}.json")))
    }
}

impl HistoryStore for JsonFileStore {
    fn load(&self, conversation_id: &str) -> Result<Vec<HistoryEntry>> {
        let path = self.path_for(conversation_id)?;
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };
        let file: HistoryFile = serde_json::from_str(&raw)
            .map_err(|e| Error::Store(format!("{}: {e}", path.display())))?;

        tracing::debug!(
            conversation_id,
            entries = file.entries.len(),
            path = %path.display(),
            "history loaded"
        );
        Ok(file.entries)
    }

    fn save(&self, conversation_id: &str, entries: &[HistoryEntry]) -> Result<()> {
        let path = self.path_for(conversation_id)?;
        let file = HistoryFile {
            conversation_id: conversation_id.to_owned(),
            saved_at: Utc::now(),
            entries: entries.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&file)?;

        // Write beside the target and rename over it so a crash never leaves
        // a half-written history behind.
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(Error::Io)?;
        tmp.write_all(&json).map_err(Error::Io)?;
        tmp.as_file().sync_all().map_err(Error::Io)?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-local store for ephemeral conversations and tests.
#[derive(Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<String, Vec<HistoryEntry>>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl HistoryStore for MemoryStore {
    fn load(&self, conversation_id: &str) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .conversations
            .lock()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    fn save(&self, conversation_id: &str, entries: &[HistoryEntry]) -> Result<()> {
        self.conversations
            .lock()
            .insert(conversation_id.to_owned(), entries.to_vec());
        *self.saves.lock() += 1;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
