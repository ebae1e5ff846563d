//! Session persistence — save and restore conversation history.
//!
//! Sessions are JSON files named by a 32-hex id in a mode-0700 directory.
//! The id is validated before any filesystem access (path-traversal
//! guard), writes are size-capped and land via temp-file-plus-rename, and
//! loads tolerate a concurrent rename by retrying once.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use llm::{ChatMessage, EngineInfo};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Serialized sessions above this size fail loudly instead of filling the
/// disk.
const MAX_SESSION_BYTES: usize = 10 * 1024 * 1024;

fn session_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-f]{32}$").unwrap())
}

/// Fresh session id: a UUIDv4 without dashes.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub name: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub engine: Option<EngineInfo>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub message_count: usize,
}

pub struct SessionManager {
    dir: PathBuf,
    max_bytes: usize,
}

impl SessionManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_bytes: MAX_SESSION_BYTES,
        }
    }

    pub fn default_dir() -> PathBuf {
        crate::config::data_dir().join("sessions")
    }

    #[cfg(test)]
    fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Save a conversation. Derives a name from the first user message
    /// when none is given; preserves the created timestamp on overwrite.
    pub fn save(
        &self,
        id: &str,
        name: Option<&str>,
        engine: Option<EngineInfo>,
        messages: &[ChatMessage],
    ) -> Result<SessionRecord> {
        validate_id(id)?;
        self.ensure_dir()?;

        let now = Utc::now();
        let path = self.dir.join(format!("{id}.json"));
        let created = match self.load_unchecked(&path) {
            Some(existing) => existing.created,
            None => now,
        };
        let name = match name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => auto_name(messages),
        };

        let record = SessionRecord {
            id: id.to_string(),
            name,
            created,
            updated: now,
            engine,
            messages: messages.to_vec(),
        };

        let serialized = serde_json::to_vec_pretty(&record)?;
        if serialized.len() > self.max_bytes {
            bail!(
                "session too large ({} bytes, limit {} bytes)",
                serialized.len(),
                self.max_bytes
            );
        }
        crate::config::write_atomic(&path, &serialized)?;
        info!("session saved: {id} ({})", record.name);
        Ok(record)
    }

    /// Load a session by id. `Ok(None)` when it does not exist.
    pub fn load(&self, id: &str) -> Result<Option<SessionRecord>> {
        validate_id(id)?;
        let path = self.dir.join(format!("{id}.json"));
        // A concurrent save may be mid-rename; one retry covers it.
        for attempt in 0..2 {
            match std::fs::read_to_string(&path) {
                Ok(text) => {
                    let record = serde_json::from_str(&text)
                        .with_context(|| format!("corrupt session file {}", path.display()))?;
                    return Ok(Some(record));
                }
                Err(err) if err.kind() == ErrorKind::NotFound && attempt == 0 => {
                    std::thread::yield_now();
                }
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(None)
    }

    /// Summaries of all saved sessions, newest first. Corrupt files are
    /// skipped with a warning rather than failing the listing.
    pub fn list(&self) -> Result<Vec<SessionSummary>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut summaries = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(_) => continue,
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|text| serde_json::from_str::<SessionRecord>(&text).map_err(Into::into))
            {
                Ok(record) => summaries.push(SessionSummary {
                    id: record.id,
                    name: record.name,
                    created: record.created,
                    updated: record.updated,
                    message_count: record.messages.len(),
                }),
                Err(err) => warn!("skipping corrupt session file {}: {err}", path.display()),
            }
        }
        summaries.sort_by(|a, b| b.updated.cmp(&a.updated));
        Ok(summaries)
    }

    /// Delete a session file. Returns whether it existed.
    #[allow(dead_code)]
    pub fn delete(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        let path = self.dir.join(format!("{id}.json"));
        if path.exists() {
            std::fs::remove_file(&path)?;
            info!("session deleted: {id}");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn load_unchecked(&self, path: &std::path::Path) -> Option<SessionRecord> {
        let text = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }

    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("cannot create session dir {}", self.dir.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }
}

/// Reject anything that is not exactly 32 lowercase hex characters before
/// it can touch a path.
fn validate_id(id: &str) -> Result<()> {
    if !session_id_re().is_match(id) {
        bail!("invalid session id: {id:?}");
    }
    Ok(())
}

/// A short human name derived from the first user message.
fn auto_name(messages: &[ChatMessage]) -> String {
    for message in messages {
        if let ChatMessage::User { content } = message {
            // Skip injected bracket notes such as /cmd records.
            if content.starts_with('[') {
                continue;
            }
            if content.chars().count() > 60 {
                let head: String = content.chars().take(57).collect();
                return format!("{head}...");
            }
            return content.clone();
        }
    }
    format!("session-{}", Utc::now().format("%Y%m%d-%H%M%S"))
}
