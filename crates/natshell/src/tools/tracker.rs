//! Read-before-edit discipline.
//!
//! `edit_file` refuses to touch a file the agent has not read this
//! session, or whose content changed since the read. The tracker records
//! a content hash per canonical path; comparison against the current
//! content catches edits made behind the agent's back.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// SHA-256 of file content, hex-encoded.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerStatus {
    /// Path was never read this session.
    Unread,
    /// Path was read but the content has changed since.
    Stale,
    /// The recorded hash matches the current content.
    Current,
}

#[derive(Debug, Default)]
pub struct FileReadTracker {
    entries: HashMap<PathBuf, String>,
}

impl FileReadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `path` was read while holding `content`.
    pub fn record(&mut self, path: &Path, content: &str) {
        self.entries
            .insert(canonical(path), content_hash(content));
    }

    /// Compare the current content of `path` against the recorded hash.
    pub fn status(&self, path: &Path, current_content: &str) -> TrackerStatus {
        match self.entries.get(&canonical(path)) {
            None => TrackerStatus::Unread,
            Some(recorded) if *recorded == content_hash(current_content) => TrackerStatus::Current,
            Some(_) => TrackerStatus::Stale,
        }
    }

    /// Drop the entry after a write the agent did not read back.
    pub fn invalidate(&mut self, path: &Path) {
        self.entries.remove(&canonical(path));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unread_path_is_unread() {
        let tracker = FileReadTracker::new();
        assert_eq!(
            tracker.status(Path::new("/tmp/never"), "anything"),
            TrackerStatus::Unread
        );
    }

    #[test]
    fn recorded_content_is_current_until_it_changes() {
        let mut tracker = FileReadTracker::new();
        let path = Path::new("/tmp/natshell-tracker-test");
        tracker.record(path, "version 1");
        assert_eq!(tracker.status(path, "version 1"), TrackerStatus::Current);
        assert_eq!(tracker.status(path, "version 2"), TrackerStatus::Stale);
    }

    #[test]
    fn invalidate_returns_to_unread() {
        let mut tracker = FileReadTracker::new();
        let path = Path::new("/tmp/natshell-tracker-test");
        tracker.record(path, "content");
        tracker.invalidate(path);
        assert_eq!(tracker.status(path, "content"), TrackerStatus::Unread);
    }

    #[test]
    fn clear_resets_everything() {
        let mut tracker = FileReadTracker::new();
        tracker.record(Path::new("/a"), "1");
        tracker.record(Path::new("/b"), "2");
        tracker.clear();
        assert_eq!(tracker.status(Path::new("/a"), "1"), TrackerStatus::Unread);
        assert_eq!(tracker.status(Path::new("/b"), "2"), TrackerStatus::Unread);
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }
}
