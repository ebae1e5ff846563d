//! Pre-edit backups with undo.
//!
//! Every `edit_file` and overwriting `write_file` snapshots the target
//! first. The backup directory is the arena: filenames encode the
//! original basename and a millisecond timestamp, pruning is a
//! sort-and-trim on write, and `/undo` restores the newest snapshot for a
//! path and reports the diff.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct BackupRecord {
    pub original: PathBuf,
    pub backup: PathBuf,
    pub timestamp_ms: i64,
}

pub struct BackupManager {
    dir: PathBuf,
    max_per_file: usize,
    history: Vec<BackupRecord>,
}

impl BackupManager {
    pub fn new(dir: impl Into<PathBuf>, max_per_file: usize) -> Self {
        Self {
            dir: dir.into(),
            max_per_file: max_per_file.max(1),
            history: Vec::new(),
        }
    }

    pub fn default_dir() -> PathBuf {
        crate::config::data_dir().join("backups")
    }

    #[allow(dead_code)]
    pub fn history(&self) -> &[BackupRecord] {
        &self.history
    }

    /// Snapshot `path` before a mutation. Returns `None` when there is
    /// nothing to back up (no existing file). Symlinked sources and
    /// symlinks anywhere on the backup destination path are refused —
    /// both are exfiltration vectors, not edit targets.
    pub fn backup(&mut self, path: &Path) -> Result<Option<PathBuf>> {
        if path
            .symlink_metadata()
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
        {
            bail!("refusing to back up symlink: {}", path.display());
        }
        if !path.is_file() {
            return Ok(None);
        }
        let source = path
            .canonicalize()
            .with_context(|| format!("cannot resolve {}", path.display()))?;

        self.ensure_dir()?;
        self.reject_symlink_components()?;

        let basename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let backup_path = self.dir.join(format!("{basename}.{timestamp_ms}.bak"));

        std::fs::copy(&source, &backup_path)
            .with_context(|| format!("failed to back up {}", source.display()))?;
        debug!("backed up {} -> {}", source.display(), backup_path.display());

        self.history.push(BackupRecord {
            original: source.clone(),
            backup: backup_path.clone(),
            timestamp_ms,
        });
        self.prune(&basename);
        Ok(Some(backup_path))
    }

    /// Restore the most recent backup and report a diff of what changed.
    pub fn undo_last(&mut self) -> Result<String> {
        let record = match self.history.pop() {
            Some(record) => record,
            None => bail!("no backups to undo"),
        };
        self.restore(record)
    }

    /// Restore the newest backup taken for a specific original path.
    pub fn undo_for(&mut self, original: &Path) -> Result<String> {
        let needle = original
            .canonicalize()
            .unwrap_or_else(|_| original.to_path_buf());
        let position = self
            .history
            .iter()
            .rposition(|record| record.original == needle);
        match position {
            Some(index) => {
                let record = self.history.remove(index);
                self.restore(record)
            }
            None => bail!("no backups recorded for {}", original.display()),
        }
    }

    fn restore(&self, record: BackupRecord) -> Result<String> {
        if !record.backup.exists() {
            bail!("backup file missing: {}", record.backup.display());
        }
        let before = std::fs::read_to_string(&record.original).unwrap_or_default();
        let after = std::fs::read_to_string(&record.backup)
            .with_context(|| format!("cannot read backup {}", record.backup.display()))?;

        std::fs::write(&record.original, &after)
            .with_context(|| format!("failed to restore {}", record.original.display()))?;
        std::fs::remove_file(&record.backup).ok();

        let diff = similar::TextDiff::from_lines(before.as_str(), after.as_str())
            .unified_diff()
            .header("current", "restored")
            .to_string();
        Ok(format!(
            "Restored {} from backup.\n{}",
            record.original.display(),
            diff
        ))
    }

    /// Keep only the newest `max_per_file` backups per basename.
    fn prune(&self, basename: &str) {
        let prefix = format!("{basename}.");
        let mut backups: Vec<PathBuf> = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| {
                    path.file_name()
                        .and_then(|n| n.to_str())
                        .map(|name| name.starts_with(&prefix) && name.ends_with(".bak"))
                        .unwrap_or(false)
                })
                .collect(),
            Err(_) => return,
        };
        if backups.len() <= self.max_per_file {
            return;
        }
        // The timestamp is fixed-width for any contemporary date, so the
        // lexicographic order is the chronological order.
        backups.sort();
        let excess = backups.len() - self.max_per_file;
        for old in &backups[..excess] {
            if let Err(err) = std::fs::remove_file(old) {
                warn!("failed to prune backup {}: {err}", old.display());
            }
        }
    }

    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("cannot create backup dir {}", self.dir.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(&self.dir, perms)?;
        }
        Ok(())
    }

    fn reject_symlink_components(&self) -> Result<()> {
        let mut probe = PathBuf::new();
        for component in self.dir.components() {
            probe.push(component);
            if let Ok(meta) = probe.symlink_metadata() {
                if meta.file_type().is_symlink() {
                    bail!(
                        "backup destination contains a symlink component: {}",
                        probe.display()
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> BackupManager {
        BackupManager::new(dir.path().join("backups"), 3)
    }

    #[test]
    fn backs_up_existing_files_only() {
        let dir = TempDir::new().unwrap();
        let mut backups = manager(&dir);

        let file = dir.path().join("notes.txt");
        assert!(backups.backup(&file).unwrap().is_none());

        std::fs::write(&file, "original").unwrap();
        let backup_path = backups.backup(&file).unwrap().unwrap();
        assert!(backup_path.exists());
        assert_eq!(std::fs::read_to_string(&backup_path).unwrap(), "original");
        let name = backup_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("notes.txt."));
        assert!(name.ends_with(".bak"));
    }

    #[test]
    fn undo_restores_byte_identical_content() {
        let dir = TempDir::new().unwrap();
        let mut backups = manager(&dir);
        let file = dir.path().join("config.ini");
        std::fs::write(&file, "key = old\n").unwrap();

        backups.backup(&file).unwrap();
        std::fs::write(&file, "key = new\n").unwrap();

        let message = backups.undo_last().unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "key = old\n");
        assert!(message.contains("Restored"));
        assert!(message.contains("-key = new"));
        assert!(message.contains("+key = old"));
    }

    #[test]
    fn undo_for_targets_a_specific_path() {
        let dir = TempDir::new().unwrap();
        let mut backups = manager(&dir);
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "a1").unwrap();
        std::fs::write(&b, "b1").unwrap();
        backups.backup(&a).unwrap();
        backups.backup(&b).unwrap();
        std::fs::write(&a, "a2").unwrap();
        std::fs::write(&b, "b2").unwrap();

        backups.undo_for(&a).unwrap();
        assert_eq!(std::fs::read_to_string(&a).unwrap(), "a1");
        assert_eq!(std::fs::read_to_string(&b).unwrap(), "b2");
    }

    #[test]
    fn undo_with_no_history_fails() {
        let dir = TempDir::new().unwrap();
        let mut backups = manager(&dir);
        assert!(backups.undo_last().is_err());
    }

    #[test]
    fn prunes_oldest_beyond_the_cap() {
        let dir = TempDir::new().unwrap();
        let mut backups = manager(&dir);
        let file = dir.path().join("data.txt");
        for i in 0..5 {
            std::fs::write(&file, format!("v{i}")).unwrap();
            backups.backup(&file).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let count = std::fs::read_dir(dir.path().join("backups"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "bak").unwrap_or(false))
            .count();
        assert_eq!(count, 3);
    }

    #[cfg(unix)]
    #[test]
    fn refuses_symlinked_sources() {
        let dir = TempDir::new().unwrap();
        let mut backups = manager(&dir);
        let target = dir.path().join("real.txt");
        std::fs::write(&target, "content").unwrap();
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        assert!(backups.backup(&link).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn refuses_symlinked_backup_destination() {
        let dir = TempDir::new().unwrap();
        let real = dir.path().join("real-backups");
        std::fs::create_dir(&real).unwrap();
        let link = dir.path().join("linked-backups");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let mut backups = BackupManager::new(&link, 3);
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "content").unwrap();
        assert!(backups.backup(&file).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn backup_dir_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let mut backups = manager(&dir);
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "content").unwrap();
        backups.backup(&file).unwrap();
        let mode = std::fs::metadata(dir.path().join("backups"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o700);
    }
}
