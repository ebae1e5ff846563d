//! Sudo credential cache with a five-minute lease.

use std::time::{Duration, Instant};

/// How long a cached password stays usable.
pub const SUDO_TTL: Duration = Duration::from_secs(300);

/// Phrases in sudo's stderr that mean it wanted a password and could not
/// get one (or got a wrong one).
const NEEDS_PASSWORD_MARKERS: &[&str] = &[
    "sudo: a terminal is required to read the password",
    "sudo: a password is required",
    "sudo: no tty present and no askpass program specified",
    "Sorry, try again",
    "incorrect password attempt",
];

/// Cached sudo credential. Any use past the TTL discards the credential so
/// the next sudo-carrying command re-prompts.
pub struct SudoCache {
    entry: Option<(String, Instant)>,
}

impl SudoCache {
    pub fn new() -> Self {
        Self { entry: None }
    }

    /// The cached password, or `None` if absent or expired. Expired
    /// entries are dropped on access.
    pub fn password(&mut self) -> Option<&str> {
        if let Some((_, acquired_at)) = &self.entry {
            if acquired_at.elapsed() > SUDO_TTL {
                self.entry = None;
            }
        }
        self.entry.as_ref().map(|(password, _)| password.as_str())
    }

    pub fn store(&mut self, password: String) {
        self.entry = Some((password, Instant::now()));
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    #[cfg(test)]
    pub fn backdate(&mut self, age: Duration) {
        if let Some((_, acquired_at)) = &mut self.entry {
            *acquired_at = Instant::now() - age;
        }
    }
}

impl Default for SudoCache {
    fn default() -> Self {
        Self::new()
    }
}

// The password must never leak through a debug format.
impl std::fmt::Debug for SudoCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SudoCache")
            .field("cached", &self.entry.is_some())
            .finish()
    }
}

/// True if a failed command's stderr indicates sudo authentication failed.
pub fn indicates_sudo_auth_failure(exit_code: i32, stderr: &str) -> bool {
    if exit_code == 0 {
        return false;
    }
    NEEDS_PASSWORD_MARKERS
        .iter()
        .any(|marker| stderr.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_password_is_returned() {
        let mut cache = SudoCache::new();
        cache.store("hunter2".into());
        assert_eq!(cache.password(), Some("hunter2"));
    }

    #[test]
    fn expired_password_is_dropped() {
        let mut cache = SudoCache::new();
        cache.store("hunter2".into());
        cache.backdate(SUDO_TTL + Duration::from_secs(1));
        assert_eq!(cache.password(), None);
        // And it stays gone.
        assert_eq!(cache.password(), None);
    }

    #[test]
    fn invalidate_clears_immediately() {
        let mut cache = SudoCache::new();
        cache.store("hunter2".into());
        cache.invalidate();
        assert_eq!(cache.password(), None);
    }

    #[test]
    fn debug_never_shows_the_password() {
        let mut cache = SudoCache::new();
        cache.store("hunter2".into());
        let rendered = format!("{cache:?}");
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn auth_failure_detection() {
        assert!(indicates_sudo_auth_failure(
            1,
            "sudo: a terminal is required to read the password"
        ));
        assert!(indicates_sudo_auth_failure(1, "Sorry, try again.\nsudo: 1 incorrect password attempt"));
        assert!(!indicates_sudo_auth_failure(0, "sudo: a password is required"));
        assert!(!indicates_sudo_auth_failure(1, "No such file or directory"));
    }
}
