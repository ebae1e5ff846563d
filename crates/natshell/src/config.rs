//! Configuration loading and persistence.
//!
//! A single TOML document at `~/.config/natshell/config.toml` (or the path
//! given with `--config`). Unknown keys are ignored, every section has
//! working defaults, and the explicit persistence actions rewrite the file
//! through an atomic rename so a crash never leaves a half-written config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NatShellConfig {
    pub model: ModelConfig,
    pub remote: RemoteConfig,
    pub engine: EngineConfig,
    pub agent: AgentConfig,
    pub safety: SafetyConfig,
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to a model file, or "auto" to use the default download.
    pub path: String,
    pub hf_repo: String,
    pub hf_file: String,
    /// 0 = auto-detect from the model-file name.
    pub n_ctx: u32,
    pub n_threads: u32,
    pub n_gpu_layers: i32,
    pub main_gpu: i32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "auto".to_string(),
            hf_repo: "Qwen/Qwen3-4B-GGUF".to_string(),
            hf_file: "Qwen3-4B-Q4_K_M.gguf".to_string(),
            n_ctx: 0,
            n_threads: 0,
            n_gpu_layers: -1,
            main_gpu: -1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RemoteConfig {
    pub url: Option<String>,
    pub model: String,
    pub api_key: String,
    /// 0 = use the remote default.
    pub n_ctx: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnginePreference {
    #[default]
    Auto,
    Local,
    Remote,
}

impl std::fmt::Display for EnginePreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnginePreference::Auto => write!(f, "auto"),
            EnginePreference::Local => write!(f, "local"),
            EnginePreference::Remote => write!(f, "remote"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub preferred: EnginePreference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// 0 = scale with the context window.
    pub max_steps: u32,
    /// Step budget while executing a saved plan.
    pub plan_max_steps: u32,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Extra tokens held back from the context budget. 0 = default margin.
    pub context_reserve: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 0,
            plan_max_steps: 35,
            temperature: 0.3,
            max_tokens: 2048,
            context_reserve: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SafetyMode {
    #[default]
    Confirm,
    Warn,
    Yolo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub mode: SafetyMode,
    pub always_confirm: Vec<String>,
    pub blocked: Vec<String>,
    pub sensitive_paths: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            mode: SafetyMode::Confirm,
            always_confirm: default_always_confirm(),
            blocked: default_blocked(),
            sensitive_paths: default_sensitive_paths(),
        }
    }
}

/// Patterns that always require user confirmation.
pub fn default_always_confirm() -> Vec<String> {
    [
        r"^rm\s",
        r"^sudo\s",
        r"^dd\s",
        r"^mkfs",
        r"^shutdown",
        r"^reboot",
        r"^systemctl\s+(stop|disable|mask|restart|enable|start)",
        r"^chmod\s+[0-7]*7",
        r"^chown",
        r"\|\s*tee\s",
        r">\s*/etc/",
        r"^kill",
        r"^wipefs",
        r"^fdisk",
        r"^parted",
        r"^apt\s+(install|remove|purge|autoremove)",
        r"^dnf\s+(install|remove|erase)",
        r"^pacman\s+-[SRU]",
        r"^pip\s+install",
        r"^docker\s+(rm|rmi|stop|kill|system\s+prune)",
        r"^iptables",
        r"^ufw",
        r"^crontab",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Patterns that are refused outright, in declared order.
pub fn default_blocked() -> Vec<String> {
    [
        r":\(\)\{ :\|:& \};:",
        r"^rm\s+-[rR]f\s+/\s*$",
        r"^rm\s+-[rR]f\s+/\*",
        r"^mv\s+/\s",
        r"^dd\s+.*of=/dev/[sh]d[a-z]\s*$",
        r"^mkfs.*\s/dev/[sh]d[a-z][0-9]?\s*$",
        r"> /dev/[sh]d[a-z]",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Path fragments that make `read_file` (and yolo-mode `edit_file`) require
/// confirmation.
pub fn default_sensitive_paths() -> Vec<String> {
    [
        "/.ssh/",
        "/id_rsa",
        "/id_ed25519",
        "/etc/shadow",
        "/etc/sudoers",
        "/proc/self/environ",
        ".env",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub dir: Option<PathBuf>,
    pub max_per_file: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_per_file: 10,
        }
    }
}

/// Resolve the config file location: explicit path, else the XDG default.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("natshell")
            .join("config.toml"),
    }
}

/// Directory for downloaded models.
pub fn models_dir() -> PathBuf {
    data_dir().join("models")
}

/// NatShell's slice of the XDG data directory.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("natshell")
}

/// Load configuration, merging the user file over defaults. Missing files
/// are fine; malformed TOML is not.
pub fn load(path: &Path) -> Result<NatShellConfig> {
    let mut config = if path.exists() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("malformed config {}", path.display()))?
    } else {
        NatShellConfig::default()
    };

    if let Ok(key) = std::env::var("NATSHELL_API_KEY") {
        if !key.is_empty() {
            config.remote.api_key = key;
        }
    }

    warn_on_exposed_key(&config, path);
    Ok(config)
}

/// A config file that holds an API key and is readable by group or world is
/// one `cat` away from credential theft.
fn warn_on_exposed_key(config: &NatShellConfig, path: &Path) {
    if config.remote.api_key.is_empty() || !path.exists() {
        return;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = std::fs::metadata(path) {
            let mode = meta.permissions().mode() & 0o777;
            if mode & 0o077 != 0 {
                warn!(
                    "config file {} has permissive mode {:04o} and contains an API key; run: chmod 600 {}",
                    path.display(),
                    mode,
                    path.display()
                );
            }
        }
    }
}

/// Persist the engine preference, leaving every other key untouched.
pub fn save_engine_preference(path: &Path, preferred: EnginePreference) -> Result<()> {
    update_document(path, "engine", "preferred", preferred.to_string())
}

/// Persist the default remote model name.
pub fn save_remote_model(path: &Path, model: &str) -> Result<()> {
    update_document(path, "remote", "model", model.to_string())
}

fn update_document(path: &Path, section: &str, key: &str, value: String) -> Result<()> {
    let mut doc: toml::Table = if path.exists() {
        let text = std::fs::read_to_string(path)?;
        text.parse().unwrap_or_default()
    } else {
        toml::Table::new()
    };

    let entry = doc
        .entry(section.to_string())
        .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    if !entry.is_table() {
        *entry = toml::Value::Table(toml::Table::new());
    }
    if let Some(table) = entry.as_table_mut() {
        table.insert(key.to_string(), toml::Value::String(value));
    }

    let rendered = toml::to_string_pretty(&doc)?;
    write_atomic(path, rendered.as_bytes())
}

/// Write via a temp file in the same directory plus rename, so readers only
/// ever see a complete document.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.flush()?;
    temp.persist(path)
        .map_err(|err| anyhow::anyhow!("failed to persist {}: {}", path.display(), err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_sensible() {
        let config = NatShellConfig::default();
        assert_eq!(config.model.path, "auto");
        assert_eq!(config.safety.mode, SafetyMode::Confirm);
        assert!(!config.safety.blocked.is_empty());
        assert_eq!(config.backup.max_per_file, 10);
        assert_eq!(config.agent.plan_max_steps, 35);
    }

    #[test]
    fn loads_partial_config_over_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[remote]\nurl = \"http://box:8080/v1\"\nmodel = \"qwen3:8b\"\n\n[safety]\nmode = \"yolo\"\n",
        )
        .unwrap();
        let config = load(&path).unwrap();
        assert_eq!(config.remote.url.as_deref(), Some("http://box:8080/v1"));
        assert_eq!(config.remote.model, "qwen3:8b");
        assert_eq!(config.safety.mode, SafetyMode::Yolo);
        // Untouched sections keep defaults.
        assert_eq!(config.model.path, "auto");
        assert!(!config.safety.blocked.is_empty());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.model.path, "auto");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not [valid toml").unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn engine_preference_roundtrip_preserves_other_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[remote]\nmodel = \"kept\"\n").unwrap();

        save_engine_preference(&path, EnginePreference::Remote).unwrap();
        let config = load(&path).unwrap();
        assert_eq!(config.engine.preferred, EnginePreference::Remote);
        assert_eq!(config.remote.model, "kept");

        save_remote_model(&path, "qwen3:14b").unwrap();
        let config = load(&path).unwrap();
        assert_eq!(config.engine.preferred, EnginePreference::Remote);
        assert_eq!(config.remote.model, "qwen3:14b");
    }

    #[test]
    fn config_write_then_read_preserves_recognized_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = NatShellConfig::default();
        config.agent.max_steps = 42;
        config.agent.temperature = 0.7;
        config.safety.mode = SafetyMode::Warn;
        config.remote.model = "m".into();
        config.backup.max_per_file = 3;

        write_atomic(&path, toml::to_string_pretty(&config).unwrap().as_bytes()).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.agent.max_steps, 42);
        assert_eq!(loaded.agent.temperature, 0.7);
        assert_eq!(loaded.safety.mode, SafetyMode::Warn);
        assert_eq!(loaded.remote.model, "m");
        assert_eq!(loaded.backup.max_per_file, 3);
    }

    #[test]
    fn env_var_overrides_api_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[remote]\napi_key = \"from-file\"\n").unwrap();
        std::env::set_var("NATSHELL_API_KEY", "from-env");
        let config = load(&path).unwrap();
        std::env::remove_var("NATSHELL_API_KEY");
        assert_eq!(config.remote.api_key, "from-env");
    }
}
