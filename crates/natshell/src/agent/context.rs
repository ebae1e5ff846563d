//! System context injected into the system prompt.
//!
//! The struct is the interface: full population (disks, network probes,
//! service lists) is the platform layer's job. The core only fills in
//! what it can read without spawning anything.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Macos,
    Wsl,
}

impl Platform {
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            return Platform::Macos;
        }
        // WSL kernels identify themselves in /proc/version.
        if std::fs::read_to_string("/proc/version")
            .map(|v| v.to_lowercase().contains("microsoft"))
            .unwrap_or(false)
        {
            return Platform::Wsl;
        }
        Platform::Linux
    }

    pub fn role_description(&self) -> &'static str {
        match self {
            Platform::Macos => "macOS system administration and coding assistant",
            Platform::Wsl => "Linux (WSL) system administration and coding assistant",
            Platform::Linux => "Linux system administration and coding assistant",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskInfo {
    pub mount: String,
    pub total: String,
    pub use_percent: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetInfo {
    pub name: String,
    pub ip: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemContext {
    pub hostname: String,
    pub distro: String,
    pub kernel: String,
    pub arch: String,
    pub cpu: String,
    pub ram_total_gb: f64,
    pub username: String,
    pub has_sudo: bool,
    pub shell: String,
    pub package_manager: String,
    pub cwd: String,
    pub disks: Vec<DiskInfo>,
    pub network: Vec<NetInfo>,
    pub installed_tools: Vec<(String, bool)>,
    pub running_services: Vec<String>,
    pub containers: Vec<String>,
}

impl SystemContext {
    /// The cheap subset available without running anything: environment,
    /// target facts, and a couple of well-known files.
    pub fn minimal() -> Self {
        let hostname = std::env::var("HOSTNAME")
            .ok()
            .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
            .map(|h| h.trim().to_string())
            .unwrap_or_default();
        let distro = std::fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|text| {
                text.lines()
                    .find(|line| line.starts_with("PRETTY_NAME="))
                    .map(|line| line.trim_start_matches("PRETTY_NAME=").trim_matches('"').to_string())
            })
            .unwrap_or_else(|| std::env::consts::OS.to_string());
        Self {
            hostname,
            distro,
            arch: std::env::consts::ARCH.to_string(),
            username: std::env::var("USER").unwrap_or_default(),
            shell: std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string()),
            cwd: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            ..Default::default()
        }
    }

    /// Compact text block for the `<system_info>` section of the prompt.
    pub fn to_prompt_text(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "Host: {} | {} | {} | {}",
            self.hostname, self.distro, self.kernel, self.arch
        ));
        if !self.cpu.is_empty() || self.ram_total_gb > 0.0 {
            lines.push(format!(
                "CPU: {} | RAM: {:.1}GB total",
                self.cpu, self.ram_total_gb
            ));
        }
        lines.push(format!(
            "User: {} (sudo: {}) | Shell: {} | Pkg: {}",
            self.username,
            if self.has_sudo { "yes" } else { "no" },
            self.shell,
            self.package_manager
        ));
        lines.push(format!("CWD: {}", self.cwd));

        if !self.disks.is_empty() {
            let parts: Vec<String> = self
                .disks
                .iter()
                .map(|d| format!("{} {} ({} used)", d.mount, d.total, d.use_percent))
                .collect();
            lines.push(format!("Disks: {}", parts.join(", ")));
        }
        if !self.network.is_empty() {
            let parts: Vec<String> = self
                .network
                .iter()
                .map(|n| format!("{} {}", n.name, n.ip))
                .collect();
            lines.push(format!("Network: {}", parts.join(" | ")));
        }
        if !self.installed_tools.is_empty() {
            let parts: Vec<String> = self
                .installed_tools
                .iter()
                .map(|(name, present)| format!("{name}{}", if *present { "+" } else { "-" }))
                .collect();
            lines.push(format!("Tools: {}", parts.join(" ")));
        }
        if !self.containers.is_empty() {
            let shown: Vec<&str> = self.containers.iter().take(10).map(String::as_str).collect();
            lines.push(format!("Containers: {}", shown.join(", ")));
        }
        if !self.running_services.is_empty() {
            let shown: Vec<&str> = self
                .running_services
                .iter()
                .take(15)
                .map(String::as_str)
                .collect();
            lines.push(format!("Services: {}", shown.join(", ")));
        }
        lines.join("\n")
    }
}
