//! Command risk classification — pattern-based, deterministic, fast.
//!
//! Every tool call passes through here before it can run. Shell commands
//! are matched against the blocked list as a whole string first (fork
//! bombs and pipe-spanning patterns must not be missed by per-segment
//! splitting), then split on top-level chaining operators and classified
//! segment by segment. The classifier holds no mutable state; the same
//! command and policy always produce the same answer.

use crate::config::{SafetyConfig, SafetyMode};
use anyhow::{Context, Result};
use llm::ToolCall;
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

/// Commands larger than this are not scanned; they get a blanket Confirm.
const MAX_SCAN_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Risk {
    Safe,
    Confirm,
    Blocked,
}

/// A risk level plus the reason it was assigned. For blocked commands the
/// reason is the matching pattern, verbatim, so the model can see exactly
/// what it tripped.
#[derive(Debug, Clone)]
pub struct Classification {
    pub risk: Risk,
    pub reason: String,
    /// Set when `warn` mode downgraded a Confirm; the loop surfaces it.
    pub warning: Option<String>,
}

impl Classification {
    fn safe() -> Self {
        Self {
            risk: Risk::Safe,
            reason: String::new(),
            warning: None,
        }
    }

    fn confirm(reason: impl Into<String>) -> Self {
        Self {
            risk: Risk::Confirm,
            reason: reason.into(),
            warning: None,
        }
    }

    fn blocked(reason: impl Into<String>) -> Self {
        Self {
            risk: Risk::Blocked,
            reason: reason.into(),
            warning: None,
        }
    }
}

fn system_path_redirect_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r">\s*/(?:etc|boot|usr|var/lib)/").unwrap())
}

pub struct SafetyClassifier {
    mode: SafetyMode,
    blocked: Vec<Regex>,
    always_confirm: Vec<Regex>,
    sensitive_paths: Vec<String>,
}

impl SafetyClassifier {
    pub fn new(config: &SafetyConfig) -> Result<Self> {
        let blocked = compile_all(&config.blocked).context("invalid safety.blocked pattern")?;
        let always_confirm =
            compile_all(&config.always_confirm).context("invalid safety.always_confirm pattern")?;
        Ok(Self {
            mode: config.mode,
            blocked,
            always_confirm,
            sensitive_paths: config.sensitive_paths.clone(),
        })
    }

    /// Classify a full shell command string.
    pub fn classify_command(&self, command: &str) -> Classification {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Classification::blocked("empty command");
        }
        if command.len() > MAX_SCAN_BYTES {
            return self.apply_mode(Classification::confirm("command exceeds 64 KiB"));
        }

        // Whole-string Blocked sweep first; nothing below may override it.
        for pattern in &self.blocked {
            if pattern.is_match(command) {
                warn!("blocked command: {command}");
                return Classification::blocked(pattern.as_str());
            }
        }

        let mut worst = Classification::safe();
        // Confirm patterns that span operators (pipes into tee, redirects)
        // only match the full string. They set a floor, never a ceiling:
        // the per-segment sweep below can still escalate to Blocked.
        for pattern in &self.always_confirm {
            if pattern.is_match(command) {
                worst = Classification::confirm(pattern.as_str());
                break;
            }
        }
        for segment in split_top_level(command) {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            for pattern in &self.blocked {
                if pattern.is_match(segment) {
                    warn!("blocked command segment: {segment}");
                    return Classification::blocked(pattern.as_str());
                }
            }
            if worst.risk == Risk::Confirm {
                continue;
            }
            if has_command_substitution(segment) {
                worst = Classification::confirm("command substitution is opaque to static checks");
                continue;
            }
            if let Some(reason) = self.segment_confirm_reason(segment) {
                worst = Classification::confirm(reason);
            }
        }
        self.apply_mode(worst)
    }

    fn segment_confirm_reason(&self, segment: &str) -> Option<String> {
        for pattern in &self.always_confirm {
            if pattern.is_match(segment) {
                return Some(pattern.as_str().to_string());
            }
        }
        if segment == "sudo" || segment.starts_with("sudo ") {
            return Some("runs with elevated privileges".to_string());
        }
        if system_path_redirect_re().is_match(segment) {
            return Some("redirects into a system path".to_string());
        }
        None
    }

    /// Classify any tool call. Non-shell tools have a fixed mapping; only
    /// `execute_shell` goes through the command grammar. Tools outside the
    /// built-in set fall back to their registration's confirmation hint.
    pub fn classify_tool_call(&self, call: &ToolCall, hint_requires_confirmation: bool) -> Classification {
        match call.name.as_str() {
            "execute_shell" => {
                let command = call.str_arg("command").unwrap_or("");
                self.classify_command(command)
            }
            "write_file" => self.apply_mode(Classification::confirm("writes a file")),
            "edit_file" => {
                let path = call.str_arg("path").unwrap_or("");
                // Sensitive paths stay Confirm even in yolo mode.
                if let Some(fragment) = self.sensitive_fragment(path) {
                    return Classification::confirm(format!("edits sensitive path ({fragment})"));
                }
                self.apply_mode(Classification::confirm("edits a file"))
            }
            "run_code" => self.apply_mode(Classification::confirm("executes arbitrary code")),
            "read_file" => {
                let path = call.str_arg("path").unwrap_or("");
                match self.sensitive_fragment(path) {
                    Some(fragment) => {
                        Classification::confirm(format!("reads sensitive path ({fragment})"))
                    }
                    None => Classification::safe(),
                }
            }
            "git_tool" => {
                let operation = call.str_arg("operation").unwrap_or("");
                if matches!(operation, "commit" | "stash") {
                    self.apply_mode(Classification::confirm("mutates repository state"))
                } else {
                    Classification::safe()
                }
            }
            // list_directory, search_files, natshell_help
            "list_directory" | "search_files" | "natshell_help" => Classification::safe(),
            _ if hint_requires_confirmation => {
                self.apply_mode(Classification::confirm("tool registration requires confirmation"))
            }
            _ => Classification::safe(),
        }
    }

    fn sensitive_fragment(&self, path: &str) -> Option<&str> {
        self.sensitive_paths
            .iter()
            .find(|fragment| path.contains(fragment.as_str()))
            .map(String::as_str)
    }

    /// Mode post-processing: `warn` and `yolo` downgrade Confirm to Safe
    /// (warn keeps the reason as a warning); nothing ever unblocks.
    fn apply_mode(&self, classification: Classification) -> Classification {
        if classification.risk != Risk::Confirm {
            return classification;
        }
        match self.mode {
            SafetyMode::Confirm => classification,
            SafetyMode::Yolo => Classification::safe(),
            SafetyMode::Warn => Classification {
                risk: Risk::Safe,
                reason: String::new(),
                warning: Some(classification.reason),
            },
        }
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).with_context(|| format!("pattern {p:?}")))
        .collect()
}

/// True if the segment contains `$(…)` or backtick expansion.
fn has_command_substitution(segment: &str) -> bool {
    segment.contains('`') || segment.contains("$(")
}

/// Split a command on top-level `&&`, `||`, `;`, `&`, `|`. Operators inside
/// single or double quotes, backticks, or `$(…)` do not split.
pub fn split_top_level(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = command.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    let mut in_backtick = false;
    let mut subshell_depth = 0usize;

    while let Some(ch) = chars.next() {
        if in_single {
            current.push(ch);
            if ch == '\'' {
                in_single = false;
            }
            continue;
        }
        match ch {
            '\\' => {
                current.push(ch);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '\'' if !in_double => {
                in_single = true;
                current.push(ch);
            }
            '"' => {
                in_double = !in_double;
                current.push(ch);
            }
            '`' => {
                in_backtick = !in_backtick;
                current.push(ch);
            }
            '$' if chars.peek() == Some(&'(') => {
                subshell_depth += 1;
                current.push(ch);
                current.push(chars.next().unwrap_or('('));
            }
            ')' if subshell_depth > 0 => {
                subshell_depth -= 1;
                current.push(ch);
            }
            '&' | '|' | ';' if !in_double && !in_backtick && subshell_depth == 0 => {
                // Two-character forms consume their partner.
                if (ch == '&' || ch == '|') && chars.peek() == Some(&ch) {
                    chars.next();
                }
                segments.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    segments.push(current);
    segments
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SafetyConfig;
    use serde_json::json;

    fn classifier() -> SafetyClassifier {
        SafetyClassifier::new(&SafetyConfig::default()).unwrap()
    }

    fn classifier_with_mode(mode: SafetyMode) -> SafetyClassifier {
        let config = SafetyConfig {
            mode,
            ..SafetyConfig::default()
        };
        SafetyClassifier::new(&config).unwrap()
    }

    fn risk(command: &str) -> Risk {
        classifier().classify_command(command).risk
    }

    fn shell_call(command: &str) -> ToolCall {
        ToolCall::new("execute_shell", json!({ "command": command }))
    }

    // ── splitting ───────────────────────────────────────────────────────

    #[test]
    fn splits_all_chaining_operators() {
        let segments = split_top_level("a && b || c ; d & e | f");
        assert_eq!(segments, vec!["a", "b", "c", "d", "e", "f"]);
    }

    #[test]
    fn quotes_protect_operators() {
        assert_eq!(
            split_top_level(r#"echo "a && b" ; ls"#),
            vec![r#"echo "a && b""#, "ls"]
        );
        assert_eq!(
            split_top_level("echo 'x | y'"),
            vec!["echo 'x | y'"]
        );
    }

    #[test]
    fn subshells_do_not_split() {
        assert_eq!(
            split_top_level("echo $(ls | wc -l) && pwd"),
            vec!["echo $(ls | wc -l)", "pwd"]
        );
        assert_eq!(
            split_top_level("echo `date; id`"),
            vec!["echo `date; id`"]
        );
    }

    // ── blocked ─────────────────────────────────────────────────────────

    #[test]
    fn fork_bomb_is_blocked() {
        assert_eq!(risk(":(){ :|:& };:"), Risk::Blocked);
    }

    #[test]
    fn rm_rf_root_is_blocked() {
        assert_eq!(risk("rm -rf /"), Risk::Blocked);
        assert_eq!(risk("rm -Rf /"), Risk::Blocked);
        assert_eq!(risk("rm -rf /*"), Risk::Blocked);
    }

    #[test]
    fn disk_writes_are_blocked() {
        assert_eq!(risk("dd if=/dev/zero of=/dev/sda"), Risk::Blocked);
        assert_eq!(risk("mkfs.ext4 /dev/sda1"), Risk::Blocked);
        assert_eq!(risk("> /dev/sda"), Risk::Blocked);
        assert_eq!(risk("mv / /tmp"), Risk::Blocked);
    }

    #[test]
    fn blocked_wins_inside_a_chain() {
        assert_eq!(risk("ls && rm -rf /"), Risk::Blocked);
        assert_eq!(risk("echo hi; rm -rf /*; echo bye"), Risk::Blocked);
    }

    #[test]
    fn blocked_primacy_beats_confirm_matches() {
        // The leading segment matches always-confirm patterns; the blocked
        // segment further down must still win.
        assert_eq!(risk("rm foo.txt && rm -rf /"), Risk::Blocked);
        assert_eq!(risk("sudo ls && rm -rf /"), Risk::Blocked);
        assert_eq!(risk("echo x | tee /tmp/out; rm -rf /*"), Risk::Blocked);
    }

    #[test]
    fn empty_command_is_blocked() {
        assert_eq!(risk(""), Risk::Blocked);
        assert_eq!(risk("   "), Risk::Blocked);
    }

    #[test]
    fn blocked_reason_carries_the_pattern() {
        let classification = classifier().classify_command("rm -rf /");
        assert_eq!(classification.reason, r"^rm\s+-[rR]f\s+/\s*$");
    }

    // ── confirm ─────────────────────────────────────────────────────────

    #[test]
    fn destructive_commands_need_confirmation() {
        assert_eq!(risk("rm file.txt"), Risk::Confirm);
        assert_eq!(risk("sudo apt update"), Risk::Confirm);
        assert_eq!(risk("dd if=a of=b"), Risk::Confirm);
        assert_eq!(risk("mkfs.ext4 /dev/loop0"), Risk::Confirm);
        assert_eq!(risk("systemctl restart sshd"), Risk::Confirm);
        assert_eq!(risk("kill -9 1234"), Risk::Confirm);
        assert_eq!(risk("apt install nginx"), Risk::Confirm);
        assert_eq!(risk("pip install requests"), Risk::Confirm);
        assert_eq!(risk("docker rm mycontainer"), Risk::Confirm);
        assert_eq!(risk("iptables -A INPUT -j DROP"), Risk::Confirm);
        assert_eq!(risk("crontab -e"), Risk::Confirm);
        assert_eq!(risk("echo x | tee /tmp/out"), Risk::Confirm);
        assert_eq!(risk("echo x > /etc/hostname"), Risk::Confirm);
        assert_eq!(risk("echo x > /boot/grub/grub.cfg"), Risk::Confirm);
    }

    #[test]
    fn chained_confirm_taints_the_whole_command() {
        assert_eq!(risk("ls && rm foo.txt"), Risk::Confirm);
        assert_eq!(risk("df -h; sudo reboot"), Risk::Confirm);
    }

    #[test]
    fn command_substitution_forces_confirm() {
        assert_eq!(risk("echo $(cat /etc/passwd)"), Risk::Confirm);
        assert_eq!(risk("echo `id`"), Risk::Confirm);
    }

    #[test]
    fn oversized_command_gets_confirm() {
        let huge = format!("echo {}", "a".repeat(65 * 1024));
        assert_eq!(risk(&huge), Risk::Confirm);
    }

    // ── safe ────────────────────────────────────────────────────────────

    #[test]
    fn everyday_commands_are_safe() {
        for cmd in [
            "ls -la",
            "cat /etc/hostname",
            "df -h",
            "grep -r TODO .",
            "echo hello",
            "uname -a",
            "ps aux",
            "systemctl status nginx",
            "ip addr show",
            "apt list --installed",
            "docker ps",
        ] {
            assert_eq!(risk(cmd), Risk::Safe, "expected {cmd:?} to be safe");
        }
    }

    #[test]
    fn chained_safe_commands_stay_safe() {
        assert_eq!(risk("cd /tmp && ls | head -3"), Risk::Safe);
    }

    #[test]
    fn quoted_operators_do_not_leak_risk() {
        assert_eq!(risk(r#"echo "rm -rf /ok""#), Risk::Safe);
    }

    // ── determinism ─────────────────────────────────────────────────────

    #[test]
    fn classification_is_deterministic() {
        let c = classifier();
        for _ in 0..3 {
            assert_eq!(c.classify_command("sudo ls && df -h").risk, Risk::Confirm);
            assert_eq!(c.classify_command("ls").risk, Risk::Safe);
            assert_eq!(c.classify_command("rm -rf /").risk, Risk::Blocked);
        }
    }

    // ── tool calls ──────────────────────────────────────────────────────

    #[test]
    fn non_shell_tool_mapping() {
        let c = classifier();
        let confirm_calls = [
            ToolCall::new("write_file", json!({"path": "/tmp/x", "content": "hi"})),
            ToolCall::new("edit_file", json!({"path": "/tmp/x", "search": "a", "replace": "b"})),
            ToolCall::new("run_code", json!({"language": "python", "code": "print(1)"})),
            ToolCall::new("git_tool", json!({"operation": "commit", "args": "-m x"})),
        ];
        for call in &confirm_calls {
            assert_eq!(c.classify_tool_call(call, false).risk, Risk::Confirm, "{}", call.name);
        }
        let safe_calls = [
            ToolCall::new("read_file", json!({"path": "/etc/passwd"})),
            ToolCall::new("list_directory", json!({"path": "/"})),
            ToolCall::new("search_files", json!({"pattern": "TODO"})),
            ToolCall::new("natshell_help", json!({"topic": "overview"})),
            ToolCall::new("git_tool", json!({"operation": "status"})),
        ];
        for call in &safe_calls {
            assert_eq!(c.classify_tool_call(call, false).risk, Risk::Safe, "{}", call.name);
        }
    }

    #[test]
    fn sensitive_reads_require_confirmation() {
        let c = classifier();
        for path in ["/home/user/.ssh/config", "/etc/shadow", "/srv/app/.env"] {
            let call = ToolCall::new("read_file", json!({ "path": path }));
            assert_eq!(c.classify_tool_call(&call, false).risk, Risk::Confirm, "{path}");
        }
    }

    #[test]
    fn execute_shell_delegates_to_the_command_grammar() {
        let c = classifier();
        assert_eq!(c.classify_tool_call(&shell_call("rm foo"), false).risk, Risk::Confirm);
        assert_eq!(c.classify_tool_call(&shell_call("ls"), false).risk, Risk::Safe);
        assert_eq!(c.classify_tool_call(&shell_call("rm -rf /"), false).risk, Risk::Blocked);
    }

    // ── modes ───────────────────────────────────────────────────────────

    #[test]
    fn yolo_downgrades_confirm_but_never_blocked() {
        let c = classifier_with_mode(SafetyMode::Yolo);
        assert_eq!(c.classify_tool_call(&shell_call("rm foo"), false).risk, Risk::Safe);
        assert_eq!(c.classify_tool_call(&shell_call("rm -rf /"), false).risk, Risk::Blocked);
        let edit = ToolCall::new("edit_file", json!({"path": "/tmp/x", "search": "a", "replace": "b"}));
        assert_eq!(c.classify_tool_call(&edit, false).risk, Risk::Safe);
        let code = ToolCall::new("run_code", json!({"language": "python", "code": "1"}));
        assert_eq!(c.classify_tool_call(&code, false).risk, Risk::Safe);
    }

    #[test]
    fn yolo_never_unblocks_a_chained_block() {
        let c = classifier_with_mode(SafetyMode::Yolo);
        assert_eq!(c.classify_command("rm foo.txt && rm -rf /").risk, Risk::Blocked);
        assert_eq!(c.classify_command("sudo ls && rm -rf /").risk, Risk::Blocked);
    }

    #[test]
    fn yolo_keeps_sensitive_edit_paths_on_confirm() {
        let c = classifier_with_mode(SafetyMode::Yolo);
        let call = ToolCall::new(
            "edit_file",
            json!({"path": "/home/user/.env", "search": "a", "replace": "b"}),
        );
        assert_eq!(c.classify_tool_call(&call, false).risk, Risk::Confirm);
    }

    #[test]
    fn warn_downgrades_with_a_warning() {
        let c = classifier_with_mode(SafetyMode::Warn);
        let classification = c.classify_command("rm foo");
        assert_eq!(classification.risk, Risk::Safe);
        assert!(classification.warning.is_some());
        // Never unblocks.
        assert_eq!(c.classify_command("rm -rf /").risk, Risk::Blocked);
    }
}
