//! Shell execution — the primary tool for system interaction.

use super::{parse_args, Tool, ToolContext, ToolResult, ToolSpec};
use command_executor::{CommandExecutor, ExecRequest};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::info;

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_TIMEOUT_SECS: u64 = 300;

fn sudo_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bsudo\b").unwrap())
}

/// Known long-running commands and the minimum timeout they get when the
/// model did not ask for one. Closed set; extension would be a config
/// knob, not a code change here.
fn long_running_patterns() -> &'static [(Regex, u64)] {
    static TABLE: OnceLock<Vec<(Regex, u64)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        [
            // Network scanning and capture
            (r"\bnmap\b", 120),
            (r"\barp-scan\b", 120),
            (r"\btcpdump\b", 120),
            (r"\bnetdiscover\b", 120),
            (r"\bmasscan\b", 120),
            // Package management
            (r"\bapt\s+(install|upgrade|dist-upgrade|full-upgrade)\b", 300),
            (r"\bapt-get\s+(install|upgrade|dist-upgrade)\b", 300),
            (r"\bdnf\s+(install|update|upgrade)\b", 300),
            (r"\byum\s+(install|update)\b", 300),
            (r"\bpacman\s+-S", 300),
            (r"\bbrew\s+(install|upgrade)\b", 300),
            // Builds
            (r"\bmake\b", 300),
            (r"\bcargo\s+build\b", 300),
            (r"\bnpm\s+(install|ci)\b", 300),
            (r"\bpip\s+install\b", 300),
            (r"\bgcc\b|\bg\+\+\b", 120),
            (r"\brustc\b", 120),
            // Filesystem sweeps and transfers
            (r"\bfind\s+/", 120),
            (r"\bdu\s+.*-[a-zA-Z]*s", 120),
            (r"\brsync\b", 300),
            (r"\bwget\b|\bcurl\b.*-[oO]", 120),
            // Disk operations
            (r"\bdd\b", 300),
        ]
        .iter()
        .map(|(pattern, secs)| (Regex::new(pattern).unwrap(), *secs))
        .collect()
    })
}

fn min_timeout_for(command: &str) -> u64 {
    long_running_patterns()
        .iter()
        .filter(|(pattern, _)| pattern.is_match(command))
        .map(|(_, secs)| *secs)
        .max()
        .unwrap_or(0)
}

/// Models sometimes send numbers as strings; take whatever arrived.
pub(crate) fn coerce_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_f64().map(|f| f.max(0.0) as u64),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.max(0.0) as u64),
        _ => None,
    }
}

#[derive(Deserialize)]
struct ExecuteShellInput {
    command: String,
    #[serde(default)]
    timeout: Option<Value>,
    #[serde(default)]
    workdir: Option<String>,
}

pub struct ExecuteShellTool;

#[async_trait::async_trait]
impl Tool for ExecuteShellTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "execute_shell",
            description: "Execute a shell command on the user's system and return the output. \
                Use this to run any CLI command: check system state, install packages, \
                manage services, scan networks, analyze disk usage, process files, etc. \
                The command runs as the current user via bash. Use sudo when elevated \
                privileges are needed. Prefer single commands per call; for multi-step \
                operations, call this tool multiple times and observe results between steps.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The bash command to execute."
                    },
                    "timeout": {
                        "type": "integer",
                        "description": "Maximum seconds to wait for the command to complete. \
                            Default 60. Use higher values for long-running operations like \
                            network scans or package installs. Maximum 300."
                    },
                    "workdir": {
                        "type": "string",
                        "description": "Optional working directory for the command."
                    }
                },
                "required": ["command"]
            }),
            requires_confirmation: false,
        }
    }

    async fn execute(&self, context: &mut ToolContext<'_>, args: &Value) -> ToolResult {
        let input: ExecuteShellInput = match parse_args(&self.spec(), args) {
            Ok(input) => input,
            Err(failure) => return failure,
        };

        let mut timeout = coerce_u64(input.timeout.as_ref())
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .clamp(1, MAX_TIMEOUT_SECS);
        let min_timeout = min_timeout_for(&input.command);
        if min_timeout > timeout {
            info!("auto-raised timeout {timeout}s -> {min_timeout}s for long-running command");
            timeout = min_timeout.min(MAX_TIMEOUT_SECS);
        }

        // With a fresh credential, rewrite only the first sudo to read the
        // password from stdin.
        let sudo_password = if sudo_re().is_match(&input.command) {
            context.sudo.password().map(str::to_string)
        } else {
            None
        };
        let (command, stdin) = match &sudo_password {
            Some(password) => (
                sudo_re().replace(&input.command, "sudo -S").into_owned(),
                Some(format!("{password}\n")),
            ),
            None => (input.command.clone(), None),
        };

        // The password travels on stdin; the logged command never holds it.
        info!("executing: {} (timeout={timeout}s)", input.command);

        let mut request = ExecRequest::shell(command)
            .timeout(Duration::from_secs(timeout))
            .cancel_token(context.cancel.clone());
        if let Some(input_text) = stdin {
            request = request.stdin(input_text);
        }
        if let Some(dir) = &input.workdir {
            request = request.workdir(dir);
        }

        let output = match context.executor.execute(request).await {
            Ok(output) => output,
            Err(err) => {
                let message = err.to_string();
                let exit_code = if message.contains("failed to spawn") { 127 } else { 1 };
                return ToolResult::failure_with_code(
                    format!("Failed to execute command: {message}"),
                    exit_code,
                );
            }
        };

        if output.timed_out {
            return ToolResult::failure_with_code(
                format!("Command timed out after {timeout} seconds."),
                124,
            );
        }
        if output.cancelled {
            return ToolResult::failure_with_code("Command cancelled by the user.", 130);
        }

        let (stdout, stdout_truncated) = context.limits.truncate(&output.stdout);
        let (mut stderr, stderr_truncated) = context.limits.truncate(&output.stderr);

        // sudo -S echoes its password prompt to stderr.
        if sudo_password.is_some() {
            stderr = stderr
                .lines()
                .filter(|line| !line.starts_with("[sudo] password for"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string();
        }

        ToolResult {
            output: stdout,
            error: stderr,
            exit_code: output.exit_code,
            truncated: stdout_truncated || stderr_truncated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::ContextFixture;

    async fn run(fixture: &mut ContextFixture, args: Value) -> ToolResult {
        let mut context = fixture.context();
        ExecuteShellTool.execute(&mut context, &args).await
    }

    #[test]
    fn long_running_detection() {
        assert_eq!(min_timeout_for("nmap -sn 192.168.1.0/24"), 120);
        assert_eq!(min_timeout_for("apt install nginx"), 300);
        assert_eq!(min_timeout_for("make -j8"), 300);
        assert_eq!(min_timeout_for("ls -la"), 0);
    }

    #[test]
    fn timeout_coercion_tolerates_strings() {
        assert_eq!(coerce_u64(Some(&json!(90))), Some(90));
        assert_eq!(coerce_u64(Some(&json!("90"))), Some(90));
        assert_eq!(coerce_u64(Some(&json!("63.0"))), Some(63));
        assert_eq!(coerce_u64(Some(&json!([1]))), None);
        assert_eq!(coerce_u64(None), None);
    }

    #[tokio::test]
    async fn runs_a_command_and_captures_output() {
        let mut fixture = ContextFixture::new();
        let result = run(&mut fixture, json!({"command": "echo hello"})).await;
        assert!(result.is_success());
        assert_eq!(result.output.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_raised() {
        let mut fixture = ContextFixture::new();
        let result = run(&mut fixture, json!({"command": "false"})).await;
        assert!(!result.is_success());
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn respects_workdir() {
        let mut fixture = ContextFixture::new();
        let dir = fixture.dir.path().to_path_buf();
        let result = run(
            &mut fixture,
            json!({"command": "pwd", "workdir": dir.to_string_lossy()}),
        )
        .await;
        let expected = dir.canonicalize().unwrap();
        assert_eq!(result.output.trim(), expected.to_string_lossy());
    }

    #[tokio::test]
    async fn times_out_with_exit_124() {
        let mut fixture = ContextFixture::new();
        let result = run(&mut fixture, json!({"command": "sleep 5", "timeout": 1})).await;
        assert_eq!(result.exit_code, 124);
        assert!(result.error.contains("timed out"));
    }

    #[tokio::test]
    async fn truncates_long_output() {
        let mut fixture = ContextFixture::new();
        fixture.limits.max_output_chars = 400;
        let result = run(&mut fixture, json!({"command": "seq 1 2000"})).await;
        assert!(result.truncated);
        assert!(result.output.contains("... [truncated"));
    }

    #[tokio::test]
    async fn missing_command_argument_is_a_validation_failure() {
        let mut fixture = ContextFixture::new();
        let result = run(&mut fixture, json!({"cmd": "ls", "extra": 1})).await;
        assert!(!result.is_success());
        assert!(result.error.contains("Invalid arguments"));
    }

    #[tokio::test]
    async fn hallucinated_argument_name_is_remapped_by_position() {
        let mut fixture = ContextFixture::new();
        // One value, one expected non-optional shape: remap lands it on `command`.
        let result = run(&mut fixture, json!({"shell_command": "echo remapped", "t": 30, "w": null})).await;
        assert!(result.is_success());
        assert_eq!(result.output.trim(), "remapped");
    }

    #[tokio::test]
    async fn sensitive_environment_is_not_visible() {
        std::env::set_var("NATSHELL_FAKE_TOKEN", "leakme");
        let mut fixture = ContextFixture::new();
        let result = run(
            &mut fixture,
            json!({"command": "echo ${NATSHELL_FAKE_TOKEN:-filtered}"}),
        )
        .await;
        std::env::remove_var("NATSHELL_FAKE_TOKEN");
        assert_eq!(result.output.trim(), "filtered");
    }
}
