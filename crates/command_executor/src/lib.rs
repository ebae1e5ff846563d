//! Subprocess execution substrate.
//!
//! Everything NatShell runs on the host machine goes through this crate:
//! shell commands, code snippets, git invocations. The executor owns the
//! unpleasant parts of process management — process groups, timeout
//! escalation (SIGTERM, then SIGKILL after a grace period), stdin piping
//! for credential hand-off, and filtering credentials out of the child
//! environment.

use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How long a process gets between SIGTERM and SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Environment variables that must never reach a child process by name.
const SENSITIVE_ENV_NAMES: &[&str] = &[
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "GITHUB_TOKEN",
    "GH_TOKEN",
    "GITLAB_TOKEN",
    "ANTHROPIC_API_KEY",
    "OPENAI_API_KEY",
    "DATABASE_URL",
    "DB_PASSWORD",
    "NATSHELL_API_KEY",
    "REDIS_URL",
    "MONGODB_URI",
    "AMQP_URL",
];

/// Name fragments that mark a variable as credential-bearing.
const SENSITIVE_ENV_FRAGMENTS: &[&str] = &["KEY", "TOKEN", "SECRET", "PASSWORD", "CREDENTIAL"];

/// True if an environment variable must be withheld from child processes.
pub fn is_sensitive_env(name: &str) -> bool {
    if SENSITIVE_ENV_NAMES.contains(&name) {
        return true;
    }
    if name.starts_with("AWS_") {
        return true;
    }
    let upper = name.to_ascii_uppercase();
    SENSITIVE_ENV_FRAGMENTS.iter().any(|f| upper.contains(f))
}

/// The current environment with credential-bearing variables removed and
/// `LC_ALL=C` pinned so command output parses consistently.
pub fn filtered_env() -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars()
        .filter(|(name, _)| !is_sensitive_env(name))
        .collect();
    env.insert("LC_ALL".to_string(), "C".to_string());
    env
}

/// Environment handed to the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvPolicy {
    /// Inherit the parent environment unchanged.
    Inherit,
    /// Strip credential-bearing variables and pin `LC_ALL=C`.
    #[default]
    Filtered,
}

/// A single subprocess invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub workdir: Option<PathBuf>,
    /// Written to the child's stdin, then the pipe is closed. When `None`
    /// stdin is `/dev/null` so interactive prompts fail fast instead of
    /// hanging.
    pub stdin: Option<String>,
    pub env: EnvPolicy,
    pub cancel: CancellationToken,
}

impl ExecRequest {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(60),
            workdir: None,
            stdin: None,
            env: EnvPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// A `bash -c <command>` invocation, the shape `execute_shell` uses.
    pub fn shell(command: impl Into<String>) -> Self {
        let mut request = Self::new("bash");
        request.args = vec!["-c".to_string(), command.into()];
        request
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn env(mut self, policy: EnvPolicy) -> Self {
        self.env = policy;
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

/// Outcome of a subprocess run. A non-zero exit code is not an `Err` — the
/// caller decides what failure means.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub cancelled: bool,
}

#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, request: ExecRequest) -> Result<ExecOutput>;
}

pub struct DefaultCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for DefaultCommandExecutor {
    async fn execute(&self, request: ExecRequest) -> Result<ExecOutput> {
        if let Some(dir) = &request.workdir {
            if !dir.is_dir() {
                bail!("working directory does not exist: {}", dir.display());
            }
        }

        let mut command = std::process::Command::new(&request.program);
        command.args(&request.args);
        if let Some(dir) = &request.workdir {
            command.current_dir(dir);
        }
        if request.env == EnvPolicy::Filtered {
            command.env_clear();
            command.envs(filtered_env());
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so timeouts kill the whole pipeline and
            // not just the leader.
            command.process_group(0);
        }

        let mut command = tokio::process::Command::from(command);
        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn {}", request.program))?;
        let pid = child
            .id()
            .ok_or_else(|| anyhow!("child exited before it could be tracked"))?;

        if let Some(input) = &request.stdin {
            let mut handle = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("child stdin unavailable"))?;
            handle.write_all(input.as_bytes()).await?;
            // Dropping closes the pipe so the child sees EOF.
            drop(handle);
        }

        let mut stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("child stdout unavailable"))?;
        let mut stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("child stderr unavailable"))?;
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout_pipe.read_to_end(&mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr_pipe.read_to_end(&mut buf).await;
            buf
        });

        let mut timed_out = false;
        let mut cancelled = false;
        let mut signalled = false;
        let mut deadline = Instant::now() + request.timeout;

        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                _ = tokio::time::sleep_until(deadline) => {
                    if signalled {
                        debug!(pid, "process ignored SIGTERM, escalating to SIGKILL");
                        kill_group(pid, libc::SIGKILL);
                        // SIGKILL cannot be ignored; one final wait reaps it.
                        break child.wait().await?;
                    }
                    timed_out = true;
                    signalled = true;
                    kill_group(pid, libc::SIGTERM);
                    deadline = Instant::now() + TERM_GRACE;
                }
                _ = request.cancel.cancelled(), if !signalled => {
                    cancelled = true;
                    signalled = true;
                    kill_group(pid, libc::SIGTERM);
                    deadline = Instant::now() + TERM_GRACE;
                }
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: exit_code_of(&status),
            timed_out,
            cancelled,
        })
    }
}

fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(unix)]
fn kill_group(pid: u32, signal: i32) {
    unsafe {
        libc::killpg(pid as libc::pid_t, signal);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32, _signal: i32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_env_detection() {
        assert!(is_sensitive_env("AWS_ACCESS_KEY_ID"));
        assert!(is_sensitive_env("AWS_ANYTHING_AT_ALL"));
        assert!(is_sensitive_env("GITHUB_TOKEN"));
        assert!(is_sensitive_env("MY_APP_PASSWORD"));
        assert!(is_sensitive_env("stripe_secret"));
        assert!(is_sensitive_env("SOME_CREDENTIAL_FILE"));
        assert!(!is_sensitive_env("PATH"));
        assert!(!is_sensitive_env("HOME"));
        assert!(!is_sensitive_env("LANG"));
    }

    #[test]
    fn filtered_env_pins_locale() {
        let env = filtered_env();
        assert_eq!(env.get("LC_ALL").map(String::as_str), Some("C"));
        assert!(!env.keys().any(|k| is_sensitive_env(k)));
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let output = DefaultCommandExecutor
            .execute(ExecRequest::shell("echo hello; exit 3"))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, 3);
        assert!(!output.timed_out);
    }

    #[tokio::test]
    async fn captures_stderr_separately() {
        let output = DefaultCommandExecutor
            .execute(ExecRequest::shell("echo out; echo err >&2"))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn pipes_stdin_to_child() {
        let output = DefaultCommandExecutor
            .execute(ExecRequest::shell("cat").stdin("fed via stdin"))
            .await
            .unwrap();
        assert_eq!(output.stdout, "fed via stdin");
    }

    #[tokio::test]
    async fn times_out_and_kills_the_group() {
        let start = std::time::Instant::now();
        let output = DefaultCommandExecutor
            .execute(ExecRequest::shell("sleep 30").timeout(Duration::from_millis(200)))
            .await
            .unwrap();
        assert!(output.timed_out);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancellation_terminates_the_child() {
        let token = CancellationToken::new();
        let request = ExecRequest::shell("sleep 30").cancel_token(token.clone());
        let handle = tokio::spawn(async move { DefaultCommandExecutor.execute(request).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        let output = handle.await.unwrap().unwrap();
        assert!(output.cancelled);
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let result = DefaultCommandExecutor
            .execute(ExecRequest::new("definitely-not-a-real-binary-xyz"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn filtered_env_hides_secrets_from_child() {
        std::env::set_var("NATSHELL_TEST_SECRET", "hunter2");
        let output = DefaultCommandExecutor
            .execute(ExecRequest::shell("echo \"${NATSHELL_TEST_SECRET:-unset}\""))
            .await
            .unwrap();
        std::env::remove_var("NATSHELL_TEST_SECRET");
        assert_eq!(output.stdout.trim(), "unset");
    }
}
