//! Structured git operations.
//!
//! Covers the everyday read paths (status, diff, log, branch) and the two
//! mutating ones (commit, stash). Identity-rewriting commit flags are
//! refused here; anything fancier belongs in execute_shell where the
//! safety classifier sees it.

use super::{parse_args, Tool, ToolContext, ToolResult, ToolSpec};
use command_executor::{CommandExecutor, EnvPolicy, ExecOutput, ExecRequest};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const GIT_TIMEOUT: Duration = Duration::from_secs(30);

const BLOCKED_COMMIT_FLAGS: &[&str] = &["--amend", "--reset-author", "--allow-empty-message"];
const BLOCKED_COMMIT_PREFIXES: &[&str] = &["--author=", "--date="];

const OPERATIONS: &[&str] = &["status", "diff", "log", "branch", "commit", "stash"];

#[derive(Deserialize)]
struct GitToolInput {
    operation: String,
    #[serde(default)]
    args: Option<String>,
}

pub struct GitTool;

#[async_trait::async_trait]
impl Tool for GitTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "git_tool",
            description: "Perform common git operations in the current repository. Supported \
                operations: status, diff, log, branch, commit, stash. Read-only operations \
                (status, diff, log, branch) are safe; mutating operations (commit, stash) \
                require confirmation. Prefer this over execute_shell for git tasks — it \
                returns clean, structured output.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["status", "diff", "log", "branch", "commit", "stash"],
                        "description": "The git operation to perform."
                    },
                    "args": {
                        "type": "string",
                        "description": "Additional arguments for the operation. Examples:\n  \
                            status: (none needed)\n  diff: '--staged' or a file path\n  \
                            log: '-5' to show last 5 commits (default 10)\n  \
                            branch: branch name to create, or empty to list\n  \
                            commit: '-m \"commit message\"' (required)\n  \
                            stash: 'push', 'pop', 'list', or 'push -m \"message\"'"
                    }
                },
                "required": ["operation"]
            }),
            requires_confirmation: false,
        }
    }

    async fn execute(&self, context: &mut ToolContext<'_>, args: &Value) -> ToolResult {
        let input: GitToolInput = match parse_args(&self.spec(), args) {
            Ok(input) => input,
            Err(failure) => return failure,
        };
        let operation = input.operation.as_str();
        if !OPERATIONS.contains(&operation) {
            return ToolResult::failure(format!(
                "Unknown git operation: {operation}. Supported: {}",
                OPERATIONS.join(", ")
            ));
        }

        // Shell-style splitting so quoted commit messages survive.
        let extra: Vec<String> = match input.args.as_deref() {
            None | Some("") => Vec::new(),
            Some(raw) => match shlex::split(raw) {
                Some(parts) => parts,
                None => return ToolResult::failure("Invalid arguments: unbalanced quotes"),
            },
        };

        // Commit argument hygiene comes before any process spawn.
        if operation == "commit" {
            if extra.is_empty() {
                return ToolResult::failure(
                    "commit requires arguments, e.g. -m \"your message\"",
                );
            }
            for arg in &extra {
                if BLOCKED_COMMIT_FLAGS.contains(&arg.as_str())
                    || BLOCKED_COMMIT_PREFIXES.iter().any(|p| arg.starts_with(p))
                {
                    return ToolResult::failure(format!(
                        "Flag {arg:?} is not allowed via git_tool. Use execute_shell for \
                         advanced git commit options."
                    ));
                }
            }
        }

        match self.run_git(context, &["rev-parse", "--is-inside-work-tree"]).await {
            Ok(output) if output.exit_code == 0 => {}
            Ok(_) => {
                return ToolResult::failure(
                    "Not a git repository (or any parent up to mount point).",
                )
            }
            Err(result) => return result,
        }

        let outcome = match operation {
            "status" => {
                let mut git_args = vec!["status".to_string(), "--porcelain=v1".to_string()];
                git_args.extend(extra);
                self.run_git_owned(context, git_args)
                    .await
                    .map(|out| (format_status(&out), out.exit_code))
            }
            "diff" => {
                let mut git_args = vec!["diff".to_string()];
                git_args.extend(extra);
                self.run_git_owned(context, git_args).await.map(|out| {
                    let body = out.stdout.trim().to_string();
                    if out.exit_code != 0 {
                        (out.stderr.trim().to_string(), out.exit_code)
                    } else if body.is_empty() {
                        ("No differences.".to_string(), 0)
                    } else {
                        (body, 0)
                    }
                })
            }
            "log" => {
                let mut git_args = vec![
                    "log".to_string(),
                    "--oneline".to_string(),
                    "--no-decorate".to_string(),
                ];
                let has_count = extra
                    .iter()
                    .any(|a| a.starts_with('-') && a[1..].chars().all(|c| c.is_ascii_digit()) && a.len() > 1);
                if !has_count {
                    git_args.push("-10".to_string());
                }
                git_args.extend(extra);
                self.run_git_owned(context, git_args).await.map(|out| {
                    let body = out.stdout.trim().to_string();
                    if out.exit_code != 0 {
                        (out.stderr.trim().to_string(), out.exit_code)
                    } else if body.is_empty() {
                        ("No commits yet.".to_string(), 0)
                    } else {
                        (body, 0)
                    }
                })
            }
            "branch" => {
                let git_args = if extra.is_empty() {
                    vec!["branch".to_string(), "--list".to_string(), "-v".to_string()]
                } else {
                    let mut git_args = vec!["branch".to_string()];
                    git_args.extend(extra);
                    git_args
                };
                self.run_git_owned(context, git_args)
                    .await
                    .map(|out| (merge_streams(&out), out.exit_code))
            }
            "commit" => {
                let mut git_args = vec!["commit".to_string()];
                git_args.extend(extra);
                self.run_git_owned(context, git_args)
                    .await
                    .map(|out| (merge_streams(&out), out.exit_code))
            }
            "stash" => {
                let git_args = if extra.is_empty() {
                    vec!["stash".to_string(), "list".to_string()]
                } else {
                    let mut git_args = vec!["stash".to_string()];
                    git_args.extend(extra);
                    git_args
                };
                self.run_git_owned(context, git_args).await.map(|out| {
                    let body = merge_streams(&out);
                    if body.is_empty() && out.exit_code == 0 {
                        ("Stash operation completed.".to_string(), 0)
                    } else {
                        (body, out.exit_code)
                    }
                })
            }
            _ => unreachable!("operation validated above"),
        };

        match outcome {
            Ok((body, exit_code)) if exit_code == 0 => ToolResult::success(body),
            Ok((body, exit_code)) => ToolResult::failure_with_code(body, exit_code),
            Err(result) => result,
        }
    }
}

impl GitTool {
    async fn run_git(
        &self,
        context: &ToolContext<'_>,
        args: &[&str],
    ) -> Result<ExecOutput, ToolResult> {
        self.run_git_owned(context, args.iter().map(|s| s.to_string()).collect())
            .await
    }

    async fn run_git_owned(
        &self,
        context: &ToolContext<'_>,
        args: Vec<String>,
    ) -> Result<ExecOutput, ToolResult> {
        let request = ExecRequest::new("git")
            .args(args)
            .timeout(GIT_TIMEOUT)
            .env(EnvPolicy::Inherit)
            .cancel_token(context.cancel.clone());
        let output = CommandExecutor::execute(context.executor, request)
            .await
            .map_err(|err| {
                if err.to_string().contains("failed to spawn") {
                    ToolResult::failure_with_code("git not found. Is git installed?", 127)
                } else {
                    ToolResult::failure(format!("git failed: {err}"))
                }
            })?;
        if output.timed_out {
            return Err(ToolResult::failure_with_code(
                "git timed out after 30 seconds.",
                124,
            ));
        }
        Ok(output)
    }
}

fn merge_streams(output: &ExecOutput) -> String {
    let stdout = output.stdout.trim();
    let stderr = output.stderr.trim();
    if !stdout.is_empty() {
        stdout.to_string()
    } else {
        stderr.to_string()
    }
}

/// Parse `git status --porcelain=v1` into staged / unstaged / untracked
/// sections.
fn format_status(output: &ExecOutput) -> String {
    if output.exit_code != 0 {
        return output.stderr.trim().to_string();
    }
    let lines: Vec<&str> = output
        .stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();
    if lines.is_empty() {
        return "Working tree clean — nothing to commit.".to_string();
    }

    let mut staged = Vec::new();
    let mut unstaged = Vec::new();
    let mut untracked = Vec::new();
    for line in lines {
        if line.len() < 3 {
            continue;
        }
        let mut chars = line.chars();
        let x = chars.next().unwrap_or(' ');
        let y = chars.next().unwrap_or(' ');
        let path = &line[3..];
        if x == '?' {
            untracked.push(path.to_string());
        } else {
            if x != ' ' {
                staged.push(format!("  {x} {path}"));
            }
            if y != ' ' && y != '?' {
                unstaged.push(format!("  {y} {path}"));
            }
        }
    }

    let mut sections = Vec::new();
    if !staged.is_empty() {
        sections.push(format!("Staged changes:\n{}", staged.join("\n")));
    }
    if !unstaged.is_empty() {
        sections.push(format!("Unstaged changes:\n{}", unstaged.join("\n")));
    }
    if !untracked.is_empty() {
        let listed: Vec<String> = untracked.iter().map(|f| format!("  {f}")).collect();
        sections.push(format!("Untracked files:\n{}", listed.join("\n")));
    }
    if sections.is_empty() {
        "Working tree clean — nothing to commit.".to_string()
    } else {
        sections.join("\n\n")
    }
}
