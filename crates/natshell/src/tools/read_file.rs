//! File reading with read-tracker registration.

use super::execute_shell::coerce_u64;
use super::{parse_args, Tool, ToolContext, ToolResult, ToolSpec};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::path::PathBuf;

#[derive(Deserialize)]
struct ReadFileInput {
    path: String,
    #[serde(default)]
    max_lines: Option<Value>,
    #[serde(default)]
    offset: Option<Value>,
}

pub struct ReadFileTool;

#[async_trait::async_trait]
impl Tool for ReadFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_file",
            description: "Read the contents of a file on the filesystem. Returns the text \
                content. Useful for inspecting configuration files, logs, scripts, and code. \
                Large files are truncated to max_lines. Use offset to continue reading from \
                a specific line number.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Absolute or relative path to the file to read."
                    },
                    "max_lines": {
                        "type": "integer",
                        "description": "Maximum number of lines to return. The default scales \
                            with the model's context window."
                    },
                    "offset": {
                        "type": "integer",
                        "description": "Line number to start reading from (1-based). Default 1."
                    }
                },
                "required": ["path"]
            }),
            requires_confirmation: false,
        }
    }

    async fn execute(&self, context: &mut ToolContext<'_>, args: &Value) -> ToolResult {
        let input: ReadFileInput = match parse_args(&self.spec(), args) {
            Ok(input) => input,
            Err(failure) => return failure,
        };

        let max_lines = coerce_u64(input.max_lines.as_ref())
            .map(|n| n as usize)
            .filter(|n| *n > 0)
            .unwrap_or(context.limits.read_file_lines);
        let offset = coerce_u64(input.offset.as_ref())
            .map(|n| n as usize)
            .unwrap_or(1)
            .max(1);

        let target = resolve(&input.path);
        if target.is_dir() {
            return ToolResult::failure(format!("Is a directory: {}", target.display()));
        }

        let content = match std::fs::read_to_string(&target) {
            Ok(content) => content,
            Err(err) => {
                return match err.kind() {
                    ErrorKind::NotFound => {
                        ToolResult::failure(format!("File not found: {}", target.display()))
                    }
                    ErrorKind::PermissionDenied => {
                        ToolResult::failure(format!("Permission denied: {}", target.display()))
                    }
                    ErrorKind::InvalidData => {
                        // Binary content: re-read lossily rather than failing.
                        match std::fs::read(&target) {
                            Ok(bytes) => {
                                let lossy = String::from_utf8_lossy(&bytes).into_owned();
                                return self.render(context, &target, lossy, offset, max_lines);
                            }
                            Err(err) => ToolResult::failure(format!("Error reading file: {err}")),
                        }
                    }
                    _ => ToolResult::failure(format!("Error reading file: {err}")),
                };
            }
        };

        self.render(context, &target, content, offset, max_lines)
    }
}

impl ReadFileTool {
    fn render(
        &self,
        context: &mut ToolContext<'_>,
        target: &std::path::Path,
        content: String,
        offset: usize,
        max_lines: usize,
    ) -> ToolResult {
        // The tracker stores the hash of the full current content, so a
        // later edit can detect changes made behind the agent's back even
        // when only a window of the file was shown.
        context.tracker.record(target, &content);

        let all_lines: Vec<&str> = content.lines().collect();
        let total = all_lines.len();
        let start = offset - 1;
        let window: Vec<&str> = all_lines.iter().skip(start).take(max_lines).copied().collect();
        let truncated = start + max_lines < total;

        let mut output = window.join("\n");
        if truncated {
            let remaining = total - (start + window.len());
            output.push_str(&format!("\n... [{remaining} more lines]"));
        }
        if start > 0 {
            output = format!("[starting at line {offset}]\n{output}");
        }
        ToolResult {
            output,
            truncated,
            ..Default::default()
        }
    }
}

pub(crate) fn resolve(path: &str) -> PathBuf {
    let expanded = if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest)
    } else {
        PathBuf::from(path)
    };
    expanded.canonicalize().unwrap_or(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::ContextFixture;
    use crate::tools::tracker::TrackerStatus;

    async fn run(fixture: &mut ContextFixture, args: Value) -> ToolResult {
        let mut context = fixture.context();
        ReadFileTool.execute(&mut context, &args).await
    }

    #[tokio::test]
    async fn reads_a_file_and_records_the_hash() {
        let mut fixture = ContextFixture::new();
        let path = fixture.dir.path().join("hello.txt");
        std::fs::write(&path, "line 1\nline 2\n").unwrap();

        let result = run(&mut fixture, json!({"path": path.to_string_lossy()})).await;
        assert!(result.is_success());
        assert_eq!(result.output, "line 1\nline 2");
        assert_eq!(
            fixture.tracker.status(&path, "line 1\nline 2\n"),
            TrackerStatus::Current
        );
    }

    #[tokio::test]
    async fn truncates_to_max_lines() {
        let mut fixture = ContextFixture::new();
        let path = fixture.dir.path().join("long.txt");
        let body: String = (1..=50).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&path, body).unwrap();

        let result = run(
            &mut fixture,
            json!({"path": path.to_string_lossy(), "max_lines": 10}),
        )
        .await;
        assert!(result.truncated);
        assert!(result.output.contains("line 10"));
        assert!(!result.output.contains("line 11\n"));
        assert!(result.output.contains("[40 more lines]"));
    }

    #[tokio::test]
    async fn offset_continues_from_a_line() {
        let mut fixture = ContextFixture::new();
        let path = fixture.dir.path().join("long.txt");
        let body: String = (1..=30).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&path, body).unwrap();

        let result = run(
            &mut fixture,
            json!({"path": path.to_string_lossy(), "offset": 21, "max_lines": 100}),
        )
        .await;
        assert!(!result.truncated);
        assert!(result.output.starts_with("[starting at line 21]"));
        assert!(result.output.contains("line 21"));
        assert!(!result.output.contains("line 20\n"));
    }

    #[tokio::test]
    async fn missing_file_reports_not_found() {
        let mut fixture = ContextFixture::new();
        let result = run(&mut fixture, json!({"path": "/no/such/file/anywhere"})).await;
        assert!(!result.is_success());
        assert!(result.error.contains("File not found"));
    }

    #[tokio::test]
    async fn directory_is_rejected() {
        let mut fixture = ContextFixture::new();
        let dir = fixture.dir.path().to_path_buf();
        let result = run(&mut fixture, json!({"path": dir.to_string_lossy()})).await;
        assert!(!result.is_success());
        assert!(result.error.contains("Is a directory"));
    }
}
