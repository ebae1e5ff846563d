//! File writing with pre-write backups.

use super::read_file::resolve;
use super::{parse_args, Tool, ToolContext, ToolResult, ToolSpec};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{ErrorKind, Write};

#[derive(Deserialize)]
struct WriteFileInput {
    path: String,
    content: String,
    #[serde(default)]
    mode: Option<String>,
}

pub struct WriteFileTool;

#[async_trait::async_trait]
impl Tool for WriteFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "write_file",
            description: "Write content to a file on the filesystem. Can overwrite or append. \
                Creates parent directories if they don't exist. Use this for creating config \
                files, scripts, or rewriting text files.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Absolute or relative path to write to."
                    },
                    "content": {
                        "type": "string",
                        "description": "The text content to write."
                    },
                    "mode": {
                        "type": "string",
                        "enum": ["overwrite", "append"],
                        "description": "Write mode. Default 'overwrite'."
                    }
                },
                "required": ["path", "content"]
            }),
            requires_confirmation: true,
        }
    }

    async fn execute(&self, context: &mut ToolContext<'_>, args: &Value) -> ToolResult {
        let input: WriteFileInput = match parse_args(&self.spec(), args) {
            Ok(input) => input,
            Err(failure) => return failure,
        };
        let append = match input.mode.as_deref() {
            None | Some("overwrite") => false,
            Some("append") => true,
            Some(other) => {
                return ToolResult::failure(format!(
                    "Unknown mode {other:?}; expected \"overwrite\" or \"append\""
                ))
            }
        };

        let target = resolve(&input.path);
        if let Some(parent) = target.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                return ToolResult::failure(format!(
                    "Cannot create parent directory {}: {err}",
                    parent.display()
                ));
            }
        }

        // Snapshot the previous content before touching it.
        if target.exists() {
            if let Err(err) = context.backups.backup(&target) {
                return ToolResult::failure(format!("Backup refused: {err}"));
            }
        }

        let write_result = if append {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&target)
                .and_then(|mut file| file.write_all(input.content.as_bytes()))
        } else {
            std::fs::write(&target, &input.content)
        };

        if let Err(err) = write_result {
            return match err.kind() {
                ErrorKind::PermissionDenied => {
                    ToolResult::failure(format!("Permission denied: {}", target.display()))
                }
                _ => ToolResult::failure(format!("Error writing file: {err}")),
            };
        }

        // The on-disk content no longer matches what the agent last read.
        context.tracker.invalidate(&target);

        let action = if append { "Appended to" } else { "Wrote" };
        ToolResult::success(format!(
            "{action} {} ({} chars)",
            target.display(),
            input.content.chars().count()
        ))
    }
}
