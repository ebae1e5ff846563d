//! Directory listing with structured metadata.

use super::execute_shell::coerce_u64;
use super::read_file::resolve;
use super::{parse_args, Tool, ToolContext, ToolResult, ToolSpec};
use chrono::{DateTime, Local};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::ErrorKind;

#[derive(Deserialize)]
struct ListDirectoryInput {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    show_hidden: Option<bool>,
    #[serde(default)]
    max_entries: Option<Value>,
}

pub struct ListDirectoryTool;

#[async_trait::async_trait]
impl Tool for ListDirectoryTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "list_directory",
            description: "List the contents of a directory with file types, sizes, and \
                modification times. More structured than raw ls output. Runs as the current \
                user — if the directory requires elevated privileges, use execute_shell with \
                sudo instead.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Directory path to list. Default: current directory."
                    },
                    "show_hidden": {
                        "type": "boolean",
                        "description": "Include hidden files (dotfiles). Default false."
                    },
                    "max_entries": {
                        "type": "integer",
                        "description": "Maximum entries to return. Default 100."
                    }
                },
                "required": []
            }),
            requires_confirmation: false,
        }
    }

    async fn execute(&self, _context: &mut ToolContext<'_>, args: &Value) -> ToolResult {
        let input: ListDirectoryInput = match parse_args(&self.spec(), args) {
            Ok(input) => input,
            Err(failure) => return failure,
        };
        let show_hidden = input.show_hidden.unwrap_or(false);
        let max_entries = coerce_u64(input.max_entries.as_ref())
            .map(|n| n as usize)
            .filter(|n| *n > 0)
            .unwrap_or(100);

        let target = resolve(input.path.as_deref().unwrap_or("."));
        if !target.exists() {
            return ToolResult::failure(format!("Directory not found: {}", target.display()));
        }
        if !target.is_dir() {
            return ToolResult::failure(format!("Not a directory: {}", target.display()));
        }

        let mut entries = match std::fs::read_dir(&target) {
            Ok(reader) => reader.filter_map(|e| e.ok()).collect::<Vec<_>>(),
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                return ToolResult::failure(format!(
                    "Permission denied: {}. This tool runs as the current user; to access \
                     this directory use execute_shell with sudo (e.g. sudo ls).",
                    target.display()
                ));
            }
            Err(err) => return ToolResult::failure(format!("Error listing directory: {err}")),
        };

        // Directories first, then case-insensitive by name.
        entries.sort_by_key(|entry| {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            (!is_dir, entry.file_name().to_string_lossy().to_lowercase())
        });

        let mut lines = vec![format!("Directory: {}\n", target.display())];
        let mut shown = 0usize;
        let mut skipped_rest = false;
        for entry in &entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !show_hidden && name.starts_with('.') {
                continue;
            }
            if shown >= max_entries {
                skipped_rest = true;
                break;
            }
            match entry.metadata() {
                Ok(meta) => {
                    let kind = if meta.is_dir() {
                        'd'
                    } else if meta.file_type().is_symlink() {
                        'l'
                    } else {
                        'f'
                    };
                    let size = if meta.is_dir() {
                        "-".to_string()
                    } else {
                        human_size(meta.len())
                    };
                    let mtime = meta
                        .modified()
                        .ok()
                        .map(|time| {
                            DateTime::<Local>::from(time)
                                .format("%Y-%m-%d %H:%M")
                                .to_string()
                        })
                        .unwrap_or_else(|| "?".to_string());
                    lines.push(format!("  {kind}  {size:>9}  {mtime}  {name}"));
                }
                Err(_) => lines.push(format!("  ?  {:>9}  {:>16}  {name}", "?", "?")),
            }
            shown += 1;
        }
        if skipped_rest {
            lines.push("... and more entries".to_string());
        }

        ToolResult {
            output: lines.join("\n"),
            truncated: skipped_rest,
            ..Default::default()
        }
    }
}

fn human_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut value = size as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return if *unit == "B" {
                format!("{size}B")
            } else {
                format!("{value:.1}{unit}")
            };
        }
        value /= 1024.0;
    }
    format!("{value:.1}PB")
}
