//! Content and filename search.
//!
//! The dispatch rule: a non-empty `pattern` means content search (grep);
//! an empty pattern with a `file_pattern` means filename search (find).
//! The rule is stated in the schema so the model can pick deliberately.

use super::execute_shell::coerce_u64;
use super::{parse_args, Tool, ToolContext, ToolResult, ToolSpec};
use command_executor::{CommandExecutor, ExecRequest};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct SearchFilesInput {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    file_pattern: Option<String>,
    #[serde(default)]
    max_results: Option<Value>,
}

pub struct SearchFilesTool;

#[async_trait::async_trait]
impl Tool for SearchFilesTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "search_files",
            description: "Search for text within files (grep) or find files by name pattern \
                (find). A non-empty pattern searches file contents recursively with line \
                numbers; an empty pattern finds files matching file_pattern by name. \
                file_pattern uses glob syntax like '*.py'; comma-separate multiple globs: \
                '*.py,*.sh'.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "Text pattern to search for within files (grep), or \
                            empty to just find files by name."
                    },
                    "path": {
                        "type": "string",
                        "description": "Root directory to search from. Default: current directory."
                    },
                    "file_pattern": {
                        "type": "string",
                        "description": "Glob pattern for file names, e.g. '*.py' or '*.conf'. \
                            Comma-separated for multiple. Default: all files."
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum result lines. Default 50."
                    }
                },
                "required": ["pattern"]
            }),
            requires_confirmation: false,
        }
    }

    async fn execute(&self, context: &mut ToolContext<'_>, args: &Value) -> ToolResult {
        let input: SearchFilesInput = match parse_args(&self.spec(), args) {
            Ok(input) => input,
            Err(failure) => return failure,
        };
        let path = input.path.unwrap_or_else(|| ".".to_string());
        let max_results = coerce_u64(input.max_results.as_ref())
            .map(|n| n as usize)
            .filter(|n| *n > 0)
            .unwrap_or(50);
        let globs: Vec<String> = input
            .file_pattern
            .as_deref()
            .unwrap_or("*")
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(String::from)
            .collect();

        let request = if !input.pattern.is_empty() {
            // Content search: every glob becomes its own --include.
            let mut grep_args = vec!["-rn".to_string()];
            for glob in &globs {
                if glob != "*" {
                    grep_args.push("--include".to_string());
                    grep_args.push(glob.clone());
                }
            }
            grep_args.push("-m".to_string());
            grep_args.push(max_results.to_string());
            grep_args.push(input.pattern.clone());
            grep_args.push(path.clone());
            ExecRequest::new("grep").args(grep_args)
        } else {
            // Name search: multiple globs combine with -o.
            let mut find_args = vec![path.clone(), "-maxdepth".to_string(), "5".to_string()];
            if globs.len() == 1 {
                find_args.push("-name".to_string());
                find_args.push(globs[0].clone());
            } else {
                find_args.push("(".to_string());
                for (i, glob) in globs.iter().enumerate() {
                    if i > 0 {
                        find_args.push("-o".to_string());
                    }
                    find_args.push("-name".to_string());
                    find_args.push(glob.clone());
                }
                find_args.push(")".to_string());
            }
            ExecRequest::new("find").args(find_args)
        };

        let output = match context
            .executor
            .execute(request.timeout(SEARCH_TIMEOUT).cancel_token(context.cancel.clone()))
            .await
        {
            Ok(output) => output,
            Err(err) => return ToolResult::failure(format!("Search error: {err}")),
        };
        if output.timed_out {
            return ToolResult::failure_with_code("Search timed out after 30 seconds", 124);
        }

        let lines: Vec<&str> = output.stdout.lines().collect();
        let truncated = lines.len() > max_results;
        let body = if truncated {
            format!(
                "{}\n... [{} more results]",
                lines[..max_results].join("\n"),
                lines.len() - max_results
            )
        } else {
            output.stdout.trim_end().to_string()
        };

        // grep exits 1 on "no matches", which is not an error here.
        ToolResult {
            output: if body.is_empty() {
                "(no matches found)".to_string()
            } else {
                body
            },
            error: if output.exit_code > 1 {
                output.stderr.trim_end().to_string()
            } else {
                String::new()
            },
            exit_code: if output.exit_code <= 1 { 0 } else { output.exit_code },
            truncated,
        }
    }
}
