//! Code snippet execution across ten languages.
//!
//! Interpreted languages run directly; c, cpp and rust compile to a
//! scratch binary first; go uses `go run`. Everything happens inside a
//! temp directory that is removed on every exit path.

use super::execute_shell::coerce_u64;
use super::{parse_args, Tool, ToolContext, ToolResult, ToolSpec};
use command_executor::{CommandExecutor, ExecRequest};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: u64 = 300;

/// language -> (binary, source extension)
const INTERPRETERS: &[(&str, &str, &str)] = &[
    ("python", "python3", "py"),
    ("javascript", "node", "js"),
    ("bash", "bash", "sh"),
    ("ruby", "ruby", "rb"),
    ("perl", "perl", "pl"),
    ("php", "php", "php"),
];

/// language -> (compiler, source extension)
const COMPILERS: &[(&str, &str, &str)] = &[
    ("c", "gcc", "c"),
    ("cpp", "g++", "cpp"),
    ("rust", "rustc", "rs"),
];

fn supported_languages() -> Vec<&'static str> {
    let mut all: Vec<&str> = INTERPRETERS
        .iter()
        .map(|(lang, _, _)| *lang)
        .chain(COMPILERS.iter().map(|(lang, _, _)| *lang))
        .collect();
    all.push("go");
    all.sort_unstable();
    all
}

fn binary_on_path(name: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(name).is_file())
}

#[derive(Deserialize)]
struct RunCodeInput {
    language: String,
    code: String,
    #[serde(default)]
    stdin: Option<String>,
    #[serde(default)]
    timeout: Option<Value>,
}

pub struct RunCodeTool;

#[async_trait::async_trait]
impl Tool for RunCodeTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "run_code",
            description: "Execute a code snippet and return its output. Supports interpreted \
                languages (python, javascript, bash, ruby, perl, php), compiled languages \
                (c, cpp, rust), and go. Handles temp file creation, compilation (if needed), \
                execution, and cleanup automatically.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "language": {
                        "type": "string",
                        "description": "Programming language: python, javascript, bash, ruby, \
                            perl, php, c, cpp, rust, go."
                    },
                    "code": {
                        "type": "string",
                        "description": "The source code to execute."
                    },
                    "stdin": {
                        "type": "string",
                        "description": "Optional text fed to the program's standard input."
                    },
                    "timeout": {
                        "type": "integer",
                        "description": "Maximum seconds to wait for execution. Default 30. Max 300."
                    }
                },
                "required": ["language", "code"]
            }),
            requires_confirmation: true,
        }
    }

    async fn execute(&self, context: &mut ToolContext<'_>, args: &Value) -> ToolResult {
        let input: RunCodeInput = match parse_args(&self.spec(), args) {
            Ok(input) => input,
            Err(failure) => return failure,
        };
        let language = input.language.trim().to_lowercase();
        let timeout = coerce_u64(input.timeout.as_ref())
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .clamp(1, MAX_TIMEOUT_SECS);

        let interpreter = INTERPRETERS.iter().find(|(lang, _, _)| *lang == language);
        let compiler = COMPILERS.iter().find(|(lang, _, _)| *lang == language);
        let is_go = language == "go";
        if interpreter.is_none() && compiler.is_none() && !is_go {
            return ToolResult::failure(format!(
                "Unsupported language: {language}. Supported: {}",
                supported_languages().join(", ")
            ));
        }

        let (runner, extension) = interpreter
            .or(compiler)
            .map(|(_, binary, ext)| (*binary, *ext))
            .unwrap_or(("go", "go"));
        if !binary_on_path(runner) {
            return ToolResult::failure(format!(
                "{runner} not found. Is {language} installed?"
            ));
        }

        // TempDir removes everything (source and binary) when dropped,
        // whatever path this function exits through.
        let scratch = match tempfile::Builder::new().prefix("natshell_").tempdir() {
            Ok(dir) => dir,
            Err(err) => return ToolResult::failure(format!("Cannot create temp dir: {err}")),
        };
        let source = scratch.path().join(format!("snippet.{extension}"));
        if let Err(err) = std::fs::write(&source, &input.code) {
            return ToolResult::failure(format!("Cannot write snippet: {err}"));
        }

        if compiler.is_some() {
            let binary = scratch.path().join("snippet_bin");
            let compile = self
                .run_step(
                    context,
                    runner,
                    vec![
                        source.to_string_lossy().into_owned(),
                        "-o".to_string(),
                        binary.to_string_lossy().into_owned(),
                    ],
                    None,
                    timeout,
                )
                .await;
            if !compile.is_success() {
                return ToolResult {
                    error: format!("Compilation failed:\n{}", compile.error),
                    exit_code: compile.exit_code,
                    truncated: compile.truncated,
                    ..Default::default()
                };
            }
            return self
                .run_step(
                    context,
                    &binary.to_string_lossy(),
                    Vec::new(),
                    input.stdin,
                    timeout,
                )
                .await;
        }

        let args = if is_go {
            vec!["run".to_string(), source.to_string_lossy().into_owned()]
        } else {
            vec![source.to_string_lossy().into_owned()]
        };
        self.run_step(context, runner, args, input.stdin, timeout).await
    }
}

impl RunCodeTool {
    async fn run_step(
        &self,
        context: &mut ToolContext<'_>,
        program: &str,
        args: Vec<String>,
        stdin: Option<String>,
        timeout: u64,
    ) -> ToolResult {
        let mut request = ExecRequest::new(program)
            .args(args)
            .timeout(Duration::from_secs(timeout))
            .cancel_token(context.cancel.clone());
        if let Some(input) = stdin {
            request = request.stdin(input);
        }
        let output = match context.executor.execute(request).await {
            Ok(output) => output,
            Err(err) => {
                return ToolResult::failure(format!("Failed to execute code: {err}"));
            }
        };
        if output.timed_out {
            return ToolResult::failure_with_code(
                format!("Execution timed out after {timeout} seconds."),
                124,
            );
        }
        if output.cancelled {
            return ToolResult::failure_with_code("Execution cancelled by the user.", 130);
        }
        let (stdout, stdout_truncated) = context.limits.truncate(&output.stdout);
        let (stderr, stderr_truncated) = context.limits.truncate(&output.stderr);
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
    use std::path::Path;

    async fn run(fixture: &mut ContextFixture, args: Value) -> ToolResult {
        let mut context = fixture.context();
        RunCodeTool.execute(&mut context, &args).await
    }

    #[test]
    fn language_table_covers_the_contract() {
        assert_eq!(
            supported_languages(),
            vec!["bash", "c", "cpp", "go", "javascript", "perl", "php", "python", "ruby", "rust"]
        );
    }

    #[tokio::test]
    async fn runs_a_bash_snippet() {
        let mut fixture = ContextFixture::new();
        let result = run(
            &mut fixture,
            json!({"language": "bash", "code": "echo from-bash"}),
        )
        .await;
        assert!(result.is_success(), "{}", result.error);
        assert_eq!(result.output.trim(), "from-bash");
    }

    #[tokio::test]
    async fn pipes_stdin_to_the_snippet() {
        let mut fixture = ContextFixture::new();
        let result = run(
            &mut fixture,
            json!({"language": "bash", "code": "read line; echo \"got: $line\"", "stdin": "ping\n"}),
        )
        .await;
        assert!(result.is_success(), "{}", result.error);
        assert_eq!(result.output.trim(), "got: ping");
    }

    #[tokio::test]
    async fn unsupported_language_lists_the_supported_set() {
        let mut fixture = ContextFixture::new();
        let result = run(
            &mut fixture,
            json!({"language": "cobol", "code": "DISPLAY 'HI'."}),
        )
        .await;
        assert!(!result.is_success());
        assert!(result.error.contains("Unsupported language: cobol"));
        assert!(result.error.contains("python"));
    }

    #[tokio::test]
    async fn snippet_failure_carries_the_exit_code() {
        let mut fixture = ContextFixture::new();
        let result = run(
            &mut fixture,
            json!({"language": "bash", "code": "echo oops >&2; exit 7"}),
        )
        .await;
        assert_eq!(result.exit_code, 7);
        assert_eq!(result.error.trim(), "oops");
    }

    #[tokio::test]
    async fn temp_artifacts_are_cleaned_up() {
        let mut fixture = ContextFixture::new();
        let result = run(
            &mut fixture,
            json!({"language": "bash", "code": "dirname \"$0\""}),
        )
        .await;
        assert!(result.is_success());
        let scratch_dir = result.output.trim().to_string();
        assert!(
            !Path::new(&scratch_dir).exists(),
            "scratch dir should be gone: {scratch_dir}"
        );
    }
}
