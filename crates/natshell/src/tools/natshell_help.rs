//! Self-documentation lookup, so the model can answer questions about
//! NatShell itself without guessing.

use super::{parse_args, Tool, ToolContext, ToolResult, ToolSpec};
use crate::config::SafetyMode;
use serde::Deserialize;
use serde_json::{json, Value};

const TOPIC_OVERVIEW: &str = "NatShell is an interactive natural-language shell for Linux, macOS, and WSL. \
Users type requests in plain English and a language model plans and executes multi-step \
shell operations through a gated tool runtime. It uses the ReAct agent pattern \
(reason -> act -> observe), with a local model runtime, optional remote OpenAI-compatible \
backends, and automatic fallback to local inference when the remote fails. The safety \
classifier is regex-based and deterministic. Config file: ~/.config/natshell/config.toml";

const TOPIC_COMMANDS: &str = "Available slash commands:
  /help                  — Show available commands and keybindings
  /clear                 — Clear chat history and model context
  /cmd <command>         — Execute a shell command directly
  /model                 — Show current engine/model info
  /model list            — List models on the remote server
  /model use <name>      — Switch to a remote model
  /model switch <path>   — Switch to a different local model file
  /model local           — Switch back to the local model
  /model default <name>  — Save default remote model to config
  /compact               — Compact conversation context, keeping key facts
  /plan <description>    — Generate a multi-step plan
  /exeplan run <file>    — Execute all steps of a saved plan
  /undo                  — Undo the last file edit or write
  /save [name]           — Save the current session
  /load <id>             — Load a saved session
  /sessions              — List saved sessions
  /keys                  — Show keyboard shortcuts
  /history               — Show conversation context size";

const TOPIC_TOOLS: &str = "Agent tools available during operation:
  execute_shell  — Run a bash command and return output (with safety classification)
  read_file      — Read file contents (line count scales with the context window)
  write_file     — Write/append to a file (always requires confirmation)
  edit_file      — Search-and-replace edit with read-before-edit enforcement
  run_code       — Execute a code snippet (python, javascript, bash, ruby, perl, php, c, cpp, rust, go)
  list_directory — List directory contents with sizes and types
  search_files   — Text search (grep) or file search (find) in a directory
  git_tool       — Structured git: status, diff, log, branch, commit, stash
  natshell_help  — Look up NatShell documentation by topic (this tool)";

const TOPIC_MODELS: &str = "Model configuration:
  Default: Qwen3-4B Q4_K_M GGUF (~2.5 GB), downloaded with: natshell --download
  Model storage: ~/.local/share/natshell/models/

Local model config ([model] section in config.toml):
  path         — Path to a model file, or 'auto' for the default download
  n_ctx        — Context window (0 = auto: 4096 for <=4B models, 8192 for larger)
  n_gpu_layers — GPU layers (-1 = all, 0 = CPU only)
  main_gpu     — GPU device index (-1 = auto-detect)

Remote config ([remote] section):
  url, model, api_key (or the NATSHELL_API_KEY environment variable)
  CLI flags: --remote <url>, --remote-model <name>
  Any OpenAI-compatible server works: Ollama, vLLM, llama-server, hosted APIs.";

const TOPIC_TROUBLESHOOTING: &str = "Common issues:
  'Remote server unreachable'
    -> Check the URL in the [remote] config section.
       Ensure the server is running (e.g. ollama serve) and reachable.

  'No local model runtime is available'
    -> Install a model runtime plugin, or configure [remote] to use a server.

  'No local model found'
    -> Run: natshell --download  (fetches the default model)

  Slow inference / high CPU
    -> Check n_gpu_layers in config (-1 offloads all layers to the GPU)
    -> Set n_threads to the physical core count

  Commands keep asking for confirmation
    -> That is the safety classifier doing its job; see topic 'safety'.";

const TOPIC_CONFIG_REFERENCE: &str = "Recognized configuration options (config.toml):

[model]
  path          — model file path, or \"auto\" (default)
  hf_repo       — source repository for --download
  hf_file       — file name for --download
  n_ctx         — context window override (0 = auto-detect)
  n_threads     — inference threads (0 = all cores)
  n_gpu_layers  — layers offloaded to GPU (-1 = all)
  main_gpu      — GPU device index (-1 = auto)

[remote]
  url           — OpenAI-compatible endpoint, e.g. http://localhost:11434/v1
  model         — model id on that endpoint
  api_key       — bearer token (or NATSHELL_API_KEY env var)
  n_ctx         — context window override (0 = server default)

[engine]
  preferred     — \"auto\", \"local\", or \"remote\" (persisted by /model commands)

[agent]
  max_steps        — step budget per request (0 = scale with context window)
  plan_max_steps   — step budget per plan step
  temperature      — sampling temperature
  max_tokens       — generation cap per completion
  context_reserve  — extra tokens held back from the context budget

[safety]
  mode            — \"confirm\" (default), \"warn\", or \"yolo\"
  always_confirm  — regex list requiring confirmation
  blocked         — regex list refused outright
  sensitive_paths — path fragments that gate read_file

[backup]
  dir           — backup directory (default: ~/.local/share/natshell/backups)
  max_per_file  — retained backups per file (default 10)";

#[derive(Deserialize)]
struct NatShellHelpInput {
    topic: String,
}

pub struct NatShellHelpTool;

#[async_trait::async_trait]
impl Tool for NatShellHelpTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "natshell_help",
            description: "Look up NatShell documentation by topic. Use this when the user asks \
                about NatShell itself: its commands, configuration, models, safety rules, or \
                troubleshooting. Topics: overview, commands, tools, models, troubleshooting, \
                config, config_reference, safety.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "topic": {
                        "type": "string",
                        "enum": ["overview", "commands", "tools", "models", "troubleshooting",
                                 "config", "config_reference", "safety"],
                        "description": "The documentation topic to look up."
                    }
                },
                "required": ["topic"]
            }),
            requires_confirmation: false,
        }
    }

    async fn execute(&self, context: &mut ToolContext<'_>, args: &Value) -> ToolResult {
        let input: NatShellHelpInput = match parse_args(&self.spec(), args) {
            Ok(input) => input,
            Err(failure) => return failure,
        };
        let body = match input.topic.as_str() {
            "overview" => TOPIC_OVERVIEW.to_string(),
            "commands" => TOPIC_COMMANDS.to_string(),
            "tools" => TOPIC_TOOLS.to_string(),
            "models" => TOPIC_MODELS.to_string(),
            "troubleshooting" => TOPIC_TROUBLESHOOTING.to_string(),
            "config_reference" => TOPIC_CONFIG_REFERENCE.to_string(),
            "config" => topic_config(context),
            "safety" => topic_safety(context),
            other => {
                return ToolResult::failure(format!(
                    "Unknown topic: {other}. Topics: overview, commands, tools, models, \
                     troubleshooting, config, config_reference, safety"
                ))
            }
        };
        ToolResult::success(body)
    }
}

/// The live user config file, truncated if huge.
fn topic_config(context: &ToolContext<'_>) -> String {
    let path = context.config_path;
    if !path.exists() {
        return format!(
            "No user config file found at {}.\nNatShell is using built-in defaults. \
             See topic 'config_reference' for the recognized options.",
            path.display()
        );
    }
    match std::fs::read_to_string(path) {
        Ok(mut text) => {
            if text.len() > 3000 {
                text.truncate(3000);
                text.push_str("\n... [truncated]");
            }
            format!("User config ({}):\n\n{text}", path.display())
        }
        Err(err) => format!("Could not read {}: {err}", path.display()),
    }
}

/// The live safety policy, straight from the classifier's configuration.
fn topic_safety(context: &ToolContext<'_>) -> String {
    let safety = context.safety;
    let mode_line = match safety.mode {
        SafetyMode::Confirm => "confirm — risky commands ask before running (default)",
        SafetyMode::Warn => "warn — risky commands run with a warning",
        SafetyMode::Yolo => "yolo — risky commands run without confirmation (blocked patterns still refuse)",
    };
    let mut out = format!(
        "Safety classification is deterministic and regex-based. Every shell command is \
         checked whole, then split on && || ; & | and each segment is classified.\n\n\
         Mode: {mode_line}\n\nBlocked patterns (never run):\n"
    );
    for pattern in &safety.blocked {
        out.push_str(&format!("  {pattern}\n"));
    }
    out.push_str("\nAlways-confirm patterns:\n");
    for pattern in &safety.always_confirm {
        out.push_str(&format!("  {pattern}\n"));
    }
    out.push_str("\nSensitive path fragments (gate read_file):\n");
    for fragment in &safety.sensitive_paths {
        out.push_str(&format!("  {fragment}\n"));
    }
    out
}
