//! The tool runtime: registration, dispatch, and the eight built-in tools.
//!
//! Tool failures are data, not errors — a tool always produces a
//! [`ToolResult`] that goes back into the conversation for the model to
//! reason about. Only infrastructure problems (a poisoned registry, a
//! missing context) surface as `Err` to the loop.

pub mod edit_file;
pub mod execute_shell;
pub mod git_tool;
pub mod limits;
pub mod list_directory;
pub mod natshell_help;
pub mod read_file;
pub mod run_code;
pub mod search_files;
pub mod sudo;
pub mod tracker;
pub mod write_file;

pub use limits::ToolLimits;
pub use sudo::SudoCache;
pub use tracker::FileReadTracker;

use crate::backup::BackupManager;
use crate::config::SafetyConfig;
use command_executor::CommandExecutor;
use llm::ToolSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of a tool execution. Non-shell tools encode their status the
/// same way: exit code 0 means success.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ToolResult {
    pub output: String,
    pub error: String,
    pub exit_code: i32,
    pub truncated: bool,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            exit_code: 1,
            ..Default::default()
        }
    }

    pub fn failure_with_code(error: impl Into<String>, exit_code: i32) -> Self {
        Self {
            error: error.into(),
            exit_code,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Render for the conversation as the content of a `tool` turn.
    pub fn to_message_content(&self) -> String {
        let mut parts = Vec::new();
        if self.exit_code != 0 {
            parts.push(format!("Exit code: {}", self.exit_code));
        }
        if !self.output.is_empty() {
            parts.push(self.output.clone());
        }
        if !self.error.is_empty() {
            parts.push(format!("stderr:\n{}", self.error));
        }
        if self.truncated {
            parts.push("[output was truncated]".to_string());
        }
        if parts.is_empty() {
            "(no output)".to_string()
        } else {
            parts.join("\n")
        }
    }
}

/// Static metadata for a tool.
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// JSON-Schema object describing the parameters.
    pub parameters: Value,
    /// Hint mirrored to front-ends; the safety classifier is authoritative.
    pub requires_confirmation: bool,
}

impl ToolSpec {
    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.to_string(),
            description: self.description.to_string(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Mutable state threaded into every tool execution. All of it is owned by
/// the agent loop; nothing here is global.
pub struct ToolContext<'a> {
    pub executor: &'a dyn CommandExecutor,
    pub limits: &'a ToolLimits,
    pub tracker: &'a mut FileReadTracker,
    pub backups: &'a mut BackupManager,
    pub sudo: &'a mut SudoCache,
    pub safety: &'a SafetyConfig,
    pub config_path: &'a Path,
    pub cancel: CancellationToken,
}

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn execute(&self, context: &mut ToolContext<'_>, args: &Value) -> ToolResult;
}

/// Deserialize tool arguments, with one recovery attempt: models sometimes
/// hallucinate argument names, so when the shapes line up we remap the
/// provided values onto the schema's parameters by position.
pub fn parse_args<T: DeserializeOwned>(spec: &ToolSpec, args: &Value) -> Result<T, ToolResult> {
    match serde_json::from_value::<T>(args.clone()) {
        Ok(input) => Ok(input),
        Err(original_err) => {
            if let Some(remapped) = remap_by_position(spec, args) {
                if let Ok(input) = serde_json::from_value::<T>(remapped) {
                    warn!(
                        tool = spec.name,
                        "remapped mismatched argument names by position"
                    );
                    return Ok(input);
                }
            }
            Err(ToolResult::failure(format!(
                "Invalid arguments for {}: {}. Expected parameters: {}",
                spec.name,
                original_err,
                parameter_names(spec).join(", ")
            )))
        }
    }
}

fn parameter_names(spec: &ToolSpec) -> Vec<String> {
    spec.parameters
        .get("properties")
        .and_then(|p| p.as_object())
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default()
}

fn remap_by_position(spec: &ToolSpec, args: &Value) -> Option<Value> {
    let provided = args.as_object()?;
    let expected = parameter_names(spec);
    if provided.len() != expected.len() || expected.is_empty() {
        return None;
    }
    let remapped: serde_json::Map<String, Value> = expected
        .into_iter()
        .zip(provided.values().cloned())
        .collect();
    Some(Value::Object(remapped))
}

/// Registry mapping tool names to implementations, in registration order.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// The eight core tools plus self-documentation.
    pub fn with_default_tools() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(execute_shell::ExecuteShellTool));
        registry.register(Box::new(read_file::ReadFileTool));
        registry.register(Box::new(write_file::WriteFileTool));
        registry.register(Box::new(edit_file::EditFileTool));
        registry.register(Box::new(run_code::RunCodeTool));
        registry.register(Box::new(list_directory::ListDirectoryTool));
        registry.register(Box::new(search_files::SearchFilesTool));
        registry.register(Box::new(git_tool::GitTool));
        registry.register(Box::new(natshell_help::NatShellHelpTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        debug!("registered tool: {}", tool.spec().name);
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|tool| tool.spec().name == name)
            .map(|tool| &**tool)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|tool| tool.spec().name).collect()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|tool| tool.spec().schema()).collect()
    }

    pub async fn execute(
        &self,
        name: &str,
        args: &Value,
        context: &mut ToolContext<'_>,
    ) -> ToolResult {
        match self.get(name) {
            Some(tool) => tool.execute(context, args).await,
            None => ToolResult::failure(format!(
                "Unknown tool: {name}. Available tools: {}",
                self.names().join(", ")
            )),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_default_tools()
    }
}
