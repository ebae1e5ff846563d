//! The event stream between the agent loop and whatever front-end is
//! driving it. This is the whole interface: render these, answer the two
//! questions, and any UI works.

use crate::tools::ToolResult;
use llm::ToolCall;

/// Error categories that reach the user surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid slash-command or CLI argument.
    UserInput,
    /// Both engines unusable, or the active engine failed terminally.
    Engine,
    /// Refused before any I/O: bad session id, symlinked backup target…
    Security,
    /// Unexpected invariant violation.
    Internal,
}

#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// The model is generating.
    Thinking,
    /// Free text the model produced before its tool calls.
    Planning(String),
    /// A tool call is about to run.
    Executing(ToolCall),
    /// A tool call finished (or was declined/blocked with a synthetic
    /// result).
    ToolFinished { call: ToolCall, result: ToolResult },
    /// A tool call was refused by the safety classifier.
    Blocked { call: ToolCall, reason: String },
    /// The active engine failed and the loop switched to the fallback.
    EngineFallback { from: String, to: String },
    /// Terminal text answer for this turn.
    Response(String),
    Error { kind: ErrorKind, message: String },
}

#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn event(&self, event: AgentEvent);

    /// Ask the user to approve a Confirm-classified tool call.
    async fn confirm(&self, call: &ToolCall, reason: &str) -> bool;

    /// Ask the user for the sudo password after an authentication failure.
    /// `None` means the user declined.
    async fn request_sudo_password(&self) -> Option<String>;
}
