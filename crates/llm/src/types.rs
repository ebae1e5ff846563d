use serde::{Deserialize, Serialize};

/// A conversation turn. Serialized as a tagged representation keyed on
/// `role`, which is also the wire shape OpenAI-compatible servers expect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    /// The initial prompt, immutable for a session. Synthetic context
    /// summaries are also tagged `system`.
    System { content: String },
    /// Verbatim user input.
    User { content: String },
    /// Model output: free text, tool calls, or both.
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    /// Structured result for one tool call.
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage::System { content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::User { content: content.into() }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        ChatMessage::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        ChatMessage::Assistant { content, tool_calls }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, ChatMessage::System { .. })
    }

    /// Text content regardless of variant, for sizing and summaries.
    pub fn text(&self) -> &str {
        match self {
            ChatMessage::System { content }
            | ChatMessage::User { content }
            | ChatMessage::Tool { content, .. } => content,
            ChatMessage::Assistant { content, .. } => content.as_deref().unwrap_or(""),
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            ChatMessage::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// A tool invocation requested by the model. `id` is unique within a
/// single assistant turn and links the call to its result message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Already-parsed argument object.
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: fresh_call_id(),
            name: name.into(),
            arguments,
        }
    }

    /// Fetch a string argument, tolerating absence.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }
}

/// Short unique id for a tool call minted on the client side.
pub fn fresh_call_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &id[..12])
}

/// Schema a tool exposes to the model, in the OpenAI function shape.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON-Schema object describing the parameters.
    pub parameters: serde_json::Value,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    ToolCalls,
    Length,
    Cancelled,
    Error,
}

/// Result of a chat-completion request, normalized across backends.
#[derive(Debug, Clone, Default)]
pub struct CompletionResult {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Local,
    Remote,
}

/// Metadata about an inference backend, used for display, scaling and
/// session records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInfo {
    pub kind: EngineKind,
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    pub context_window: u32,
    #[serde(default)]
    pub n_gpu_layers: i32,
    pub supports_tool_calls: bool,
}

/// Errors from inference backends. The transport class drives the agent
/// loop's fallback decision.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("cannot connect to {0} — is the server running?")]
    Connect(String),

    #[error("connection to {0} timed out")]
    ConnectTimeout(String),

    #[error("request to {0} timed out waiting for a response")]
    ReadTimeout(String),

    #[error("protocol error talking to {0}: {1}")]
    Protocol(String, String),

    #[error("remote API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("prompt exceeds the model context window: {0}")]
    ContextOverflow(String),

    #[error("generation cancelled")]
    Cancelled,

    #[error("no local model runtime is available: {0}")]
    RuntimeUnavailable(String),

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Transport-level failures trigger the local fallback after retries.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            EngineError::Connect(_)
                | EngineError::ConnectTimeout(_)
                | EngineError::ReadTimeout(_)
                | EngineError::Protocol(_, _)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_serialization_is_role_tagged() {
        let msg = ChatMessage::user("hello");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"], "hello");
    }

    #[test]
    fn assistant_without_calls_omits_the_field() {
        let msg = ChatMessage::assistant_text("done");
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("tool_calls").is_none());
    }

    #[test]
    fn message_roundtrip() {
        let messages = vec![
            ChatMessage::system("prompt"),
            ChatMessage::user("do it"),
            ChatMessage::assistant_calls(
                None,
                vec![ToolCall {
                    id: "call_1".into(),
                    name: "execute_shell".into(),
                    arguments: json!({"command": "date -u"}),
                }],
            ),
            ChatMessage::tool_result("call_1", "Mon Jan 1"),
        ];
        let text = serde_json::to_string(&messages).unwrap();
        let parsed: Vec<ChatMessage> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, messages);
    }

    #[test]
    fn fresh_ids_are_unique() {
        assert_ne!(fresh_call_id(), fresh_call_id());
    }

    #[test]
    fn transport_classification() {
        assert!(EngineError::Connect("x".into()).is_transport());
        assert!(EngineError::ReadTimeout("x".into()).is_transport());
        assert!(!EngineError::Api { status: 401, body: String::new() }.is_transport());
        assert!(!EngineError::ContextOverflow("x".into()).is_transport());
    }
}
