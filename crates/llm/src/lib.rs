//! Inference engine abstraction.
//!
//! The agent loop is polymorphic over [`InferenceEngine`]; the two
//! implementations are a local backend driving an in-process model runtime
//! and a remote backend speaking the OpenAI chat-completions dialect
//! (Ollama, vLLM, llama-server and the hosted APIs all accept it).

pub mod local;
pub mod parse;
pub mod remote;
pub mod types;

pub use local::{LocalEngine, ModelRuntime, RawCompletion};
pub use remote::RemoteEngine;
pub use types::{
    ChatMessage, CompletionResult, EngineError, EngineInfo, EngineKind, FinishReason, ToolCall,
    ToolSchema,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// One chat-completion request. Borrowed so the loop never clones its
/// history just to ask a question.
pub struct CompletionRequest<'a> {
    pub messages: &'a [ChatMessage],
    pub tools: Option<&'a [ToolSchema]>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub cancel: &'a CancellationToken,
}

#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn chat_completion(
        &self,
        request: CompletionRequest<'_>,
    ) -> Result<CompletionResult, EngineError>;

    fn info(&self) -> EngineInfo;
}
