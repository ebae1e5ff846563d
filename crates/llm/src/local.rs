//! Local inference backend.
//!
//! The tokenizer and language-model runtime are loaded from a model file by
//! a [`ModelRuntime`] implementation supplied at construction time (the
//! plugin layer provides the concrete binding; tests use a scripted one).
//! This module owns everything around the runtime: rendering tool schemas
//! into the system prompt, offloading the blocking generation call,
//! honoring cancellation at token boundaries, and parsing tool-call
//! markers out of the raw output.

use crate::parse::{clean_content, context_window_for_model, extract_tool_calls};
use crate::types::{
    ChatMessage, CompletionResult, EngineError, EngineInfo, EngineKind, FinishReason, ToolSchema,
};
use crate::{CompletionRequest, InferenceEngine};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Raw output of one generation pass.
#[derive(Debug, Clone)]
pub struct RawCompletion {
    pub text: String,
    pub finish_reason: FinishReason,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// The seam to the bundled tokenizer + language-model runtime.
///
/// `complete` is synchronous and is always called from a worker thread.
/// The runtime must invoke `on_token` for every decoded token and stop at
/// the next boundary once the callback returns `false` (the caller then
/// sees `FinishReason::Cancelled`).
pub trait ModelRuntime: Send + Sync {
    /// Context window reported by the loaded model, if it knows one.
    fn context_window(&self) -> Option<u32>;

    /// Whether layers were actually offloaded to a GPU.
    fn gpu_offload(&self) -> bool;

    fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
        on_token: &mut dyn FnMut(&str) -> bool,
    ) -> anyhow::Result<RawCompletion>;
}

pub struct LocalEngine {
    runtime: Arc<dyn ModelRuntime>,
    model_name: String,
    context_window: u32,
    n_gpu_layers: i32,
}

impl LocalEngine {
    /// `configured_n_ctx` of zero means auto: prefer what the runtime
    /// reports, else infer from the model-file name.
    pub fn new(
        runtime: Arc<dyn ModelRuntime>,
        model_path: &Path,
        configured_n_ctx: u32,
        n_gpu_layers: i32,
    ) -> Self {
        let model_name = model_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| model_path.display().to_string());
        let context_window = match (configured_n_ctx, runtime.context_window()) {
            (0, Some(n)) if n > 0 => n.min(262_144),
            (n_ctx, _) => context_window_for_model(&model_name, n_ctx),
        };
        info!(model = %model_name, context_window, "local engine ready");
        Self {
            runtime,
            model_name,
            context_window,
            n_gpu_layers,
        }
    }

    /// Render tool schemas into the system message as plain text. The
    /// model answers with `<tool_call>` markers, so the schemas travel in
    /// the prompt rather than a structured API field.
    fn inline_tools(messages: &[ChatMessage], tools: &[ToolSchema]) -> Vec<ChatMessage> {
        let mut docs = String::from(
            "\n\n# Tools\n\n\
             You may call one or more of the following tools. To call a tool, \
             emit exactly:\n\
             <tool_call>{\"name\": \"<tool_name>\", \"arguments\": {…}}</tool_call>\n\n",
        );
        for tool in tools {
            docs.push_str(&format!(
                "## {}\n{}\nParameters (JSON Schema): {}\n\n",
                tool.name, tool.description, tool.parameters
            ));
        }

        let mut rendered: Vec<ChatMessage> = Vec::with_capacity(messages.len() + 1);
        let mut had_system = false;
        for message in messages {
            if let ChatMessage::System { content } = message {
                if !had_system {
                    had_system = true;
                    rendered.push(ChatMessage::system(format!("{content}{docs}")));
                    continue;
                }
            }
            rendered.push(message.clone());
        }
        if !had_system {
            rendered.insert(0, ChatMessage::system(docs));
        }
        rendered
    }
}

#[async_trait]
impl InferenceEngine for LocalEngine {
    async fn chat_completion(
        &self,
        request: CompletionRequest<'_>,
    ) -> Result<CompletionResult, EngineError> {
        let messages = match request.tools {
            Some(tools) if !tools.is_empty() => Self::inline_tools(request.messages, tools),
            _ => request.messages.to_vec(),
        };
        let runtime = self.runtime.clone();
        let temperature = request.temperature;
        let max_tokens = request.max_tokens;
        let cancel = request.cancel.clone();

        // The runtime is synchronous; run it on a worker thread so the
        // loop (and front-end) stay responsive.
        let raw = tokio::task::spawn_blocking(move || {
            let mut keep_going = move |_token: &str| !cancel.is_cancelled();
            runtime.complete(&messages, temperature, max_tokens, &mut keep_going)
        })
        .await
        .map_err(|err| EngineError::Other(format!("inference worker panicked: {err}")))?
        .map_err(|err| EngineError::Other(err.to_string()))?;

        if request.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let tool_calls = extract_tool_calls(&raw.text);
        let content = clean_content(&raw.text);
        debug!(
            tool_calls = tool_calls.len(),
            has_text = content.is_some(),
            "local completion parsed"
        );

        let finish_reason = if !tool_calls.is_empty() {
            FinishReason::ToolCalls
        } else {
            raw.finish_reason
        };

        Ok(CompletionResult {
            content,
            tool_calls,
            finish_reason,
            prompt_tokens: raw.prompt_tokens,
            completion_tokens: raw.completion_tokens,
        })
    }

    fn info(&self) -> EngineInfo {
        EngineInfo {
            kind: EngineKind::Local,
            model: self.model_name.clone(),
            base_url: String::new(),
            context_window: self.context_window,
            n_gpu_layers: self.n_gpu_layers,
            supports_tool_calls: true,
        }
    }
}

impl LocalEngine {
    pub fn gpu_offload(&self) -> bool {
        self.runtime.gpu_offload()
    }
}
