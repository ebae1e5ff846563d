//! Shared test doubles: a scripted inference engine and a recording event
//! sink.

use crate::agent::{AgentEvent, EventSink};
use llm::{
    CompletionRequest, CompletionResult, EngineError, EngineInfo, EngineKind, FinishReason,
    InferenceEngine, ToolCall,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// An engine that replays a scripted sequence of results. When the script
/// runs dry it answers with plain text so loops terminate.
pub struct MockEngine {
    script: Mutex<VecDeque<Result<CompletionResult, EngineError>>>,
    pub calls: AtomicUsize,
    info: EngineInfo,
}

impl MockEngine {
    pub fn new(script: Vec<Result<CompletionResult, EngineError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
            info: EngineInfo {
                kind: EngineKind::Local,
                model: "mock-4B".to_string(),
                base_url: String::new(),
                context_window: 4096,
                n_gpu_layers: 0,
                supports_tool_calls: true,
            },
        }
    }

    pub fn remote(script: Vec<Result<CompletionResult, EngineError>>) -> Self {
        let mut engine = Self::new(script);
        engine.info.kind = EngineKind::Remote;
        engine.info.model = "mock-remote".to_string();
        engine.info.base_url = "http://mock:1234/v1".to_string();
        engine
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

/// A text-only completion.
pub fn text(content: &str) -> Result<CompletionResult, EngineError> {
    Ok(CompletionResult {
        content: Some(content.to_string()),
        tool_calls: Vec::new(),
        finish_reason: FinishReason::Stop,
        prompt_tokens: 10,
        completion_tokens: 5,
    })
}

/// A completion carrying one tool call.
pub fn tool_call(name: &str, arguments: serde_json::Value) -> Result<CompletionResult, EngineError> {
    tool_calls(vec![(name, arguments)])
}

/// A completion carrying several tool calls in order.
pub fn tool_calls(
    calls: Vec<(&str, serde_json::Value)>,
) -> Result<CompletionResult, EngineError> {
    Ok(CompletionResult {
        content: None,
        tool_calls: calls
            .into_iter()
            .map(|(name, arguments)| ToolCall::new(name, arguments))
            .collect(),
        finish_reason: FinishReason::ToolCalls,
        prompt_tokens: 10,
        completion_tokens: 5,
    })
}

#[async_trait::async_trait]
impl InferenceEngine for MockEngine {
    async fn chat_completion(
        &self,
        _request: CompletionRequest<'_>,
    ) -> Result<CompletionResult, EngineError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| text("done"))
    }

    fn info(&self) -> EngineInfo {
        self.info.clone()
    }
}

/// Records every event; answers confirmations and sudo prompts with
/// preset values.
pub struct RecordingSink {
    pub events: Mutex<Vec<AgentEvent>>,
    pub confirm_answer: bool,
    pub confirms_asked: AtomicUsize,
    pub sudo_answer: Mutex<Option<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::answering(true)
    }

    pub fn answering(confirm_answer: bool) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            confirm_answer,
            confirms_asked: AtomicUsize::new(0),
            sudo_answer: Mutex::new(None),
        }
    }

    /// Event discriminants in order, for sequence assertions.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| match event {
                AgentEvent::Thinking => "thinking",
                AgentEvent::Planning(_) => "planning",
                AgentEvent::Executing(_) => "executing",
                AgentEvent::ToolFinished { .. } => "tool_finished",
                AgentEvent::Blocked { .. } => "blocked",
                AgentEvent::EngineFallback { .. } => "fallback",
                AgentEvent::Response(_) => "response",
                AgentEvent::Error { .. } => "error",
            })
            .collect()
    }

    pub fn responses(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                AgentEvent::Response(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn confirm_count(&self) -> usize {
        self.confirms_asked.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl EventSink for RecordingSink {
    async fn event(&self, event: AgentEvent) {
        self.events.lock().unwrap().push(event);
    }

    async fn confirm(&self, _call: &ToolCall, _reason: &str) -> bool {
        self.confirms_asked.fetch_add(1, Ordering::Relaxed);
        self.confirm_answer
    }

    async fn request_sudo_password(&self) -> Option<String> {
        self.sudo_answer.lock().unwrap().clone()
    }
}
