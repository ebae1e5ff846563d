//! The ReAct agent loop.
//!
//! One user turn at a time: append the input, ask the engine, gate and
//! execute whatever tool calls come back, feed the results into the
//! conversation, repeat until the model answers in plain text or the step
//! budget runs out. Engine transport failures swap in the local fallback
//! for the rest of the turn; sudo authentication failures get exactly one
//! re-prompt and replay.

use crate::agent::context_manager::{CompactionStats, ContextManager};
use crate::agent::events::{AgentEvent, ErrorKind, EventSink};
use crate::backup::BackupManager;
use crate::config::{AgentConfig, SafetyConfig};
use crate::safety::{Risk, SafetyClassifier};
use crate::session::new_session_id;
use crate::tools::limits::steps_for_context_window;
use crate::tools::sudo::indicates_sudo_auth_failure;
use crate::tools::{FileReadTracker, SudoCache, ToolContext, ToolLimits, ToolRegistry, ToolResult};
use anyhow::Result;
use command_executor::CommandExecutor;
use llm::{
    ChatMessage, CompletionRequest, CompletionResult, EngineError, EngineInfo, EngineKind,
    FinishReason, InferenceEngine, ToolCall,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct AgentLoop {
    engine: Arc<dyn InferenceEngine>,
    fallback: Option<Arc<dyn InferenceEngine>>,
    executor: Box<dyn CommandExecutor>,
    registry: ToolRegistry,
    safety: SafetyClassifier,
    safety_config: SafetyConfig,
    limits: ToolLimits,
    context_manager: ContextManager,
    pub messages: Vec<ChatMessage>,
    pub session_id: String,
    tracker: FileReadTracker,
    backups: BackupManager,
    sudo: SudoCache,
    config_path: PathBuf,
    configured_max_steps: u32,
    max_steps: u32,
    temperature: f32,
    configured_max_tokens: u32,
    max_tokens: u32,
    context_reserve: u32,
    cancel: CancellationToken,
    fallback_gpu_warned: bool,
}

impl AgentLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        fallback: Option<Arc<dyn InferenceEngine>>,
        registry: ToolRegistry,
        safety_config: SafetyConfig,
        agent_config: &AgentConfig,
        backups: BackupManager,
        executor: Box<dyn CommandExecutor>,
        config_path: PathBuf,
    ) -> Result<Self> {
        let safety = SafetyClassifier::new(&safety_config)?;
        let mut agent = Self {
            engine,
            fallback,
            executor,
            registry,
            safety,
            safety_config,
            limits: ToolLimits::default(),
            context_manager: ContextManager::new(4096, agent_config.context_reserve),
            messages: Vec::new(),
            session_id: new_session_id(),
            tracker: FileReadTracker::new(),
            backups,
            sudo: SudoCache::new(),
            config_path,
            configured_max_steps: agent_config.max_steps,
            max_steps: 0,
            temperature: agent_config.temperature,
            configured_max_tokens: agent_config.max_tokens,
            max_tokens: agent_config.max_tokens,
            context_reserve: agent_config.context_reserve,
            cancel: CancellationToken::new(),
            fallback_gpu_warned: false,
        };
        agent.rescale();
        Ok(agent)
    }

    /// Install the system prompt and start a fresh conversation.
    pub fn initialize(&mut self, system_prompt: String) {
        self.messages = vec![ChatMessage::system(system_prompt)];
        self.session_id = new_session_id();
    }

    /// `/clear`: keep the system prompt, drop everything else, new id.
    pub fn clear(&mut self) {
        if let Some(first) = self.messages.first().filter(|m| m.is_system()).cloned() {
            self.messages = vec![first];
        } else {
            self.messages.clear();
        }
        self.session_id = new_session_id();
        self.tracker.clear();
        self.sudo.invalidate();
    }

    /// Swap the active engine at runtime. Budgets and limits follow the
    /// new context window.
    pub fn set_engine(&mut self, engine: Arc<dyn InferenceEngine>) {
        self.engine = engine;
        self.rescale();
    }

    pub fn set_fallback(&mut self, fallback: Option<Arc<dyn InferenceEngine>>) {
        self.fallback = fallback;
    }

    pub fn engine_info(&self) -> EngineInfo {
        self.engine.info()
    }

    pub fn tool_schemas(&self) -> Vec<llm::ToolSchema> {
        self.registry.schemas()
    }

    /// Token for the front-end to cancel the in-flight turn.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn undo_last_backup(&mut self) -> Result<String> {
        self.backups.undo_last()
    }

    pub fn undo_backup_for(&mut self, path: &std::path::Path) -> Result<String> {
        self.backups.undo_for(path)
    }

    /// (messages, approx tokens, window) for `/history`.
    pub fn context_usage(&self) -> (usize, usize, u32) {
        (
            self.messages.len(),
            self.context_manager.estimate_tokens(&self.messages),
            self.context_manager.context_window,
        )
    }

    /// `/compact` on demand.
    pub async fn compact_now(&mut self) -> Option<CompactionStats> {
        let engine = self.engine.clone();
        let cancel = self.cancel.clone();
        self.context_manager
            .compact(&mut self.messages, engine.as_ref(), &cancel)
            .await
    }

    /// Restore a loaded session's history under its id.
    pub fn load_history(&mut self, session_id: String, messages: Vec<ChatMessage>) {
        self.session_id = session_id;
        self.messages = messages;
        self.tracker.clear();
    }

    fn rescale(&mut self) {
        let window = self.engine.info().context_window;
        self.limits = ToolLimits::for_context_window(window);
        self.max_steps = if self.configured_max_steps > 0 {
            self.configured_max_steps
        } else {
            steps_for_context_window(window)
        };
        // A generation cap that cannot fit in the window is a config
        // mistake; clamp rather than fail every request.
        self.max_tokens = self.configured_max_tokens.min(window / 2).max(256);
        self.context_manager = ContextManager::new(window, self.context_reserve);
    }

    /// Process one user message through the full loop.
    pub async fn handle_user_message(&mut self, input: &str, sink: &dyn EventSink) -> Result<()> {
        self.handle_message_with_budget(input, sink, None).await
    }

    /// Same loop with an explicit step budget (plan execution).
    pub async fn handle_message_with_budget(
        &mut self,
        input: &str,
        sink: &dyn EventSink,
        step_budget: Option<u32>,
    ) -> Result<()> {
        // Recycle a token consumed by a previous cancellation, so a stale
        // Ctrl+C cannot kill this turn. Front-ends fetch the live token
        // with `cancel_token()` before dispatching input.
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.messages.push(ChatMessage::user(input));

        let max_steps = step_budget.unwrap_or(self.max_steps);
        let schemas = self.registry.schemas();
        let mut turn_engine = self.engine.clone();
        let mut fell_back = false;
        let mut compacted_for_overflow = false;

        for _step in 0..max_steps {
            if self.cancel.is_cancelled() {
                self.note_cancellation(sink).await;
                return Ok(());
            }
            sink.event(AgentEvent::Thinking).await;

            if self
                .context_manager
                .needs_compaction(&self.messages, self.max_tokens)
            {
                let engine = turn_engine.clone();
                let cancel = self.cancel.clone();
                self.context_manager
                    .compact(&mut self.messages, engine.as_ref(), &cancel)
                    .await;
            }

            // Engine call, with transport fallback and one overflow
            // recovery per turn.
            let result = loop {
                let request = CompletionRequest {
                    messages: &self.messages,
                    tools: Some(&schemas),
                    temperature: self.temperature,
                    max_tokens: self.max_tokens,
                    cancel: &self.cancel,
                };
                match turn_engine.chat_completion(request).await {
                    Ok(result) => break result,
                    Err(EngineError::Cancelled) => {
                        self.note_cancellation(sink).await;
                        return Ok(());
                    }
                    Err(err) if err.is_transport() && !fell_back && self.fallback.is_some() => {
                        fell_back = true;
                        let fallback = match self.fallback.clone() {
                            Some(fallback) => fallback,
                            None => continue, // guard guarantees presence
                        };
                        let from = turn_engine.info();
                        let to = fallback.info();
                        warn!(
                            "engine {} unreachable ({err}); falling back to {} for this turn",
                            from.model, to.model
                        );
                        if to.kind == EngineKind::Local
                            && to.n_gpu_layers == 0
                            && !self.fallback_gpu_warned
                        {
                            self.fallback_gpu_warned = true;
                            warn!("fallback model runs without GPU offload; expect slower responses");
                        }
                        sink.event(AgentEvent::EngineFallback {
                            from: from.model,
                            to: to.model,
                        })
                        .await;
                        turn_engine = fallback;
                    }
                    Err(EngineError::ContextOverflow(detail)) if !compacted_for_overflow => {
                        compacted_for_overflow = true;
                        warn!("prompt overflowed the remote context window: {detail}");
                        let engine = turn_engine.clone();
                        let cancel = self.cancel.clone();
                        let compacted = self
                            .context_manager
                            .compact(&mut self.messages, engine.as_ref(), &cancel)
                            .await;
                        if compacted.is_none() {
                            sink.event(AgentEvent::Error {
                                kind: ErrorKind::Engine,
                                message: "Prompt exceeds the model context window and cannot be compacted further.".to_string(),
                            })
                            .await;
                            return Ok(());
                        }
                    }
                    Err(err) => {
                        error!("inference error: {err}");
                        sink.event(AgentEvent::Error {
                            kind: ErrorKind::Engine,
                            message: format!("Inference error: {err}"),
                        })
                        .await;
                        return Ok(());
                    }
                }
            };

            // A truncated response with no content and no calls usually
            // means reasoning consumed the whole budget.
            if result.finish_reason == FinishReason::Length
                && result.tool_calls.is_empty()
                && result
                    .content
                    .as_deref()
                    .map(|c| c.trim().is_empty())
                    .unwrap_or(true)
            {
                sink.event(AgentEvent::Error {
                    kind: ErrorKind::Engine,
                    message: "Response was truncated — the model used all available tokens \
                              without producing a complete response. Try a simpler request."
                        .to_string(),
                })
                .await;
                return Ok(());
            }

            if !result.tool_calls.is_empty() {
                self.run_tool_batch(&result, sink).await;
                continue;
            }

            if let Some(text) = result.content {
                self.messages.push(ChatMessage::assistant_text(text.clone()));
                sink.event(AgentEvent::Response(text)).await;
                return Ok(());
            }

            sink.event(AgentEvent::Error {
                kind: ErrorKind::Internal,
                message: "Model returned an empty response.".to_string(),
            })
            .await;
            return Ok(());
        }

        let notice = format!(
            "I've reached the maximum number of steps ({max_steps}). Here's what I've done \
             so far. You can continue with a follow-up request."
        );
        self.messages.push(ChatMessage::assistant_text(notice.clone()));
        sink.event(AgentEvent::Response(notice)).await;
        Ok(())
    }

    /// Gate and execute one batch of tool calls. Each call is gated
    /// independently, results land in declared order, and a cancellation
    /// mid-batch still pairs every call with a tool turn.
    async fn run_tool_batch(&mut self, result: &CompletionResult, sink: &dyn EventSink) {
        if let Some(text) = &result.content {
            sink.event(AgentEvent::Planning(text.clone())).await;
        }
        self.messages.push(ChatMessage::assistant_calls(
            result.content.clone(),
            result.tool_calls.clone(),
        ));

        for call in &result.tool_calls {
            if self.cancel.is_cancelled() {
                self.messages.push(ChatMessage::tool_result(
                    call.id.clone(),
                    "CANCELLED: the user cancelled this operation before it ran.",
                ));
                continue;
            }

            let hint = self
                .registry
                .get(&call.name)
                .map(|tool| tool.spec().requires_confirmation)
                .unwrap_or(false);
            let classification = self.safety.classify_tool_call(call, hint);
            if let Some(warning) = &classification.warning {
                warn!("running without confirmation (warn mode): {warning}");
            }
            match classification.risk {
                Risk::Blocked => {
                    sink.event(AgentEvent::Blocked {
                        call: call.clone(),
                        reason: classification.reason.clone(),
                    })
                    .await;
                    self.messages.push(ChatMessage::tool_result(
                        call.id.clone(),
                        format!(
                            "BLOCKED: dangerous pattern `{}`. This command was blocked by the \
                             safety classifier. Try an alternative approach.",
                            classification.reason
                        ),
                    ));
                }
                Risk::Confirm => {
                    if sink.confirm(call, &classification.reason).await {
                        self.execute_and_record(call, sink).await;
                    } else {
                        let declined = ToolResult::failure("User declined this operation.");
                        sink.event(AgentEvent::ToolFinished {
                            call: call.clone(),
                            result: declined.clone(),
                        })
                        .await;
                        self.messages.push(ChatMessage::tool_result(
                            call.id.clone(),
                            "DECLINED: the user declined to execute this command.",
                        ));
                    }
                }
                Risk::Safe => {
                    self.execute_and_record(call, sink).await;
                }
            }
        }
    }

    async fn execute_and_record(&mut self, call: &ToolCall, sink: &dyn EventSink) {
        sink.event(AgentEvent::Executing(call.clone())).await;
        let result = self.run_tool_with_sudo_retry(call, sink).await;
        sink.event(AgentEvent::ToolFinished {
            call: call.clone(),
            result: result.clone(),
        })
        .await;
        self.messages
            .push(ChatMessage::tool_result(call.id.clone(), result.to_message_content()));
    }

    /// Execute a tool; on sudo authentication failure, invalidate the
    /// cache, ask the front-end once, and replay.
    async fn run_tool_with_sudo_retry(
        &mut self,
        call: &ToolCall,
        sink: &dyn EventSink,
    ) -> ToolResult {
        let mut result = self.run_tool(call).await;

        let sudo_involved = call.name == "execute_shell"
            && call
                .str_arg("command")
                .map(|c| c.contains("sudo"))
                .unwrap_or(false);
        if sudo_involved && indicates_sudo_auth_failure(result.exit_code, &result.error) {
            self.sudo.invalidate();
            if let Some(password) = sink.request_sudo_password().await {
                self.sudo.store(password);
                info!("replaying command after sudo re-prompt");
                result = self.run_tool(call).await;
                if indicates_sudo_auth_failure(result.exit_code, &result.error) {
                    // Wrong password; do not keep it around.
                    self.sudo.invalidate();
                }
            }
        }
        result
    }

    async fn run_tool(&mut self, call: &ToolCall) -> ToolResult {
        let Self {
            registry,
            executor,
            limits,
            tracker,
            backups,
            sudo,
            safety_config,
            config_path,
            cancel,
            ..
        } = self;
        let mut context = ToolContext {
            executor: executor.as_ref(),
            limits,
            tracker,
            backups,
            sudo,
            safety: safety_config,
            config_path,
            cancel: cancel.clone(),
        };
        registry
            .execute(&call.name, &call.arguments, &mut context)
            .await
    }

    async fn note_cancellation(&mut self, sink: &dyn EventSink) {
        self.messages
            .push(ChatMessage::user("[Request cancelled by the user.]"));
        sink.event(AgentEvent::Response("Request cancelled.".to_string()))
            .await;
    }

    /// `/cmd`: run a shell command directly, still gated, and let the
    /// model see what happened.
    pub async fn run_direct_command(&mut self, command: &str, sink: &dyn EventSink) -> Result<()> {
        let call = ToolCall::new(
            "execute_shell",
            serde_json::json!({ "command": command }),
        );
        let classification = self.safety.classify_command(command);
        match classification.risk {
            Risk::Blocked => {
                sink.event(AgentEvent::Blocked {
                    call,
                    reason: classification.reason,
                })
                .await;
                return Ok(());
            }
            Risk::Confirm => {
                if !sink.confirm(&call, &classification.reason).await {
                    sink.event(AgentEvent::Response("Command cancelled.".to_string()))
                        .await;
                    return Ok(());
                }
            }
            Risk::Safe => {}
        }

        sink.event(AgentEvent::Executing(call.clone())).await;
        let result = self.run_tool_with_sudo_retry(&call, sink).await;
        sink.event(AgentEvent::ToolFinished {
            call,
            result: result.clone(),
        })
        .await;

        // Inject a record so the model knows what the user ran by hand.
        let output = if result.output.is_empty() {
            result.error.clone()
        } else {
            result.output.clone()
        };
        self.messages.push(ChatMessage::user(format!(
            "[The user directly ran a shell command: `{command}`]\nExit code: {}\nOutput:\n{output}",
            result.exit_code
        )));
        Ok(())
    }
}
