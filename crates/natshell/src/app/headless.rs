//! Headless mode: one prompt, one exit code.
//!
//! The final response is the only thing written to stdout, so the output
//! pipes cleanly; everything else (tool output, diagnostics, errors) goes
//! to stderr. Any error during the run yields exit code 1, even if some
//! output already reached stdout.

use crate::agent::{AgentEvent, EventSink};
use crate::orchestrator::Orchestrator;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct HeadlessSink {
    auto_approve: bool,
    error_seen: AtomicBool,
}

impl HeadlessSink {
    pub fn new(auto_approve: bool) -> Self {
        Self {
            auto_approve,
            error_seen: AtomicBool::new(false),
        }
    }

    pub fn saw_error(&self) -> bool {
        self.error_seen.load(Ordering::Relaxed)
    }
}

fn err(message: impl AsRef<str>) {
    eprintln!("{}", message.as_ref());
}

#[async_trait::async_trait]
impl EventSink for HeadlessSink {
    async fn event(&self, event: AgentEvent) {
        match event {
            AgentEvent::Thinking => {}
            AgentEvent::Planning(text) => err(format!("[thinking] {text}")),
            AgentEvent::Executing(call) => err(format!("[executing] {}", call.name)),
            AgentEvent::ToolFinished { result, .. } => {
                if !result.output.is_empty() {
                    err(&result.output);
                }
                if !result.error.is_empty() {
                    err(format!("[stderr] {}", result.error));
                }
            }
            AgentEvent::Blocked { call, reason } => {
                err(format!("[BLOCKED] {}: {reason}", call.name));
            }
            AgentEvent::EngineFallback { from, to } => {
                err(format!("[fallback] {from} unavailable, using {to}"));
            }
            AgentEvent::Response(text) => {
                // The pipeable payload.
                println!("{text}");
            }
            AgentEvent::Error { message, .. } => {
                self.error_seen.store(true, Ordering::Relaxed);
                err(format!("[error] {message}"));
            }
        }
    }

    async fn confirm(&self, call: &llm::ToolCall, _reason: &str) -> bool {
        if self.auto_approve {
            err(format!("[auto-approved] {}: {}", call.name, call.arguments));
            true
        } else {
            err(format!(
                "[declined — use --danger-fast to auto-approve] {}",
                call.name
            ));
            false
        }
    }

    async fn request_sudo_password(&self) -> Option<String> {
        err("[sudo required — headless mode cannot prompt for a password]");
        None
    }
}

/// Run one prompt and return the process exit code.
pub async fn run(mut orchestrator: Orchestrator, prompt: &str, auto_approve: bool) -> u8 {
    let sink = HeadlessSink::new(auto_approve);

    // Ctrl+C cancels the loop's token; the same turn future is then polled
    // to completion so in-flight subprocesses are torn down cleanly. An
    // interrupted run is not a success.
    let cancel = orchestrator.agent.cancel_token();
    let mut cancelled = false;
    let outcome = {
        let turn = orchestrator.handle_input(prompt, &sink);
        tokio::pin!(turn);
        loop {
            tokio::select! {
                outcome = &mut turn => break outcome,
                _ = tokio::signal::ctrl_c(), if !cancelled => {
                    cancelled = true;
                    err("[interrupted — cancelling]");
                    cancel.cancel();
                }
            }
        }
    };

    match outcome {
        Ok(extra) => {
            if let Some(text) = extra {
                println!("{text}");
            }
            if cancelled || sink.saw_error() {
                1
            } else {
                0
            }
        }
        Err(error) => {
            err(format!("[error] {error:#}"));
            1
        }
    }
}
