//! Minimal interactive front-end: a rustyline read loop over the agent's
//! event stream. Richer rendering belongs to an external TUI; this driver
//! exists so the binary is usable on its own.

use crate::agent::{AgentEvent, EventSink};
use crate::orchestrator::Orchestrator;
use anyhow::Result;
use rustyline::error::ReadlineError;
use std::io::Write;

pub struct TerminalSink;

fn read_line_blocking(prompt: String) -> Option<String> {
    print!("{prompt}");
    std::io::stdout().flush().ok()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).ok()?;
    Some(line.trim().to_string())
}

#[async_trait::async_trait]
impl EventSink for TerminalSink {
    async fn event(&self, event: AgentEvent) {
        match event {
            AgentEvent::Thinking => {
                println!("· thinking…");
            }
            AgentEvent::Planning(text) => {
                println!("── plan ──\n{text}");
            }
            AgentEvent::Executing(call) => {
                let detail = call
                    .str_arg("command")
                    .map(String::from)
                    .unwrap_or_else(|| call.arguments.to_string());
                println!("$ {} {detail}", call.name);
            }
            AgentEvent::ToolFinished { result, .. } => {
                if !result.output.is_empty() {
                    println!("{}", result.output);
                }
                if !result.error.is_empty() {
                    println!("stderr: {}", result.error);
                }
                if result.exit_code != 0 {
                    println!("(exit code {})", result.exit_code);
                }
            }
            AgentEvent::Blocked { call, reason } => {
                let detail = call.str_arg("command").unwrap_or("").to_string();
                println!("BLOCKED: {detail} (pattern: {reason})");
            }
            AgentEvent::EngineFallback { from, to } => {
                println!("! {from} unreachable — falling back to {to} for this request");
            }
            AgentEvent::Response(text) => {
                println!("\n{text}\n");
            }
            AgentEvent::Error { message, .. } => {
                println!("error: {message}");
            }
        }
    }

    async fn confirm(&self, call: &llm::ToolCall, reason: &str) -> bool {
        let summary = call
            .str_arg("command")
            .map(String::from)
            .unwrap_or_else(|| call.arguments.to_string());
        let prompt = format!(
            "\nConfirm {} ({reason}):\n  {summary}\nRun it? [y/N] ",
            call.name
        );
        let answer = tokio::task::spawn_blocking(move || read_line_blocking(prompt))
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        matches!(answer.to_lowercase().as_str(), "y" | "yes")
    }

    async fn request_sudo_password(&self) -> Option<String> {
        let prompt = "sudo password (input is echoed; Enter to cancel): ".to_string();
        let answer = tokio::task::spawn_blocking(move || read_line_blocking(prompt))
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        if answer.is_empty() {
            None
        } else {
            Some(answer)
        }
    }
}

/// The interactive loop: read, dispatch, repeat until EOF.
pub async fn run(mut orchestrator: Orchestrator) -> Result<()> {
    let info = orchestrator.agent.engine_info();
    println!("NatShell — natural language shell ({} / {})", info.model, info.context_window);
    println!("Type a request in plain English, or /help for commands.\n");

    let mut editor = rustyline::DefaultEditor::new()?;
    let sink = TerminalSink;
    loop {
        let line = tokio::task::block_in_place(|| editor.readline("natshell> "));
        let line = match line {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("(nothing to cancel — Ctrl+D to quit)");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        };
        if line.trim().is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(&line);

        // Fetch the live token before dispatching, then race the turn
        // against Ctrl+C. On interrupt the token is cancelled and the SAME
        // turn future keeps being polled, so the loop unwinds through its
        // own suspension points (engine call, running tools) and records
        // the cancellation in the conversation.
        let cancel = orchestrator.agent.cancel_token();
        let outcome = {
            let turn = orchestrator.handle_input(&line, &sink);
            tokio::pin!(turn);
            let mut interrupted = false;
            loop {
                tokio::select! {
                    outcome = &mut turn => break outcome,
                    _ = tokio::signal::ctrl_c() => {
                        if interrupted {
                            println!("^C — quitting");
                            return Ok(());
                        }
                        interrupted = true;
                        println!("^C — cancelling the current request (Ctrl+C again to quit)");
                        cancel.cancel();
                    }
                }
            }
        };
        match outcome {
            Ok(Some(text)) => println!("{text}"),
            Ok(None) => {}
            Err(err) => println!("error: {err:#}"),
        }
    }
    Ok(())
}
