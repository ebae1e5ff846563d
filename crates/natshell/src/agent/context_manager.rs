//! Context-window accounting and compaction.
//!
//! Token counts are approximate (about three characters per token,
//! conservative for English); nothing else depends on exactness. When the
//! projected prompt plus the generation budget would overflow the window,
//! the oldest non-system turns are replaced by a synthetic summary
//! produced by the active engine, with an extractive fallback when the
//! engine cannot help.

use llm::{ChatMessage, CompletionRequest, FinishReason, InferenceEngine};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default headroom kept free for the response and prompt overhead.
const DEFAULT_RESERVE_TOKENS: u32 = 400;

const SUMMARIZE_PROMPT: &str = "You summarize shell-assistant conversations. Produce a compact \
factual summary of the transcript you are given: what the user asked for, what commands were \
run, key results and numbers, and any unresolved items. No preamble, at most 12 bullet lines.";

#[derive(Debug, Clone)]
pub struct CompactionStats {
    pub before_messages: usize,
    pub after_messages: usize,
    pub before_tokens: usize,
    pub after_tokens: usize,
    pub summary: String,
}

pub struct ContextManager {
    pub context_window: u32,
    pub reserve: u32,
}

impl ContextManager {
    pub fn new(context_window: u32, configured_reserve: u32) -> Self {
        Self {
            context_window,
            reserve: if configured_reserve > 0 {
                configured_reserve
            } else {
                DEFAULT_RESERVE_TOKENS
            },
        }
    }

    /// Approximate token count for a message list.
    pub fn estimate_tokens(&self, messages: &[ChatMessage]) -> usize {
        messages.iter().map(message_tokens).sum()
    }

    /// Would `messages` plus a `max_tokens` generation overflow the window?
    pub fn needs_compaction(&self, messages: &[ChatMessage], max_tokens: u32) -> bool {
        let budget = self
            .context_window
            .saturating_sub(self.reserve)
            .saturating_sub(max_tokens) as usize;
        self.estimate_tokens(messages) > budget
    }

    /// Replace old turns with a synthetic summary, keeping the system
    /// prompt and a recent tail that fits in a third of the window.
    /// Returns `None` when there is nothing to drop.
    pub async fn compact(
        &self,
        messages: &mut Vec<ChatMessage>,
        engine: &dyn InferenceEngine,
        cancel: &CancellationToken,
    ) -> Option<CompactionStats> {
        if messages.len() < 2 || !messages[0].is_system() {
            return None;
        }
        let before_tokens = self.estimate_tokens(messages);
        let before_messages = messages.len();

        let tail_budget = (self.context_window / 3) as usize;
        let mut tail_start = messages.len();
        let mut tail_tokens = 0usize;
        while tail_start > 1 {
            let candidate = message_tokens(&messages[tail_start - 1]);
            if tail_tokens + candidate > tail_budget && tail_start < messages.len() {
                break;
            }
            tail_tokens += candidate;
            tail_start -= 1;
        }
        // Never orphan a tool result from its assistant turn.
        while tail_start > 1 && matches!(messages[tail_start], ChatMessage::Tool { .. }) {
            tail_start -= 1;
        }
        if tail_start <= 1 {
            return None;
        }

        let dropped: Vec<ChatMessage> = messages[1..tail_start].to_vec();
        let summary = match self.summarize(&dropped, engine, cancel).await {
            Some(summary) => summary,
            None => extractive_summary(&dropped),
        };

        let mut compacted = Vec::with_capacity(messages.len() - dropped.len() + 1);
        compacted.push(messages[0].clone());
        compacted.push(ChatMessage::system(format!(
            "[Context note: {} earlier messages were compacted to fit the context window.\n{}\nRecent context follows.]",
            dropped.len(),
            summary
        )));
        compacted.extend_from_slice(&messages[tail_start..]);
        *messages = compacted;

        let after_tokens = self.estimate_tokens(messages);
        info!(
            "context compacted: {before_messages} -> {} messages, ~{before_tokens} -> ~{after_tokens} tokens",
            messages.len()
        );
        Some(CompactionStats {
            before_messages,
            after_messages: messages.len(),
            before_tokens,
            after_tokens,
            summary,
        })
    }

    /// One-shot summarization call against the active engine.
    async fn summarize(
        &self,
        dropped: &[ChatMessage],
        engine: &dyn InferenceEngine,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let transcript = render_transcript(dropped);
        let request_messages = vec![
            ChatMessage::system(SUMMARIZE_PROMPT),
            ChatMessage::user(transcript),
        ];
        let result = engine
            .chat_completion(CompletionRequest {
                messages: &request_messages,
                tools: None,
                temperature: 0.1,
                max_tokens: 512,
                cancel,
            })
            .await;
        match result {
            Ok(completion) if completion.finish_reason != FinishReason::Error => {
                completion.content.filter(|text| !text.trim().is_empty())
            }
            Ok(_) => None,
            Err(err) => {
                warn!("summarization call failed, using extractive summary: {err}");
                None
            }
        }
    }
}

fn message_tokens(message: &ChatMessage) -> usize {
    let mut chars = message.text().len();
    for call in message.tool_calls() {
        chars += call.name.len();
        chars += call.arguments.to_string().len();
    }
    (chars / 3).max(1)
}

/// Transcript digest handed to the summarizer; individual turns are capped
/// so one huge tool result cannot crowd out the rest.
fn render_transcript(messages: &[ChatMessage]) -> String {
    let mut lines = Vec::new();
    for message in messages {
        let (role, text) = match message {
            ChatMessage::System { content } => ("system", content.as_str()),
            ChatMessage::User { content } => ("user", content.as_str()),
            ChatMessage::Assistant { content, tool_calls } => {
                for call in tool_calls {
                    lines.push(format!("assistant called {}: {}", call.name, call.arguments));
                }
                ("assistant", content.as_deref().unwrap_or(""))
            }
            ChatMessage::Tool { content, .. } => ("tool", content.as_str()),
        };
        if !text.is_empty() {
            let capped: String = text.chars().take(300).collect();
            lines.push(format!("{role}: {capped}"));
        }
    }
    lines.join("\n")
}

/// Cheap summary used when the engine cannot summarize: user requests,
/// commands run, and exit codes.
fn extractive_summary(messages: &[ChatMessage]) -> String {
    let mut facts = Vec::new();
    for message in messages {
        match message {
            ChatMessage::User { content } => {
                let capped: String = content.chars().take(100).collect();
                if !capped.starts_with('[') {
                    facts.push(format!("User asked: {capped}"));
                }
            }
            ChatMessage::Assistant { tool_calls, .. } => {
                for call in tool_calls {
                    if call.name == "execute_shell" {
                        let command: String = call
                            .str_arg("command")
                            .unwrap_or("")
                            .chars()
                            .take(80)
                            .collect();
                        facts.push(format!("Ran: {command}"));
                    } else {
                        facts.push(format!("Called: {}", call.name));
                    }
                }
            }
            ChatMessage::Tool { content, .. } => {
                if let Some(line) = content.lines().find(|l| l.starts_with("Exit code:")) {
                    facts.push(line.to_string());
                }
            }
            ChatMessage::System { .. } => {}
        }
    }
    let mut summary: String = facts
        .iter()
        .take(15)
        .map(|f| format!("- {f}"))
        .collect::<Vec<_>>()
        .join("\n");
    if summary.len() > 500 {
        let capped: String = summary.chars().take(500).collect();
        summary = format!("{capped}...");
    }
    summary
}
