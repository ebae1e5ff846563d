//! Extraction of tool calls and reasoning markers from free-form model
//! output.
//!
//! Smaller instruction-tuned models emit tool invocations as
//! `<tool_call>{json}</tool_call>` markers inside the text stream rather
//! than using the structured API field, and wrap internal reasoning in
//! `<think>…</think>`. Both conventions are handled here so the backends
//! stay thin.

use crate::types::{ToolCall, fresh_call_id};
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

fn tool_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<tool_call>\s*(\{.*?\})\s*</tool_call>").unwrap())
}

fn think_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").unwrap())
}

fn think_unclosed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // A <think> that never closes: the response was truncated mid-thought.
    RE.get_or_init(|| Regex::new(r"(?s)<think>(?:[^<]|<[^/]|</[^t])*$").unwrap())
}

/// Strip `<think>…</think>` blocks, including an unterminated trailing one.
pub fn strip_think(text: &str) -> String {
    let text = think_re().replace_all(text, "");
    think_unclosed_re().replace_all(&text, "").into_owned()
}

/// Pull `<tool_call>` blocks out of model text. Each body is parsed as
/// `{"name": …, "arguments": …}`; arguments given as a JSON string are
/// parsed a second time. Malformed blocks are skipped with a warning so
/// one bad call does not poison the batch.
pub fn extract_tool_calls(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    for capture in tool_call_re().captures_iter(text) {
        let body = &capture[1];
        let parsed: serde_json::Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(err) => {
                warn!("unparseable <tool_call> body ({err}): {body}");
                continue;
            }
        };
        let name = match parsed.get("name").and_then(|n| n.as_str()) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                warn!("<tool_call> without a name: {body}");
                continue;
            }
        };
        let arguments = match parsed.get("arguments") {
            Some(serde_json::Value::String(raw)) => {
                serde_json::from_str(raw).unwrap_or(serde_json::Value::Object(Default::default()))
            }
            Some(value) => value.clone(),
            None => serde_json::Value::Object(Default::default()),
        };
        calls.push(ToolCall {
            id: fresh_call_id(),
            name,
            arguments,
        });
    }
    calls
}

/// Remove the tool-call markers themselves, leaving only prose.
pub fn strip_tool_calls(text: &str) -> String {
    tool_call_re().replace_all(text, "").into_owned()
}

/// Clean model text for display: drop reasoning and tool markers, trim,
/// and collapse to `None` when nothing remains.
pub fn clean_content(text: &str) -> Option<String> {
    let cleaned = strip_tool_calls(&strip_think(text));
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Derive a context window from a model file name when none is configured.
/// Parameter counts of 4B and below get 4096; anything larger gets 8192.
/// An explicit override wins and everything is clamped to 262144.
pub fn context_window_for_model(model_name: &str, configured: u32) -> u32 {
    const MAX_CONTEXT: u32 = 262_144;
    if configured > 0 {
        return configured.min(MAX_CONTEXT);
    }
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)[bB]").unwrap());
    let params: f64 = re
        .captures(model_name)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0.0);
    if params > 0.0 && params <= 4.0 {
        4096
    } else {
        8192
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_think_blocks() {
        assert_eq!(strip_think("<think>hmm</think>answer"), "answer");
        assert_eq!(strip_think("<think></think>answer"), "answer");
        assert_eq!(
            strip_think("<think>line one\nline two</think>\nanswer"),
            "\nanswer"
        );
    }

    #[test]
    fn strips_unterminated_think() {
        assert_eq!(strip_think("prefix<think>ran out of tok"), "prefix");
    }

    #[test]
    fn extracts_a_single_tool_call() {
        let text = r#"<tool_call>{"name": "execute_shell", "arguments": {"command": "df -h"}}</tool_call>"#;
        let calls = extract_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "execute_shell");
        assert_eq!(calls[0].arguments["command"], "df -h");
        assert!(!calls[0].id.is_empty());
    }

    #[test]
    fn extracts_multiple_calls_with_fresh_ids() {
        let text = concat!(
            r#"<tool_call>{"name": "read_file", "arguments": {"path": "/etc/hostname"}}</tool_call>"#,
            "\n",
            r#"<tool_call>{"name": "list_directory", "arguments": {}}</tool_call>"#,
        );
        let calls = extract_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[test]
    fn string_encoded_arguments_are_reparsed() {
        let text = r#"<tool_call>{"name": "x", "arguments": "{\"a\": 1}"}</tool_call>"#;
        let calls = extract_tool_calls(text);
        assert_eq!(calls[0].arguments, json!({"a": 1}));
    }

    #[test]
    fn malformed_blocks_are_skipped() {
        let text = r#"<tool_call>not json</tool_call><tool_call>{"name": "ok", "arguments": {}}</tool_call>"#;
        let calls = extract_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "ok");
    }

    #[test]
    fn clean_content_removes_all_markers() {
        let text = "<think>planning</think>I'll check the disk.\n<tool_call>{\"name\": \"x\", \"arguments\": {}}</tool_call>";
        assert_eq!(clean_content(text).unwrap(), "I'll check the disk.");
        assert_eq!(clean_content("<think>only thoughts</think>"), None);
    }

    #[test]
    fn context_window_detection() {
        assert_eq!(context_window_for_model("Qwen3-4B-Q4_K_M.gguf", 0), 4096);
        assert_eq!(context_window_for_model("Qwen3-8B-Q4_K_M.gguf", 0), 8192);
        assert_eq!(context_window_for_model("llama-3.2-1b.gguf", 0), 4096);
        assert_eq!(context_window_for_model("mystery-model.gguf", 0), 8192);
        // Explicit configuration wins, huge values clamp.
        assert_eq!(context_window_for_model("Qwen3-4B.gguf", 32768), 32768);
        assert_eq!(context_window_for_model("x", 999_999_999), 262_144);
    }
}
