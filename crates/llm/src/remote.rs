//! Remote inference backend for OpenAI-compatible servers (Ollama, vLLM,
//! llama-server, hosted APIs).

use crate::parse::clean_content;
use crate::types::{
    fresh_call_id, ChatMessage, CompletionResult, EngineError, EngineInfo, EngineKind,
    FinishReason, ToolCall,
};
use crate::{CompletionRequest, InferenceEngine};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error-body phrases that mean the prompt exceeded the model's context
/// window, across Ollama, OpenAI, vLLM and friends.
const CONTEXT_OVERFLOW_PHRASES: &[&str] = &[
    "context length",
    "context_length",
    "maximum context",
    "token limit",
    "too many tokens",
    "prompt is too long",
    "num_ctx",
    "request too large",
];

pub struct RemoteEngine {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    context_window: u32,
    plaintext_warned: AtomicBool,
}

impl RemoteEngine {
    pub fn new(base_url: &str, model: &str, api_key: &str, n_ctx: u32) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            context_window: if n_ctx > 0 { n_ctx } else { 8192 },
            plaintext_warned: AtomicBool::new(false),
        }
    }

    /// Probe `{base}/models`; an unreachable server means the caller should
    /// degrade to the local engine before the first real request.
    pub async fn healthy(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        let mut request = self.client.get(&url).timeout(Duration::from_secs(5));
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        match request.send().await {
            Ok(response) => response.status().is_success() || response.status().as_u16() == 404,
            Err(_) => false,
        }
    }

    fn warn_plaintext_key_once(&self) {
        if self.api_key.is_empty() || !self.base_url.starts_with("http://") {
            return;
        }
        let host = self
            .base_url
            .trim_start_matches("http://")
            .split(['/', ':'])
            .next()
            .unwrap_or("");
        let loopback = matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1");
        if !loopback && !self.plaintext_warned.swap(true, Ordering::Relaxed) {
            warn!(
                "API key configured over HTTP (not HTTPS) to {} — credentials will be sent in plaintext",
                self.base_url
            );
        }
    }

    fn wire_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|message| match message {
                ChatMessage::System { content } => WireMessage {
                    role: "system",
                    content: Some(content.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                },
                ChatMessage::User { content } => WireMessage {
                    role: "user",
                    content: Some(content.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                },
                ChatMessage::Assistant { content, tool_calls } => WireMessage {
                    role: "assistant",
                    content: content.clone(),
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(
                            tool_calls
                                .iter()
                                .map(|call| WireToolCall {
                                    id: call.id.clone(),
                                    kind: "function",
                                    function: WireFunction {
                                        name: call.name.clone(),
                                        arguments: call.arguments.to_string(),
                                    },
                                })
                                .collect(),
                        )
                    },
                    tool_call_id: None,
                },
                ChatMessage::Tool { tool_call_id, content } => WireMessage {
                    role: "tool",
                    content: Some(content.clone()),
                    tool_calls: None,
                    tool_call_id: Some(tool_call_id.clone()),
                },
            })
            .collect()
    }

    async fn send_once(
        &self,
        payload: &WireRequest<'_>,
        read_timeout: Duration,
    ) -> Result<WireResponse, EngineError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(payload).timeout(read_timeout);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await.map_err(|err| self.map_transport(err))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            if matches!(status.as_u16(), 400 | 413) {
                let lower = snippet.to_lowercase();
                if CONTEXT_OVERFLOW_PHRASES.iter().any(|p| lower.contains(p)) {
                    return Err(EngineError::ContextOverflow(snippet));
                }
            }
            return Err(EngineError::Api {
                status: status.as_u16(),
                body: snippet,
            });
        }

        response
            .json::<WireResponse>()
            .await
            .map_err(|err| EngineError::Protocol(self.base_url.clone(), err.to_string()))
    }

    fn map_transport(&self, err: reqwest::Error) -> EngineError {
        if err.is_connect() {
            if err.is_timeout() {
                EngineError::ConnectTimeout(self.base_url.clone())
            } else {
                EngineError::Connect(self.base_url.clone())
            }
        } else if err.is_timeout() {
            EngineError::ReadTimeout(self.base_url.clone())
        } else if err.is_decode() || err.is_body() {
            EngineError::Protocol(self.base_url.clone(), err.to_string())
        } else {
            EngineError::Other(err.to_string())
        }
    }

    fn parse_response(&self, response: WireResponse) -> Result<CompletionResult, EngineError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| {
                EngineError::Protocol(self.base_url.clone(), "response had no choices".into())
            })?;

        let mut tool_calls = Vec::new();
        for call in choice.message.tool_calls.unwrap_or_default() {
            let arguments = serde_json::from_str(&call.function.arguments)
                .unwrap_or(serde_json::Value::Object(Default::default()));
            tool_calls.push(ToolCall {
                id: if call.id.is_empty() { fresh_call_id() } else { call.id },
                name: call.function.name,
                arguments,
            });
        }

        let content = choice
            .message
            .content
            .as_deref()
            .and_then(clean_content);

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("tool_calls") => FinishReason::ToolCalls,
            Some("length") => FinishReason::Length,
            _ if !tool_calls.is_empty() => FinishReason::ToolCalls,
            _ => FinishReason::Stop,
        };

        let usage = response.usage.unwrap_or_default();
        Ok(CompletionResult {
            content,
            tool_calls,
            finish_reason,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }
}

#[async_trait]
impl InferenceEngine for RemoteEngine {
    async fn chat_completion(
        &self,
        request: CompletionRequest<'_>,
    ) -> Result<CompletionResult, EngineError> {
        self.warn_plaintext_key_once();

        let messages = Self::wire_messages(request.messages);
        let payload = WireRequest {
            model: &self.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
            tools: request.tools.map(|tools| {
                tools
                    .iter()
                    .map(|tool| {
                        serde_json::json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.parameters,
                            }
                        })
                    })
                    .collect()
            }),
            tool_choice: request.tools.map(|_| "auto"),
        };

        // Generous read timeout scaled to the generation size: assume at
        // least 10 tok/s plus fixed overhead.
        let read_timeout =
            Duration::from_secs_f64((request.max_tokens as f64 / 10.0 + 60.0).max(300.0));

        let mut last_error = EngineError::Other("request was never attempted".into());
        for attempt in 0..=MAX_RETRIES {
            if request.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let outcome = tokio::select! {
                outcome = self.send_once(&payload, read_timeout) => outcome,
                _ = request.cancel.cancelled() => return Err(EngineError::Cancelled),
            };
            match outcome {
                Ok(response) => return self.parse_response(response),
                Err(err) => {
                    let retryable = err.is_transport()
                        || matches!(&err, EngineError::Api { status, .. } if matches!(*status, 502 | 503 | 504));
                    if !retryable || attempt == MAX_RETRIES {
                        return Err(err);
                    }
                    let delay = RETRY_BACKOFF * 2u32.pow(attempt);
                    warn!(
                        "remote request failed (attempt {}/{}): {} — retrying in {:?}",
                        attempt + 1,
                        MAX_RETRIES + 1,
                        err,
                        delay
                    );
                    last_error = err;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = request.cancel.cancelled() => return Err(EngineError::Cancelled),
                    }
                }
            }
        }
        debug!("retries exhausted");
        Err(last_error)
    }

    fn info(&self) -> EngineInfo {
        EngineInfo {
            kind: EngineKind::Remote,
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            context_window: self.context_window,
            n_gpu_layers: 0,
            supports_tool_calls: true,
        }
    }
}

// ── wire format ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireResponseToolCall>>,
}

#[derive(Deserialize)]
struct WireResponseToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> RemoteEngine {
        RemoteEngine::new("http://localhost:11434/v1", "qwen3:4b", "", 8192)
    }

    #[test]
    fn wire_messages_follow_the_openai_shape() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::assistant_calls(
                Some("running".into()),
                vec![ToolCall {
                    id: "call_9".into(),
                    name: "execute_shell".into(),
                    arguments: json!({"command": "ls"}),
                }],
            ),
            ChatMessage::tool_result("call_9", "ok"),
        ];
        let wire = RemoteEngine::wire_messages(&messages);
        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value[0]["role"], "system");
        assert_eq!(value[1]["tool_calls"][0]["type"], "function");
        assert_eq!(
            value[1]["tool_calls"][0]["function"]["arguments"],
            "{\"command\":\"ls\"}"
        );
        assert_eq!(value[2]["role"], "tool");
        assert_eq!(value[2]["tool_call_id"], "call_9");
    }

    #[test]
    fn parses_tool_call_response() {
        let response: WireResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "abc",
                        "type": "function",
                        "function": {"name": "read_file", "arguments": "{\"path\": \"/tmp/x\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 20, "completion_tokens": 9}
        }))
        .unwrap();
        let result = engine().parse_response(response).unwrap();
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].arguments["path"], "/tmp/x");
        assert_eq!(result.finish_reason, FinishReason::ToolCalls);
        assert_eq!(result.prompt_tokens, 20);
    }

    #[test]
    fn strips_think_from_remote_content() {
        let response: WireResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {"content": "<think>internal</think>The disk is fine."},
                "finish_reason": "stop"
            }]
        }))
        .unwrap();
        let result = engine().parse_response(response).unwrap();
        assert_eq!(result.content.as_deref(), Some("The disk is fine."));
    }

    #[test]
    fn empty_choices_is_a_protocol_error() {
        let response: WireResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            engine().parse_response(response),
            Err(EngineError::Protocol(_, _))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_maps_to_transport_error() {
        // Port 9 (discard) is a safe never-listening target.
        let engine = RemoteEngine::new("http://127.0.0.1:9/v1", "m", "", 0);
        let messages = [ChatMessage::user("hi")];
        let cancel = tokio_util::sync::CancellationToken::new();
        let err = engine
            .chat_completion(CompletionRequest {
                messages: &messages,
                tools: None,
                temperature: 0.0,
                max_tokens: 16,
                cancel: &cancel,
            })
            .await
            .unwrap_err();
        assert!(err.is_transport(), "expected transport error, got {err:?}");
        assert!(!engine.healthy().await);
    }
}
