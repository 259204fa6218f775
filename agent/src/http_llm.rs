//! Real [`LlmClient`] implementation: an OpenAI-chat-completions-shaped
//! streaming HTTP client, the production collaborator behind the "big"
//! and "flash" model kinds (§2: "an opaque capability invoked by the
//! agent" — the spec excludes hosting the model, not calling one).
//!
//! Grounded on `codex-rs/core/src/client.rs`'s `ModelClient`: a bare
//! `reqwest::Client`, SSE parsed with `eventsource-stream`, retried with
//! the same exponential-backoff-plus-jitter shape as `util::backoff`.
//! Only the four gated tool names (`execute`, `write_file`, `edit_file`,
//! `ask_user`) are offered to the model — every other action the agent
//! needs is mediated by a gated tool call, matching the whitelist
//! `tool_policy` already encodes.

use std::time::Duration;

use async_trait::async_trait;
use backend_common::AppError;
use backend_common::AppResult;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use futures::TryStreamExt;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use tokio::sync::mpsc;

use crate::llm::LlmChunk;
use crate::llm::LlmClient;
use crate::llm::LlmClientKind;
use crate::tool_policy;

const MAX_RETRIES: u32 = 3;
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Talks to an OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    big_model: String,
    flash_model: String,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, big_model: impl Into<String>, flash_model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            big_model: big_model.into(),
            flash_model: flash_model.into(),
        }
    }

    fn model_for(&self, kind: LlmClientKind) -> &str {
        match kind {
            LlmClientKind::Big => &self.big_model,
            LlmClientKind::Flash => &self.flash_model,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    tools: &'a [Value],
    stream: bool,
}

fn role_str(role: backend_checkpoint::Role) -> &'static str {
    match role {
        backend_checkpoint::Role::User => "user",
        backend_checkpoint::Role::Assistant => "assistant",
        backend_checkpoint::Role::System => "system",
    }
}

fn gated_tools() -> Vec<Value> {
    vec![
        tool_schema(
            tool_policy::TOOL_EXECUTE,
            "Runs a shell command in the thread's sandbox and returns its output.",
            json!({"command": {"type": "string"}}),
            &["command"],
        ),
        tool_schema(
            tool_policy::TOOL_WRITE_FILE,
            "Writes (overwriting) a file in the thread's sandbox.",
            json!({"path": {"type": "string"}, "content": {"type": "string"}}),
            &["path", "content"],
        ),
        tool_schema(
            tool_policy::TOOL_EDIT_FILE,
            "Replaces one occurrence of `old_text` with `new_text` in a file.",
            json!({
                "path": {"type": "string"},
                "old_text": {"type": "string"},
                "new_text": {"type": "string"},
            }),
            &["path", "old_text", "new_text"],
        ),
        tool_schema(
            tool_policy::TOOL_ASK_USER,
            "Pauses the turn to ask the human one or more questions.",
            json!({"questions": {"type": "array", "items": {"type": "string"}}}),
            &["questions"],
        ),
    ]
}

fn tool_schema(name: &str, description: &str, properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            },
        },
    })
}

#[derive(Debug, Default, Clone)]
struct ToolCallAccum {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<StreamToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn stream_turn(
        &self,
        kind: LlmClientKind,
        system_prompt: &str,
        messages: &[backend_checkpoint::ConversationMessage],
        resume_payload: Option<Value>,
        tx: mpsc::Sender<LlmChunk>,
    ) -> AppResult<()> {
        let mut chat_messages = vec![ChatMessage {
            role: "system",
            content: system_prompt,
        }];
        for message in messages {
            chat_messages.push(ChatMessage {
                role: role_str(message.role),
                content: &message.content,
            });
        }
        let resume_content;
        if let Some(payload) = &resume_payload {
            resume_content = serde_json::to_string(payload).unwrap_or_default();
            chat_messages.push(ChatMessage {
                role: "tool",
                content: &resume_content,
            });
        }

        let tools = gated_tools();
        let request = ChatRequest {
            model: self.model_for(kind),
            messages: chat_messages,
            tools: &tools,
            stream: true,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut attempt = 0u32;
        let response = loop {
            attempt += 1;
            let result = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .json(&request)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => break resp,
                Ok(resp) if attempt <= MAX_RETRIES && resp.status().is_server_error() => {
                    tokio::time::sleep(backoff(attempt)).await;
                    continue;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(AppError::Internal(anyhow::anyhow!(
                        "llm request failed: {status} {body}"
                    )));
                }
                Err(err) if attempt <= MAX_RETRIES => {
                    tokio::time::sleep(backoff(attempt)).await;
                    continue;
                }
                Err(err) => return Err(AppError::Internal(err.into())),
            }
        };

        let mut sse = response.bytes_stream().map_err(|e| anyhow::anyhow!(e)).eventsource();
        let mut calls: Vec<ToolCallAccum> = Vec::new();
        loop {
            let next = tokio::time::timeout(IDLE_TIMEOUT, sse.next()).await;
            let event = match next {
                Ok(Some(Ok(event))) => event,
                Ok(Some(Err(err))) => {
                    return Err(AppError::Internal(anyhow::anyhow!("sse error: {err}")));
                }
                Ok(None) => break,
                Err(_) => return Err(AppError::Internal(anyhow::anyhow!("llm stream idle timeout"))),
            };
            if event.data == "[DONE]" {
                break;
            }
            let chunk: StreamChunk = match serde_json::from_str(&event.data) {
                Ok(chunk) => chunk,
                Err(_) => continue,
            };
            let Some(choice) = chunk.choices.into_iter().next() else {
                continue;
            };
            if let Some(text) = choice.delta.content {
                if !text.is_empty() && tx.send(LlmChunk::Token(text)).await.is_err() {
                    return Ok(());
                }
            }
            for delta in choice.delta.tool_calls {
                if calls.len() <= delta.index {
                    calls.resize(delta.index + 1, ToolCallAccum::default());
                }
                let accum = &mut calls[delta.index];
                if let Some(id) = delta.id {
                    accum.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        accum.name = name;
                    }
                    if let Some(arguments) = function.arguments {
                        accum.arguments.push_str(&arguments);
                    }
                }
            }
            if choice.finish_reason.as_deref() == Some("tool_calls") {
                break;
            }
            if choice.finish_reason.is_some() {
                calls.clear();
                break;
            }
        }

        for call in calls {
            if call.name.is_empty() {
                continue;
            }
            let args: Value = serde_json::from_str(&call.arguments).unwrap_or(Value::Null);
            let call_id = if call.id.is_empty() {
                uuid::Uuid::new_v4().to_string()
            } else {
                call.id
            };
            if tx
                .send(LlmChunk::Interrupted {
                    call_id,
                    name: call.name,
                    args,
                })
                .await
                .is_err()
            {
                return Ok(());
            }
            // Only the first tool call in a turn is honored: the agent
            // runner drives one pause/resume at a time.
            return Ok(());
        }

        let _ = tx.send(LlmChunk::Done).await;
        Ok(())
    }

    async fn complete(&self, kind: LlmClientKind, prompt: &str) -> AppResult<String> {
        let request = ChatRequest {
            model: self.model_for(kind),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            tools: &[],
            stream: false,
        };
        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Internal(e.into()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(anyhow::anyhow!(
                "llm completion failed: {status} {body}"
            )));
        }
        let body: Value = response.json().await.map_err(|e| AppError::Internal(e.into()))?;
        Ok(body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }
}

fn backoff(attempt: u32) -> Duration {
    let base_ms = 200u64 * (1u64 << attempt.saturating_sub(1).min(8));
    Duration::from_millis(base_ms)
}
