//! Ollama native API client
//!
//! `/api/chat` for chat turns (NDJSON when streaming), `/api/generate` for
//! completions (`raw: true` skips the chat template) and `/api/show` for model
//! metadata.

use super::llm::{
    check_status, http_client, send_with_retry, ChatBackend, ChatCompletion, ChatMessage,
    ChatRequest, FinishReason, LineBuffer, LlmError, Role, TextCompletion, TextPrompt, TextRequest,
    TokenLogprob,
};
use crate::config::LlmConfig;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Serialize)]
struct Options {
    temperature: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "<[Value]>::is_empty")]
    tools: &'a [Value],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    logprobs: bool,
    options: Options,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    logprobs: Vec<LogprobEntry>,
}

#[derive(Debug, Deserialize)]
struct LogprobEntry {
    token: String,
    logprob: f64,
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    raw: bool,
    stream: bool,
    options: Options,
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct ShowBody<'a> {
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct ShowReply {
    #[serde(default)]
    model_info: serde_json::Map<String, Value>,
}

pub struct OllamaClient {
    client: Client,
    config: LlmConfig,
}

impl OllamaClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        Ok(Self {
            client: http_client(&config)?,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn options(&self, stop: Vec<String>, max_tokens: u32) -> Options {
        Options {
            temperature: self.config.temperature,
            num_predict: max_tokens,
            stop,
        }
    }
}

/// Ollama reports `done_reason` only on the final object; absent means a clean stop
fn finish_reason(done_reason: Option<&str>) -> FinishReason {
    done_reason.map(FinishReason::parse).unwrap_or(FinishReason::Stop)
}

#[async_trait]
impl ChatBackend for OllamaClient {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatCompletion, LlmError> {
        let url = self.url("/api/chat");
        let body = ChatBody {
            model: &self.config.model,
            messages: &request.messages,
            stream: false,
            tools: &request.tools,
            logprobs: request.logprobs,
            options: self.options(Vec::new(), self.config.max_tokens),
        };
        tracing::debug!(
            "[Ollama] chat with {} messages, {} tools",
            request.messages.len(),
            request.tools.len()
        );

        let reply: ChatReply =
            send_with_retry(&self.config, "Ollama", || self.client.post(&url).json(&body)).await?;
        let message = reply.message.ok_or(LlmError::EmptyResponse)?;

        let finish_reason = if !message.tool_calls.is_empty() {
            FinishReason::ToolCalls
        } else {
            finish_reason(reply.done_reason.as_deref())
        };

        Ok(ChatCompletion {
            message,
            finish_reason,
            logprobs: reply
                .logprobs
                .into_iter()
                .map(|e| TokenLogprob {
                    token: e.token,
                    logprob: e.logprob,
                })
                .collect(),
        })
    }

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        tx: mpsc::Sender<String>,
    ) -> Result<FinishReason, LlmError> {
        let body = ChatBody {
            model: &self.config.model,
            messages: &messages,
            stream: true,
            tools: &[],
            logprobs: false,
            options: self.options(Vec::new(), self.config.max_tokens),
        };

        let response = self.client.post(self.url("/api/chat")).json(&body).send().await?;
        let mut stream = check_status(response).await?.bytes_stream();
        let mut buffer = LineBuffer::default();
        let mut reason = None;

        'outer: while let Some(chunk) = stream.next().await {
            for line in buffer.push(&chunk?) {
                if let Some(done) = forward_line(&line, &tx).await? {
                    reason = Some(done);
                    break 'outer;
                }
            }
        }
        if reason.is_none() {
            if let Some(line) = buffer.finish() {
                reason = forward_line(&line, &tx).await?;
            }
        }

        Ok(reason.unwrap_or(FinishReason::Stop))
    }

    async fn complete(&self, request: TextRequest) -> Result<TextCompletion, LlmError> {
        let url = self.url("/api/generate");
        let (prompt, system, raw) = match &request.prompt {
            TextPrompt::Raw(text) => (text.clone(), None, true),
            TextPrompt::Templated { messages, tools } => {
                if !tools.is_empty() {
                    tracing::debug!("[Ollama] /api/generate takes no tools, templating without them");
                }
                let system = messages
                    .iter()
                    .filter(|m| m.role == Role::System)
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                let prompt = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                (prompt, (!system.is_empty()).then_some(system), false)
            }
        };
        let body = GenerateBody {
            model: &self.config.model,
            prompt: &prompt,
            system: system.as_deref(),
            raw,
            stream: false,
            options: self.options(request.stop.clone(), request.max_tokens),
        };
        let reply: GenerateReply =
            send_with_retry(&self.config, "Ollama", || self.client.post(&url).json(&body)).await?;

        Ok(TextCompletion {
            text: reply.response,
            finish_reason: finish_reason(reply.done_reason.as_deref()),
        })
    }

    async fn context_window(&self) -> Result<Option<usize>, LlmError> {
        let url = self.url("/api/show");
        let body = ShowBody {
            model: &self.config.model,
        };
        let reply: ShowReply =
            send_with_retry(&self.config, "Ollama", || self.client.post(&url).json(&body)).await?;

        let window = reply
            .model_info
            .iter()
            .find(|(key, _)| key.ends_with(".context_length"))
            .and_then(|(_, value)| value.as_u64())
            .map(|n| n as usize);
        tracing::debug!("[Ollama] context window for {}: {:?}", self.config.model, window);
        Ok(window)
    }
}

/// Forward one NDJSON object; returns the finish reason when it is the final one
async fn forward_line(
    line: &str,
    tx: &mpsc::Sender<String>,
) -> Result<Option<FinishReason>, LlmError> {
    let reply: ChatReply = match serde_json::from_str(line) {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!("[Ollama] Skipping undecodable stream line: {}", e);
            return Ok(None);
        }
    };

    if let Some(message) = reply.message {
        if !message.content.is_empty() && tx.send(message.content).await.is_err() {
            tracing::debug!("[Ollama] Stream receiver dropped");
        }
    }

    Ok(reply
        .done
        .then(|| finish_reason(reply.done_reason.as_deref())))
}
