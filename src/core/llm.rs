use crate::config::{BackendKind, LlmConfig};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Response decode error: {0}")]
    Decode(String),

    #[error("Backend returned no choices")]
    EmptyResponse,
}

impl LlmError {
    /// Client errors will fail the same way on every attempt
    fn is_retryable(&self) -> bool {
        match self {
            LlmError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(name)
    }
}

/// One role-tagged turn of the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// On tool turns, the id of the call this result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_tool_call_id(mut self, id: Option<String>) -> Self {
        self.tool_call_id = id;
        self
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: None,
            function: FunctionCall {
                name: name.into(),
                arguments,
            },
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Why generation stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    Other(String),
}

impl FinishReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_calls" => FinishReason::ToolCalls,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::Stop => f.write_str("stop"),
            FinishReason::Length => f.write_str("length"),
            FinishReason::ToolCalls => f.write_str("tool_calls"),
            FinishReason::Other(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenLogprob {
    pub token: String,
    pub logprob: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Function tool schemas; empty means no tools offered
    pub tools: Vec<Value>,
    pub logprobs: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_logprobs(mut self) -> Self {
        self.logprobs = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
    pub logprobs: Vec<TokenLogprob>,
}

/// What a text completion continues from
#[derive(Debug, Clone)]
pub enum TextPrompt {
    /// Sent verbatim, no chat template
    Raw(String),
    /// Rendered by the server through the model's chat template, ending on an open assistant turn
    Templated {
        messages: Vec<ChatMessage>,
        tools: Vec<Value>,
    },
}

/// Plain completion that stops on caller-supplied sequences
#[derive(Debug, Clone)]
pub struct TextRequest {
    pub prompt: TextPrompt,
    pub stop: Vec<String>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct TextCompletion {
    pub text: String,
    pub finish_reason: FinishReason,
}

/// Chat-completion backend seam shared by the agent loops and the probe
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn model(&self) -> &str;

    async fn chat(&self, request: ChatRequest) -> Result<ChatCompletion, LlmError>;

    /// Stream content deltas into `tx`; returns the finish reason once the stream ends
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        tx: mpsc::Sender<String>,
    ) -> Result<FinishReason, LlmError>;

    async fn complete(&self, request: TextRequest) -> Result<TextCompletion, LlmError>;

    /// Model context length in tokens, when the server exposes it
    async fn context_window(&self) -> Result<Option<usize>, LlmError> {
        Ok(None)
    }
}

pub fn build_backend(config: &LlmConfig) -> Result<Arc<dyn ChatBackend>, LlmError> {
    let backend: Arc<dyn ChatBackend> = match config.backend {
        BackendKind::Ollama => Arc::new(super::ollama::OllamaClient::new(config.clone())?),
        BackendKind::Openai => Arc::new(super::openai::OpenAiClient::new(config.clone())?),
    };
    tracing::info!(
        "Using {:?} backend at {} with model {}",
        config.backend,
        config.base_url,
        config.model
    );
    Ok(backend)
}

pub(crate) fn http_client(config: &LlmConfig) -> Result<Client, LlmError> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?)
}

/// POST a JSON body and decode the reply, retrying with exponential backoff
pub(crate) async fn send_with_retry<T, F>(
    config: &LlmConfig,
    label: &str,
    build: F,
) -> Result<T, LlmError>
where
    T: DeserializeOwned,
    F: Fn() -> RequestBuilder,
{
    let attempts = config.max_retries.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = config.retry_base_delay_ms * 2_u64.pow(attempt - 1);
            tracing::warn!(
                "[{}] Retrying API call (attempt {}/{}) after {}ms delay",
                label,
                attempt + 1,
                attempts,
                delay
            );
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let error = match build().send().await {
            Ok(response) => match check_status(response).await {
                Ok(response) => match response.json::<T>().await {
                    Ok(decoded) => return Ok(decoded),
                    Err(e) => LlmError::Decode(e.to_string()),
                },
                Err(e) => e,
            },
            Err(e) => LlmError::Http(e),
        };

        tracing::warn!("[{}] {}", label, error);
        if !error.is_retryable() {
            return Err(error);
        }
        last_error = Some(error);
    }

    Err(last_error.unwrap_or(LlmError::EmptyResponse))
}

pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(LlmError::Api {
        status: status.as_u16(),
        body,
    })
}

/// Splits a byte stream into complete lines, holding back any trailing partial line
#[derive(Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Complete lines seen so far; bytes are only decoded once their line is whole
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    pub fn finish(self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.pending);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}
