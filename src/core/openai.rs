//! OpenAI-compatible client (llama-cpp-python server, llama-server, vLLM)
//!
//! Templated completions go through llama-server's `/apply-template` first;
//! servers without it reject them.

use super::llm::{
    check_status, http_client, send_with_retry, ChatBackend, ChatCompletion, ChatMessage,
    ChatRequest, FinishReason, LineBuffer, LlmError, Role, TextCompletion, TextPrompt,
    TextRequest, TokenLogprob, ToolCall,
};
use crate::config::LlmConfig;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Serialize)]
struct WireMessage {
    role: Role,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunction,
}

fn function_type() -> String {
    "function".to_string()
}

/// Arguments travel as a JSON-encoded string on this dialect
#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            tool_calls: message
                .tool_calls
                .iter()
                .enumerate()
                .map(|(i, call)| WireToolCall {
                    id: Some(call.id.clone().unwrap_or_else(|| format!("call_{}", i))),
                    kind: function_type(),
                    function: WireFunction {
                        name: call.function.name.clone(),
                        arguments: call.function.arguments.to_string(),
                    },
                })
                .collect(),
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

impl WireToolCall {
    fn into_tool_call(self) -> ToolCall {
        let arguments = if self.function.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&self.function.arguments).unwrap_or_else(|e| {
                tracing::warn!(
                    "[OpenAI] Tool arguments for '{}' are not JSON ({}), passing raw string",
                    self.function.name,
                    e
                );
                Value::String(self.function.arguments.clone())
            })
        };
        ToolCall {
            id: self.id,
            ..ToolCall::new(self.function.name, arguments)
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "<[Value]>::is_empty")]
    tools: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    logprobs: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    logprobs: Option<Logprobs>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct Logprobs {
    #[serde(default)]
    content: Vec<LogprobEntry>,
}

#[derive(Debug, Deserialize)]
struct LogprobEntry {
    token: String,
    logprob: f64,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    stop: &'a [String],
    echo: bool,
}

#[derive(Debug, Serialize)]
struct ApplyTemplateBody<'a> {
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "<[Value]>::is_empty")]
    tools: &'a [Value],
}

#[derive(Debug, Deserialize)]
struct ApplyTemplateResponse {
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: String,
    #[serde(default)]
    finish_reason: Option<String>,
}

pub struct OpenAiClient {
    client: Client,
    config: LlmConfig,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        Ok(Self {
            client: http_client(&config)?,
            config,
        })
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let builder = self.client.post(url);
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn chat_body<'a>(&'a self, messages: &[ChatMessage], tools: &'a [Value], stream: bool) -> ChatBody<'a> {
        ChatBody {
            model: &self.config.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream,
            tools,
            tool_choice: (!tools.is_empty()).then_some("auto"),
            logprobs: false,
        }
    }
}

fn reason(raw: Option<&str>) -> FinishReason {
    raw.map(FinishReason::parse).unwrap_or(FinishReason::Stop)
}

#[async_trait]
impl ChatBackend for OpenAiClient {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatCompletion, LlmError> {
        let mut body = self.chat_body(&request.messages, &request.tools, false);
        body.logprobs = request.logprobs;

        let response: ChatResponse =
            send_with_retry(&self.config, "OpenAI", || self.post("/v1/chat/completions").json(&body))
                .await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(WireToolCall::into_tool_call)
            .collect();

        Ok(ChatCompletion {
            message: ChatMessage::assistant(choice.message.content.unwrap_or_default())
                .with_tool_calls(tool_calls),
            finish_reason: reason(choice.finish_reason.as_deref()),
            logprobs: choice
                .logprobs
                .map(|l| l.content)
                .unwrap_or_default()
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
        let body = self.chat_body(&messages, &[], true);
        let response = self.post("/v1/chat/completions").json(&body).send().await?;
        let mut stream = check_status(response).await?.bytes_stream();
        let mut buffer = LineBuffer::default();
        let mut finish = None;

        'outer: while let Some(chunk) = stream.next().await {
            for line in buffer.push(&chunk?) {
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    break 'outer;
                }
                match serde_json::from_str::<StreamChunk>(data) {
                    Ok(chunk) => {
                        if let Some(choice) = chunk.choices.into_iter().next() {
                            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                                if tx.send(content).await.is_err() {
                                    tracing::debug!("[OpenAI] Stream receiver dropped");
                                }
                            }
                            if let Some(raw) = choice.finish_reason {
                                finish = Some(FinishReason::parse(&raw));
                            }
                        }
                    }
                    Err(e) => tracing::warn!("[OpenAI] Skipping undecodable SSE event: {}", e),
                }
            }
        }

        Ok(finish.unwrap_or(FinishReason::Stop))
    }

    async fn complete(&self, request: TextRequest) -> Result<TextCompletion, LlmError> {
        let prompt = match &request.prompt {
            TextPrompt::Raw(text) => text.clone(),
            TextPrompt::Templated { messages, tools } => {
                let body = ApplyTemplateBody {
                    messages: messages.iter().map(WireMessage::from).collect(),
                    tools,
                };
                let rendered: ApplyTemplateResponse =
                    send_with_retry(&self.config, "OpenAI", || self.post("/apply-template").json(&body))
                        .await?;
                tracing::debug!("[OpenAI] Templated prompt: {:?}", rendered.prompt);
                rendered.prompt
            }
        };
        let body = CompletionBody {
            model: &self.config.model,
            prompt: &prompt,
            max_tokens: request.max_tokens,
            temperature: self.config.temperature,
            stop: &request.stop,
            echo: false,
        };
        let response: CompletionResponse =
            send_with_retry(&self.config, "OpenAI", || self.post("/v1/completions").json(&body))
                .await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)?;

        Ok(TextCompletion {
            text: choice.text,
            finish_reason: reason(choice.finish_reason.as_deref()),
        })
    }
}
