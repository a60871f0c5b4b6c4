//! Turn-end probe
//!
//! Asks a backend for a tool call twice: once through the chat endpoint with
//! logprobs, once as a plain completion of the chat-templated conversation
//! that stops on the template's EOG markers.
//! The report shows whether the marker is ever visible or only implied by
//! `finish_reason`.

use crate::core::eog::{self, EogToken, TemplateFamily, TurnEnd};
use crate::core::llm::{
    ChatBackend, ChatCompletion, ChatMessage, ChatRequest, FinishReason, TextCompletion,
    TextPrompt, TextRequest,
};
use crate::tools::registry::ToolRegistry;
use anyhow::{Context, Result};

pub const DEFAULT_PROMPT: &str = "Run the date command";
const PROBE_SYSTEM_PROMPT: &str = "You are a helpful assistant with access to tools.";
const RAW_MAX_TOKENS: u32 = 256;

pub struct ProbeReport {
    pub chat: ChatCompletion,
    pub turn_end: TurnEnd,
    /// `None` when the backend rejected raw completions
    pub raw: Option<RawProbe>,
}

pub struct RawProbe {
    pub stop: Vec<String>,
    pub completion: TextCompletion,
    pub marker_in_text: Option<&'static EogToken>,
}

impl RawProbe {
    pub fn stopped_on_marker(&self) -> bool {
        self.completion.finish_reason == FinishReason::Stop
    }
}

impl ProbeReport {
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.turn_end.marker_abstracted() {
            lines.push(format!(
                "finish_reason=\"{}\" and no EOG marker in content or logprobs: the server consumed the end-of-turn token.",
                self.turn_end.finish_reason
            ));
            lines.push("finish_reason is the only signal that it was generated.".to_string());
        } else if !self.turn_end.ended_on_eog {
            lines.push(format!(
                "Generation ended with finish_reason=\"{}\", not on an EOG token.",
                self.turn_end.finish_reason
            ));
        }
        if let Some(marker) = self.turn_end.marker_in_content {
            lines.push(format!("EOG marker {} leaked into message content.", marker));
        }
        if let Some(marker) = self.turn_end.marker_in_logprobs {
            lines.push(format!("EOG marker {} is visible in logprobs.", marker));
        }
        if let Some(raw) = &self.raw {
            match raw.marker_in_text {
                Some(marker) => lines.push(format!(
                    "Templated completion text contains {} despite the stop list.",
                    marker
                )),
                None if raw.stopped_on_marker() => lines.push(
                    "Templated completion stopped on a stop sequence; the marker itself is not returned."
                        .to_string(),
                ),
                None => {}
            }
        }
        lines
    }
}

pub async fn run_probe(
    backend: &dyn ChatBackend,
    tools: &ToolRegistry,
    prompt: &str,
    family: TemplateFamily,
) -> Result<ProbeReport> {
    let messages = vec![
        ChatMessage::system(PROBE_SYSTEM_PROMPT),
        ChatMessage::user(prompt),
    ];
    let schemas = tools.function_schemas();
    tracing::info!("Probing turn end on {} with {:?} markers", backend.model(), family);

    let chat = backend
        .chat(
            ChatRequest::new(messages.clone())
                .with_tools(schemas.clone())
                .with_logprobs(),
        )
        .await
        .context("Chat completion probe failed")?;
    let turn_end = eog::analyze(&chat);

    let stop = eog::stop_sequences(family);
    let raw = match backend
        .complete(TextRequest {
            prompt: TextPrompt::Templated {
                messages,
                tools: schemas,
            },
            stop: stop.clone(),
            max_tokens: RAW_MAX_TOKENS,
        })
        .await
    {
        Ok(completion) => Some(RawProbe {
            marker_in_text: eog::find_marker(&completion.text),
            stop,
            completion,
        }),
        Err(e) => {
            tracing::warn!("Templated completion probe unavailable: {}", e);
            None
        }
    };

    Ok(ProbeReport {
        chat,
        turn_end,
        raw,
    })
}
