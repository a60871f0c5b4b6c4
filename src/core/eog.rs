//! End-of-generation (EOG) tokens
//!
//! Inference servers swallow the end-of-turn marker a model emits: it shows up
//! neither in `content` nor in logprobs. The only trace left is
//! `finish_reason == "stop"`, so detection here reads that field and treats any
//! marker that does leak into text as something to report and strip.

use super::llm::{ChatCompletion, FinishReason};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TemplateFamily {
    Llama3,
    Gemma,
    Chatml,
    Mistral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EogToken {
    pub text: &'static str,
    pub id: Option<u32>,
    pub family: TemplateFamily,
}

impl std::fmt::Display for EogToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.id {
            Some(id) => write!(f, "{} (id {})", self.text, id),
            None => f.write_str(self.text),
        }
    }
}

pub const EOG_TOKENS: &[EogToken] = &[
    EogToken {
        text: "<|eot_id|>",
        id: Some(128009),
        family: TemplateFamily::Llama3,
    },
    EogToken {
        text: "<|eom_id|>",
        id: Some(128008),
        family: TemplateFamily::Llama3,
    },
    EogToken {
        text: "<|end_of_text|>",
        id: Some(128001),
        family: TemplateFamily::Llama3,
    },
    EogToken {
        text: "<end_of_turn>",
        id: Some(106),
        family: TemplateFamily::Gemma,
    },
    EogToken {
        text: "<|im_end|>",
        id: None,
        family: TemplateFamily::Chatml,
    },
    EogToken {
        text: "</s>",
        id: Some(2),
        family: TemplateFamily::Mistral,
    },
];

/// Stop strings for a raw completion in the given template family
pub fn stop_sequences(family: TemplateFamily) -> Vec<String> {
    EOG_TOKENS
        .iter()
        .filter(|t| t.family == family && t.text != "<|end_of_text|>")
        .map(|t| t.text.to_string())
        .collect()
}

pub fn find_marker(text: &str) -> Option<&'static EogToken> {
    EOG_TOKENS.iter().find(|t| text.contains(t.text))
}

/// Remove leaked markers from generated text
pub fn strip_markers(text: &str) -> String {
    let mut cleaned = text.to_string();
    for token in EOG_TOKENS {
        if cleaned.contains(token.text) {
            cleaned = cleaned.replace(token.text, "");
        }
    }
    cleaned.trim_end().to_string()
}

/// How a chat turn ended, as far as the response lets us tell
#[derive(Debug, Clone)]
pub struct TurnEnd {
    pub finish_reason: FinishReason,
    /// Generation stopped on its own rather than hitting a limit
    pub ended_on_eog: bool,
    pub marker_in_content: Option<&'static EogToken>,
    pub marker_in_logprobs: Option<&'static EogToken>,
    pub tail_tokens: Vec<String>,
}

pub fn analyze(completion: &ChatCompletion) -> TurnEnd {
    let ended_on_eog = matches!(
        completion.finish_reason,
        FinishReason::Stop | FinishReason::ToolCalls
    );
    let marker_in_logprobs = completion
        .logprobs
        .iter()
        .find_map(|lp| find_marker(&lp.token));
    let tail_start = completion.logprobs.len().saturating_sub(5);

    TurnEnd {
        finish_reason: completion.finish_reason.clone(),
        ended_on_eog,
        marker_in_content: find_marker(&completion.message.content),
        marker_in_logprobs,
        tail_tokens: completion.logprobs[tail_start..]
            .iter()
            .map(|lp| lp.token.clone())
            .collect(),
    }
}

impl TurnEnd {
    /// True when the server hid the marker and only the finish reason remains
    pub fn marker_abstracted(&self) -> bool {
        self.ended_on_eog && self.marker_in_content.is_none() && self.marker_in_logprobs.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::{ChatMessage, TokenLogprob};

    fn completion(content: &str, reason: FinishReason, tokens: &[&str]) -> ChatCompletion {
        ChatCompletion {
            message: ChatMessage::assistant(content),
            finish_reason: reason,
            logprobs: tokens
                .iter()
                .map(|t| TokenLogprob {
                    token: t.to_string(),
                    logprob: -0.1,
                })
                .collect(),
        }
    }

    #[test]
    fn test_stop_means_eog_was_generated() {
        let turn = analyze(&completion(
            "The date is Monday.",
            FinishReason::Stop,
            &["The", " date", " is", " Monday", "."],
        ));
        assert!(turn.ended_on_eog);
        assert!(turn.marker_abstracted());
        assert_eq!(turn.tail_tokens.len(), 5);
    }

    #[test]
    fn test_length_is_not_eog() {
        let turn = analyze(&completion("truncated", FinishReason::Length, &[]));
        assert!(!turn.ended_on_eog);
        assert!(!turn.marker_abstracted());
    }

    #[test]
    fn test_leaked_marker_detected() {
        let turn = analyze(&completion(
            "{\"name\": \"run_shell_command\"}<|eot_id|>",
            FinishReason::Stop,
            &["}", "<|eot_id|>"],
        ));
        assert_eq!(turn.marker_in_content.map(|t| t.text), Some("<|eot_id|>"));
        assert_eq!(turn.marker_in_logprobs.and_then(|t| t.id), Some(128009));
        assert!(!turn.marker_abstracted());
    }

    #[test]
    fn test_token_display_includes_id() {
        assert_eq!(EOG_TOKENS[0].to_string(), "<|eot_id|> (id 128009)");
        let chatml = find_marker("done<|im_end|>").unwrap();
        assert_eq!(chatml.to_string(), "<|im_end|>");
    }

    #[test]
    fn test_strip_markers() {
        assert_eq!(strip_markers("answer<|eot_id|>\n"), "answer");
        assert_eq!(strip_markers("hi<end_of_turn>"), "hi");
        assert_eq!(strip_markers("plain"), "plain");
    }

    #[test]
    fn test_stop_sequences_for_llama3() {
        assert_eq!(
            stop_sequences(TemplateFamily::Llama3),
            vec!["<|eot_id|>".to_string(), "<|eom_id|>".to_string()]
        );
        assert_eq!(stop_sequences(TemplateFamily::Chatml), vec!["<|im_end|>".to_string()]);
    }
}
