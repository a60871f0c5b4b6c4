//! Shell command safeguard
//!
//! A fixed list of destructive patterns is refused outright. In `model` mode the
//! model is then asked whether the command could irreversibly damage the system,
//! and only an explicit `NOT POSSIBLE` lets it through.

use super::prompts;
use crate::config::SafeguardMode;
use crate::core::llm::{ChatBackend, ChatMessage, ChatRequest};
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static UNSAFE_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        (
            "recursive delete of a root, home or wildcard path",
            r#"(?i)\brm\s+-\S*r\S*\s+(?:\S+\s+)*["']?(?:/\*?|(?:~|\$HOME|\$\{HOME\})/?(?:\.?\*)?|\*)["']?(?:\s|;|&|$)"#,
        ),
        ("filesystem creation", r"(?i)\bmkfs(?:\.\w+)?\b"),
        ("raw write to a device with dd", r"(?i)\bdd\b.*\bof=/dev/"),
        ("redirect onto a disk device", r"(?i)>\s*/dev/(?:sd|hd|nvme|disk)"),
        ("fork bomb", r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
        ("power state change", r"(?i)\b(?:shutdown|reboot|poweroff|halt)\b"),
        (
            "world-writable root",
            r"(?i)\bchmod\s+-R\s+0?777\s+/(?:\s|;|$)",
        ),
        ("recursive chown of root", r"(?i)\bchown\s+-R\s+\S+\s+/(?:\s|;|$)"),
        (
            "piping a download into a shell",
            r"(?i)\b(?:curl|wget)\b[^|]*\|\s*(?:sudo\s+)?(?:ba|z)?sh\b",
        ),
        ("privilege escalation", r"(?i)\bsudo\b"),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).expect("valid unsafe pattern")))
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed { model_response: Option<String> },
    BlockedByPattern(&'static str),
    BlockedByModel(String),
}

/// Label of the first unsafe pattern the command matches
pub fn matched_pattern(command: &str) -> Option<&'static str> {
    UNSAFE_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(command))
        .map(|(label, _)| *label)
}

pub fn model_says_safe(response: &str) -> bool {
    response.trim().to_uppercase().starts_with("NOT POSSIBLE")
}

pub fn blocked_observation(command: &str) -> String {
    format!(
        "Error: Command '{}' was blocked by the safety guard as potentially harmful. The command was not executed.",
        command
    )
}

pub struct CommandGuard {
    mode: SafeguardMode,
}

impl CommandGuard {
    pub fn new(mode: SafeguardMode) -> Self {
        Self { mode }
    }

    pub async fn check(&self, backend: &dyn ChatBackend, command: &str) -> Result<Verdict> {
        if self.mode == SafeguardMode::Off {
            return Ok(Verdict::Allowed {
                model_response: None,
            });
        }

        if let Some(label) = matched_pattern(command) {
            tracing::warn!("Command '{}' matches unsafe pattern: {}", command, label);
            return Ok(Verdict::BlockedByPattern(label));
        }

        if self.mode == SafeguardMode::Patterns {
            return Ok(Verdict::Allowed {
                model_response: None,
            });
        }

        let request = ChatRequest::new(vec![ChatMessage::user(prompts::safety_prompt(command))]);
        let response = backend
            .chat(request)
            .await
            .context("Safety check request failed")?
            .message
            .content;
        tracing::debug!("Safety check for '{}': {}", command, response.trim());

        if model_says_safe(&response) {
            Ok(Verdict::Allowed {
                model_response: Some(response),
            })
        } else {
            Ok(Verdict::BlockedByModel(response))
        }
    }
}
