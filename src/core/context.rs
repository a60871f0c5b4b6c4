use super::llm::ChatMessage;
use serde::Serialize;

/// Rough characters-per-token ratio for English text
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContextUsage {
    pub estimated_tokens: usize,
    pub window: usize,
    pub percentage: f64,
}

pub fn estimate_tokens(history: &[ChatMessage]) -> usize {
    history.iter().map(|m| m.content.chars().count()).sum::<usize>() / CHARS_PER_TOKEN
}

pub fn usage(history: &[ChatMessage], window: usize) -> Option<ContextUsage> {
    if window == 0 {
        return None;
    }
    let estimated_tokens = estimate_tokens(history);
    Some(ContextUsage {
        estimated_tokens,
        window,
        percentage: estimated_tokens as f64 / window as f64 * 100.0,
    })
}
