use crate::agent::{AgentEvent, AgentObserver};
use crate::utils;
use colored::Color;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

const SKY_BLUE: Color = Color::TrueColor {
    r: 135,
    g: 215,
    b: 255,
};
const DARK_ORANGE: Color = Color::TrueColor {
    r: 255,
    g: 135,
    b: 0,
};

/// Renders agent events as rules and panels on stdout
#[derive(Default)]
pub struct ConsoleObserver {
    mid_stream: AtomicBool,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn end_stream(&self) {
        if self.mid_stream.swap(false, Ordering::Relaxed) {
            println!();
        }
    }
}

impl AgentObserver for ConsoleObserver {
    fn on_event(&self, event: &AgentEvent) {
        if !matches!(event, AgentEvent::Chunk(_)) {
            self.end_stream();
        }

        match event {
            AgentEvent::Phase(title) => utils::print_rule(title, Color::Blue),
            AgentEvent::Status(text) => utils::print_status(text),
            AgentEvent::ContextUsage(usage) => utils::print_context_usage(usage),
            AgentEvent::Chunk(chunk) => {
                self.mid_stream.store(true, Ordering::Relaxed);
                print!("{}", chunk);
                let _ = std::io::stdout().flush();
            }
            AgentEvent::LlmOutput { text, streamed } => {
                if !streamed {
                    utils::print_panel("LLM Output", text, Color::Green);
                }
            }
            AgentEvent::Malformed(text) => {
                utils::print_panel("Malformed LLM Output (Retrying)", text, Color::Red)
            }
            AgentEvent::Plan(plan) => utils::print_panel("Plan", plan, Color::Cyan),
            AgentEvent::Thought(thought) => utils::print_panel("Thought", thought, Color::Yellow),
            AgentEvent::SafetyCheck { response, .. } => {
                utils::print_panel("Safety Check Response", response, Color::Yellow)
            }
            AgentEvent::Blocked { command, reason } => utils::print_panel(
                "Safety Alert",
                &format!("Blocked '{}': {}", command, reason),
                Color::BrightRed,
            ),
            AgentEvent::Action { tool, input } => utils::print_panel(
                &format!("Action: {}", tool),
                &utils::numbered(input),
                DARK_ORANGE,
            ),
            AgentEvent::Observation(text) => utils::print_panel("Observation", text, Color::Green),
            AgentEvent::ToolError(text) => utils::print_panel("Error", text, Color::BrightRed),
            AgentEvent::FinalAnswer(text) => utils::print_panel("Final Answer", text, SKY_BLUE),
            AgentEvent::Verification(text) => {
                utils::print_panel("Verification Result", text, Color::Magenta)
            }
            AgentEvent::BetterAnswer(text) => {
                utils::print_panel("Better Answer", text, Color::BrightGreen)
            }
        }
    }
}
