use crate::core::context::ContextUsage;
use std::sync::Mutex;

/// Progress of a run, emitted in order as the loop advances
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Section header such as "Step 2" or "Final Check"
    Phase(String),
    /// Transient status while waiting on the model
    Status(String),
    ContextUsage(ContextUsage),
    /// Streamed content delta
    Chunk(String),
    LlmOutput { text: String, streamed: bool },
    Malformed(String),
    Plan(String),
    Thought(String),
    SafetyCheck { command: String, response: String },
    Blocked { command: String, reason: String },
    Action { tool: String, input: String },
    Observation(String),
    ToolError(String),
    FinalAnswer(String),
    Verification(String),
    BetterAnswer(String),
}

pub trait AgentObserver: Send + Sync {
    fn on_event(&self, event: &AgentEvent);
}

pub struct NoopObserver;

impl AgentObserver for NoopObserver {
    fn on_event(&self, _event: &AgentEvent) {}
}

/// Keeps every event; handy for tests and transcripts
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<AgentEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl AgentObserver for RecordingObserver {
    fn on_event(&self, event: &AgentEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
