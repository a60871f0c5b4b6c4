//! ReAct (Reason + Act) agent
//!
//! Two loops share the same tool dispatch and safeguard:
//! - text mode: the model answers with `|Thought:|`, `|Action:|` or
//!   `|Final Answer:|` sections, observations come back as user turns
//! - native mode: a planning call, then native tool calling until the model
//!   stops asking for tools, then the answer (synthesised if it came back empty)

mod native;
pub mod observer;
pub mod parser;
pub mod prompts;
mod react;
pub mod safeguard;

pub use observer::{AgentEvent, AgentObserver, NoopObserver, RecordingObserver};

use crate::config::{AgentConfig, AgentMode};
use crate::core::context::{self, ContextUsage};
use crate::core::eog::strip_markers;
use crate::core::llm::{ChatBackend, ChatMessage, ChatRequest};
use crate::tools::registry::ToolRegistry;
use crate::tools::shell::SHELL_TOOL_NAME;
use crate::tools::Tool;
use anyhow::{Context, Result};
use safeguard::{CommandGuard, Verdict};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const MAX_STEPS_MESSAGE: &str = "Max steps reached without final answer.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The model gave a final answer
    Answered,
    /// The verification pass replaced the final answer
    Improved,
    MaxStepsReached,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStep {
    pub step: usize,
    pub thought: String,
    pub action: Option<String>,
    pub observation: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentOutcome {
    pub answer: String,
    pub status: OutcomeStatus,
    pub steps: Vec<AgentStep>,
    /// Utilisation of the transcript as it stood when the run ended
    pub context: Option<ContextUsage>,
}

impl AgentOutcome {
    fn max_steps(steps: Vec<AgentStep>) -> Self {
        Self {
            answer: MAX_STEPS_MESSAGE.to_string(),
            status: OutcomeStatus::MaxStepsReached,
            steps,
            context: None,
        }
    }
}

pub struct Agent {
    backend: Arc<dyn ChatBackend>,
    tools: ToolRegistry,
    config: AgentConfig,
    guard: CommandGuard,
    observer: Arc<dyn AgentObserver>,
}

impl Agent {
    pub fn new(backend: Arc<dyn ChatBackend>, tools: ToolRegistry, config: AgentConfig) -> Self {
        let guard = CommandGuard::new(config.safeguard);
        Self {
            backend,
            tools,
            config,
            guard,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn AgentObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub async fn run(&self, query: &str) -> Result<AgentOutcome> {
        tracing::info!(
            "Agent run ({:?} mode, max {} steps): {}",
            self.config.mode,
            self.config.max_steps,
            query
        );
        let outcome = match self.config.mode {
            AgentMode::Text => self.run_text(query).await?,
            AgentMode::Native => self.run_native(query).await?,
        };
        tracing::info!(
            "Agent finished with {:?} after {} steps",
            outcome.status,
            outcome.steps.len()
        );
        Ok(outcome)
    }

    fn emit(&self, event: AgentEvent) {
        self.observer.on_event(&event);
    }

    /// Context window, looked up once per run when utilisation display is on
    async fn context_window(&self) -> Option<usize> {
        if !self.config.show_context {
            return None;
        }
        match self.backend.context_window().await {
            Ok(window) => window,
            Err(e) => {
                tracing::warn!("Could not get context window size: {}", e);
                None
            }
        }
    }

    fn report_context(&self, history: &[ChatMessage], window: Option<usize>) {
        if let Some(usage) = window.and_then(|w| context::usage(history, w)) {
            self.emit(AgentEvent::ContextUsage(usage));
        }
    }

    fn finish(
        &self,
        mut outcome: AgentOutcome,
        history: &[ChatMessage],
        window: Option<usize>,
    ) -> AgentOutcome {
        outcome.context = window.and_then(|w| context::usage(history, w));
        outcome
    }

    /// One model turn without tools, streamed when configured
    async fn generate(&self, history: &[ChatMessage]) -> Result<String> {
        let text = if self.config.stream {
            let (tx, mut rx) = mpsc::channel::<String>(64);
            let producer = self.backend.stream_chat(history.to_vec(), tx);
            let consumer = async {
                let mut text = String::new();
                while let Some(chunk) = rx.recv().await {
                    self.emit(AgentEvent::Chunk(chunk.clone()));
                    text.push_str(&chunk);
                }
                text
            };
            let (finish, text) = tokio::join!(producer, consumer);
            let finish = finish.context("Streaming chat request failed")?;
            tracing::debug!("Stream finished with reason {}", finish);
            text
        } else {
            let completion = self
                .backend
                .chat(ChatRequest::new(history.to_vec()))
                .await
                .context("Chat request failed")?;
            tracing::debug!("Completion finished with reason {}", completion.finish_reason);
            completion.message.content
        };
        Ok(strip_markers(&text))
    }

    /// Run a known tool, guarding shell commands; the returned text is the observation
    async fn invoke_tool(&self, name: &str, tool: Arc<dyn Tool>, args: Value) -> Result<String> {
        let input = if name == SHELL_TOOL_NAME {
            let command = args["command"].as_str().unwrap_or_default().to_string();
            if let Some(observation) = self.guard_command(&command).await? {
                return Ok(observation);
            }
            command
        } else {
            args.to_string()
        };

        self.emit(AgentEvent::Action {
            tool: name.to_string(),
            input,
        });

        let observation = match tool.execute(args).await {
            Ok(result) => result.observation(),
            Err(e) => {
                tracing::error!("Tool '{}' raised: {}", name, e);
                let message = format!("Exception: {}", e);
                self.emit(AgentEvent::ToolError(message.clone()));
                return Ok(message);
            }
        };
        self.emit(AgentEvent::Observation(observation.clone()));
        Ok(observation)
    }

    /// `Some(observation)` when the command is refused
    async fn guard_command(&self, command: &str) -> Result<Option<String>> {
        let verdict = self.guard.check(self.backend.as_ref(), command).await?;

        let reason = match verdict {
            Verdict::Allowed { model_response } => {
                if let Some(response) = model_response {
                    self.emit(AgentEvent::SafetyCheck {
                        command: command.to_string(),
                        response,
                    });
                }
                return Ok(None);
            }
            Verdict::BlockedByPattern(label) => format!("matches unsafe pattern: {}", label),
            Verdict::BlockedByModel(response) => {
                self.emit(AgentEvent::SafetyCheck {
                    command: command.to_string(),
                    response,
                });
                "model judged it potentially irreversible".to_string()
            }
        };

        self.emit(AgentEvent::Blocked {
            command: command.to_string(),
            reason,
        });
        Ok(Some(safeguard::blocked_observation(command)))
    }

    fn unknown_tool(&self, name: &str) -> String {
        let observation = format!("Error: Unknown tool: {}", name);
        tracing::warn!("{}", observation);
        self.emit(AgentEvent::ToolError(observation.clone()));
        observation
    }
}
