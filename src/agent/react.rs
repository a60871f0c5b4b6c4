use super::{parser, prompts, Agent, AgentEvent, AgentOutcome, AgentStep, OutcomeStatus};
use crate::core::llm::{ChatMessage, ChatRequest};
use anyhow::{Context, Result};

impl Agent {
    /// Text-protocol ReAct loop
    pub(super) async fn run_text(&self, query: &str) -> Result<AgentOutcome> {
        let mut history = vec![
            ChatMessage::system(prompts::react_system_prompt(&self.tools.tools_description())),
            ChatMessage::user(query),
        ];
        let mut steps = Vec::new();
        let window = self.context_window().await;

        for step in 1..=self.config.max_steps {
            self.emit(AgentEvent::Phase(format!("Step {}", step)));
            self.report_context(&history, window);
            self.emit(AgentEvent::Status("Thinking...".to_string()));

            let output = self.generate(&history).await?;

            if parser::is_malformed(&output) {
                tracing::warn!("Step {}: output has both an action and a final answer", step);
                self.emit(AgentEvent::Malformed(output));
                continue;
            }
            self.emit(AgentEvent::LlmOutput {
                text: output.clone(),
                streamed: self.config.stream,
            });

            let parsed = parser::parse_output(&output);
            if !parsed.thought.is_empty() {
                self.emit(AgentEvent::Thought(parsed.thought.clone()));
            }

            if let Some(answer) = parsed.final_answer {
                self.emit(AgentEvent::FinalAnswer(answer.clone()));
                steps.push(AgentStep {
                    step,
                    thought: parsed.thought,
                    action: None,
                    observation: None,
                });
                let outcome = self.verify(query, answer, &history, steps).await?;
                return Ok(self.finish(outcome, &history, window));
            }

            let Some(action) = parsed.action else {
                tracing::debug!("Step {}: no action or final answer", step);
                history.push(ChatMessage::assistant(output));
                steps.push(AgentStep {
                    step,
                    thought: parsed.thought,
                    action: None,
                    observation: None,
                });
                continue;
            };

            let observation = match self.tools.get(&action.tool) {
                Some(tool) => {
                    let args = tool.args_from_text(&action.argument);
                    self.invoke_tool(&action.tool, tool, args).await?
                }
                None => self.unknown_tool(&action.tool),
            };

            history.push(ChatMessage::assistant(output));
            history.push(ChatMessage::user(format!("Observation: {}", observation)));
            steps.push(AgentStep {
                step,
                thought: parsed.thought,
                action: Some(format!("{}: {}", action.tool, action.argument)),
                observation: Some(observation),
            });
        }

        tracing::warn!("No final answer after {} steps", self.config.max_steps);
        Ok(self.finish(AgentOutcome::max_steps(steps), &history, window))
    }

    /// Ask the model, in a fresh conversation, to grade the answer and offer a better one
    async fn verify(
        &self,
        query: &str,
        answer: String,
        history: &[ChatMessage],
        steps: Vec<AgentStep>,
    ) -> Result<AgentOutcome> {
        if !self.config.verify_final_answer {
            return Ok(AgentOutcome {
                answer,
                status: OutcomeStatus::Answered,
                steps,
                context: None,
            });
        }

        self.emit(AgentEvent::Phase("Final Check".to_string()));
        self.emit(AgentEvent::Status("Verifying final answer...".to_string()));

        let prompt = prompts::verification_prompt(query, &answer, history);
        let verification = self
            .backend
            .chat(ChatRequest::new(vec![ChatMessage::user(prompt)]))
            .await
            .context("Verification request failed")?
            .message
            .content;
        let verification = crate::core::eog::strip_markers(&verification);
        self.emit(AgentEvent::Verification(verification.clone()));

        match parser::better_answer(&verification) {
            Some(better) => {
                tracing::info!("Verification replaced the final answer");
                self.emit(AgentEvent::BetterAnswer(better.clone()));
                Ok(AgentOutcome {
                    answer: better,
                    status: OutcomeStatus::Improved,
                    steps,
                    context: None,
                })
            }
            None => Ok(AgentOutcome {
                answer,
                status: OutcomeStatus::Answered,
                steps,
                context: None,
            }),
        }
    }
}
