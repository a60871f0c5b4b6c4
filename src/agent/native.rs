use super::{parser, prompts, Agent, AgentEvent, AgentOutcome, AgentStep, OutcomeStatus};
use crate::core::eog::strip_markers;
use crate::core::llm::{ChatMessage, ChatRequest, ToolCall};
use anyhow::{Context, Result};
use serde_json::Value;

const FALLBACK_ANSWER: &str = "Task completed.";

impl Agent {
    /// Plan, execute tool calls one at a time, then answer
    pub(super) async fn run_native(&self, query: &str) -> Result<AgentOutcome> {
        self.emit(AgentEvent::Phase("Step 1: Planning".to_string()));
        self.emit(AgentEvent::Status("Creating plan...".to_string()));

        let planning = vec![
            ChatMessage::system(prompts::PLANNING_PROMPT),
            ChatMessage::user(query),
        ];
        let plan = self
            .backend
            .chat(ChatRequest::new(planning))
            .await
            .context("Planning request failed")?
            .message
            .content;
        let plan = strip_markers(&plan);
        self.emit(AgentEvent::Plan(plan.clone()));

        let mut steps = vec![AgentStep {
            step: 1,
            thought: plan.clone(),
            action: None,
            observation: None,
        }];
        let mut history = prompts::acting_history(query, &plan);
        let schemas = self.tools.function_schemas();
        let window = self.context_window().await;

        for step in 2..=self.config.max_steps {
            self.emit(AgentEvent::Phase(format!("Step {}", step)));
            self.report_context(&history, window);
            self.emit(AgentEvent::Status("Thinking...".to_string()));

            let completion = self
                .backend
                .chat(ChatRequest::new(history.clone()).with_tools(schemas.clone()))
                .await
                .context("Tool-calling request failed")?;
            tracing::debug!(
                "Step {} finished with reason {}",
                step,
                completion.finish_reason
            );

            let mut message = completion.message;
            message.content = strip_markers(&message.content);
            if message.tool_calls.is_empty() {
                if let Some(call) = parser::parse_embedded_tool_call(&message.content) {
                    tracing::info!(
                        "Recovered tool call '{}' from message content",
                        call.function.name
                    );
                    message.content.clear();
                    message.tool_calls.push(call);
                }
            }

            for (i, call) in message.tool_calls.iter_mut().enumerate() {
                if call.id.is_none() {
                    call.id = Some(format!("call_{}_{}", step, i));
                }
            }
            history.push(message.clone());
            if !message.content.is_empty() {
                self.emit(AgentEvent::Thought(message.content.clone()));
            }

            if message.tool_calls.is_empty() {
                let answer = if message.content.trim().is_empty() {
                    self.synthesize(&history).await?
                } else {
                    message.content
                };
                self.emit(AgentEvent::FinalAnswer(answer.clone()));
                steps.push(AgentStep {
                    step,
                    thought: String::new(),
                    action: None,
                    observation: None,
                });
                let outcome = AgentOutcome {
                    answer,
                    status: OutcomeStatus::Answered,
                    steps,
                    context: None,
                };
                return Ok(self.finish(outcome, &history, window));
            }

            for call in message.tool_calls {
                let observation = self.dispatch_call(&call).await?;
                history.push(
                    ChatMessage::tool(observation.clone()).with_tool_call_id(call.id.clone()),
                );
                steps.push(AgentStep {
                    step,
                    thought: message.content.clone(),
                    action: Some(format!("{} {}", call.function.name, call.function.arguments)),
                    observation: Some(observation),
                });
            }
        }

        tracing::warn!("No final answer after {} steps", self.config.max_steps);
        Ok(self.finish(AgentOutcome::max_steps(steps), &history, window))
    }

    async fn dispatch_call(&self, call: &ToolCall) -> Result<String> {
        let name = call.function.name.as_str();
        let Some(tool) = self.tools.get(name) else {
            return Ok(self.unknown_tool(name));
        };

        let args = match &call.function.arguments {
            Value::Object(_) => call.function.arguments.clone(),
            Value::String(raw) => tool.args_from_text(raw),
            _ => Value::Object(Default::default()),
        };
        self.invoke_tool(name, tool, args).await
    }

    /// The model stopped calling tools but said nothing; ask for the answer explicitly
    async fn synthesize(&self, history: &[ChatMessage]) -> Result<String> {
        self.emit(AgentEvent::Status("Synthesizing answer...".to_string()));
        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(prompts::SYNTHESIS_PROMPT));

        let answer = self
            .backend
            .chat(ChatRequest::new(messages))
            .await
            .context("Synthesis request failed")?
            .message
            .content;
        let answer = strip_markers(&answer);

        Ok(if answer.trim().is_empty() {
            FALLBACK_ANSWER.to_string()
        } else {
            answer
        })
    }
}
