//! Integration tests for the agent loops and the turn-end probe
//!
//! These run against a scripted in-process backend, so no model server is needed

use async_trait::async_trait;
use reasonact::agent::{AgentEvent, RecordingObserver, MAX_STEPS_MESSAGE};
use reasonact::config::{AgentConfig, AgentMode, SafeguardMode, ToolsConfig};
use reasonact::core::eog::TemplateFamily;
use reasonact::core::llm::{
    ChatBackend, ChatCompletion, ChatMessage, ChatRequest, FinishReason, LlmError, Role,
    TextCompletion, TextPrompt, TextRequest, TokenLogprob, ToolCall,
};
use reasonact::{probe, Agent, OutcomeStatus, ToolRegistry};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Replays canned replies in order and records every request
#[derive(Default)]
struct ScriptedBackend {
    replies: Mutex<VecDeque<ChatCompletion>>,
    raw: Mutex<Option<TextCompletion>>,
    requests: Mutex<Vec<ChatRequest>>,
    text_requests: Mutex<Vec<TextRequest>>,
}

impl ScriptedBackend {
    fn new() -> Self {
        Self::default()
    }

    fn reply(self, content: &str) -> Self {
        self.push(ChatMessage::assistant(content), FinishReason::Stop);
        self
    }

    fn tool_call(self, name: &str, arguments: serde_json::Value) -> Self {
        self.push(
            ChatMessage::assistant("").with_tool_calls(vec![ToolCall::new(name, arguments)]),
            FinishReason::ToolCalls,
        );
        self
    }

    fn push(&self, message: ChatMessage, finish_reason: FinishReason) {
        self.replies.lock().unwrap().push_back(ChatCompletion {
            message,
            finish_reason,
            logprobs: Vec::new(),
        });
    }

    fn next(&self, request: ChatRequest) -> Result<ChatCompletion, LlmError> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(LlmError::EmptyResponse)
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatCompletion, LlmError> {
        self.next(request)
    }

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        tx: mpsc::Sender<String>,
    ) -> Result<FinishReason, LlmError> {
        let completion = self.next(ChatRequest::new(messages))?;
        for word in completion.message.content.split_inclusive(' ') {
            let _ = tx.send(word.to_string()).await;
        }
        Ok(completion.finish_reason)
    }

    async fn complete(&self, request: TextRequest) -> Result<TextCompletion, LlmError> {
        self.text_requests.lock().unwrap().push(request);
        self.raw
            .lock()
            .unwrap()
            .take()
            .ok_or(LlmError::Api {
                status: 404,
                body: "not found".to_string(),
            })
    }

    async fn context_window(&self) -> Result<Option<usize>, LlmError> {
        Ok(Some(8192))
    }
}

fn config(mode: AgentMode) -> AgentConfig {
    AgentConfig {
        mode,
        max_steps: 5,
        stream: false,
        safeguard: SafeguardMode::Patterns,
        verify_final_answer: false,
        show_context: false,
    }
}

fn agent(backend: Arc<ScriptedBackend>, config: AgentConfig) -> (Agent, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::new());
    let agent = Agent::new(backend, ToolRegistry::with_defaults(&ToolsConfig::default()), config)
        .with_observer(observer.clone());
    (agent, observer)
}

fn last_message(request: &ChatRequest) -> &ChatMessage {
    request.messages.last().unwrap()
}

#[tokio::test]
async fn test_text_loop_runs_tool_then_answers() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .reply("|Thought:| I should greet.\n|Action:| run_shell_command: echo hello")
            .reply("|Thought:| The command printed hello.\n|Final Answer:| hello"),
    );
    let (agent, observer) = agent(backend.clone(), config(AgentMode::Text));

    let outcome = agent.run("Say hello via the shell").await.unwrap();

    assert_eq!(outcome.answer, "hello");
    assert_eq!(outcome.status, OutcomeStatus::Answered);
    assert_eq!(outcome.steps.len(), 2);
    assert_eq!(outcome.steps[0].observation.as_deref(), Some("hello"));

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].messages[0].role, Role::System);
    assert!(requests[0].messages[0].content.contains("run_shell_command"));
    let second = &requests[1].messages;
    assert_eq!(second.len(), 4);
    assert_eq!(second[2].role, Role::Assistant);
    assert_eq!(last_message(&requests[1]).content, "Observation: hello");

    let events = observer.events();
    assert!(events.contains(&AgentEvent::Action {
        tool: "run_shell_command".to_string(),
        input: "echo hello".to_string(),
    }));
    assert!(events.contains(&AgentEvent::FinalAnswer("hello".to_string())));
}

#[tokio::test]
async fn test_unknown_tool_becomes_observation() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .reply("|Thought:| search\n|Action:| web_search: rust")
            .reply("|Final Answer:| cannot search"),
    );
    let (agent, _) = agent(backend.clone(), config(AgentMode::Text));

    let outcome = agent.run("search the web").await.unwrap();

    assert_eq!(outcome.answer, "cannot search");
    assert_eq!(
        last_message(&backend.requests()[1]).content,
        "Observation: Error: Unknown tool: web_search"
    );
}

#[tokio::test]
async fn test_malformed_output_is_retried_without_touching_history() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .reply("|Action:| run_shell_command: ls |Final Answer:| 3 files")
            .reply("|Final Answer:| 3 files"),
    );
    let (agent, observer) = agent(backend.clone(), config(AgentMode::Text));

    let outcome = agent.run("count files").await.unwrap();

    assert_eq!(outcome.answer, "3 files");
    let requests = backend.requests();
    assert_eq!(requests[0].messages.len(), requests[1].messages.len());
    assert!(observer
        .events()
        .iter()
        .any(|e| matches!(e, AgentEvent::Malformed(_))));
}

#[tokio::test]
async fn test_pattern_safeguard_blocks_without_running() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker");
    let command = format!("sudo touch {}", marker.display());

    let backend = Arc::new(
        ScriptedBackend::new()
            .reply(&format!("|Thought:| make a file\n|Action:| run_shell_command: {}", command))
            .reply("|Final Answer:| could not create it"),
    );
    let (agent, observer) = agent(backend.clone(), config(AgentMode::Text));

    agent.run("create a marker file").await.unwrap();

    assert!(!marker.exists());
    assert_eq!(
        last_message(&backend.requests()[1]).content,
        format!(
            "Observation: Error: Command '{}' was blocked by the safety guard as potentially harmful. The command was not executed.",
            command
        )
    );
    assert!(observer
        .events()
        .iter()
        .any(|e| matches!(e, AgentEvent::Blocked { .. })));
}

#[tokio::test]
async fn test_model_safeguard_requires_not_possible() {
    let dir = tempfile::tempdir().unwrap();
    let blocked = dir.path().join("blocked");
    let allowed = dir.path().join("allowed");

    let backend = Arc::new(
        ScriptedBackend::new()
            .reply(&format!("|Action:| run_shell_command: touch {}", blocked.display()))
            .reply("POSSIBLE")
            .reply(&format!("|Action:| run_shell_command: touch {}", allowed.display()))
            .reply("NOT POSSIBLE")
            .reply("|Final Answer:| done"),
    );
    let mut config = config(AgentMode::Text);
    config.safeguard = SafeguardMode::Model;
    let (agent, _) = agent(backend.clone(), config);

    let outcome = agent.run("touch two files").await.unwrap();

    assert_eq!(outcome.answer, "done");
    assert!(!blocked.exists());
    assert!(allowed.exists());

    let requests = backend.requests();
    assert_eq!(requests.len(), 5);
    // the safety question is asked in a fresh one-message conversation
    assert_eq!(requests[1].messages.len(), 1);
    assert!(requests[1].messages[0]
        .content
        .contains("Please answer POSSIBLE or NOT POSSIBLE."));
}

#[tokio::test]
async fn test_verification_can_replace_answer() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .reply("|Thought:| easy\n|Final Answer:| 4")
            .reply("Close, but imprecise.\n|Better Answer:| 2 + 2 = 4"),
    );
    let mut config = config(AgentMode::Text);
    config.verify_final_answer = true;
    let (agent, observer) = agent(backend.clone(), config);

    let outcome = agent.run("what is 2 + 2?").await.unwrap();

    assert_eq!(outcome.answer, "2 + 2 = 4");
    assert_eq!(outcome.status, OutcomeStatus::Improved);
    let verification = &backend.requests()[1].messages[0].content;
    assert!(verification.starts_with("Original ask was: what is 2 + 2?\nFinal answer is: 4"));
    assert!(observer
        .events()
        .contains(&AgentEvent::Phase("Final Check".to_string())));
}

#[tokio::test]
async fn test_text_loop_stops_at_max_steps() {
    let mut backend = ScriptedBackend::new();
    for _ in 0..3 {
        backend = backend.reply("|Thought:| still thinking");
    }
    let backend = Arc::new(backend);
    let mut config = config(AgentMode::Text);
    config.max_steps = 3;
    let (agent, _) = agent(backend.clone(), config);

    let outcome = agent.run("ponder").await.unwrap();

    assert_eq!(outcome.answer, MAX_STEPS_MESSAGE);
    assert_eq!(outcome.status, OutcomeStatus::MaxStepsReached);
    assert_eq!(backend.requests().len(), 3);
    // thoughts without action are still kept as assistant turns
    assert_eq!(backend.requests()[2].messages.len(), 4);
}

#[tokio::test]
async fn test_streaming_forwards_chunks_and_context_usage() {
    let backend = Arc::new(ScriptedBackend::new().reply("|Final Answer:| streamed answer"));
    let mut config = config(AgentMode::Text);
    config.stream = true;
    config.show_context = true;
    let (agent, observer) = agent(backend, config);

    let outcome = agent.run("stream please").await.unwrap();
    assert_eq!(outcome.answer, "streamed answer");

    let events = observer.events();
    let chunks: String = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Chunk(c) => Some(c.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, "|Final Answer:| streamed answer");
    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::ContextUsage(u) if u.window == 8192)));

    let last = outcome.context.expect("final context usage");
    assert_eq!(last.window, 8192);
    assert!(last.estimated_tokens > 0);
}

#[tokio::test]
async fn test_final_context_usage_absent_when_display_is_off() {
    let backend = Arc::new(ScriptedBackend::new().reply("|Final Answer:| quiet"));
    let (agent, _) = agent(backend, config(AgentMode::Text));

    let outcome = agent.run("no context").await.unwrap();
    assert!(outcome.context.is_none());
}

#[tokio::test]
async fn test_native_loop_plans_calls_tools_and_answers() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .reply("1. Run echo\n2. Report the output")
            .tool_call("run_shell_command", json!({"command": "echo native"}))
            .reply("The command printed native."),
    );
    let (agent, observer) = agent(backend.clone(), config(AgentMode::Native));

    let outcome = agent.run("echo native").await.unwrap();

    assert_eq!(outcome.answer, "The command printed native.");
    let requests = backend.requests();
    assert_eq!(requests.len(), 3);

    // planning offers no tools, execution does
    assert!(requests[0].tools.is_empty());
    assert_eq!(requests[1].tools.len(), 2);
    assert!(last_message(&requests[1]).content.contains("Plan to follow:\n1. Run echo"));

    let tool_turn = last_message(&requests[2]);
    assert_eq!(tool_turn.role, Role::Tool);
    assert_eq!(tool_turn.content, "native");
    // calls without a server id get one, and the tool turn answers it
    let messages = &requests[2].messages;
    let call = &messages[messages.len() - 2].tool_calls[0];
    assert_eq!(call.id.as_deref(), Some("call_2_0"));
    assert_eq!(tool_turn.tool_call_id.as_deref(), Some("call_2_0"));

    assert!(observer
        .events()
        .contains(&AgentEvent::Plan("1. Run echo\n2. Report the output".to_string())));
}

#[tokio::test]
async fn test_native_loop_recovers_embedded_json_call() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .reply("1. Get the time")
            .reply("{\"name\": \"get_current_time\", \"parameters\": {\"format\": \"%Y\"}}<|eot_id|>")
            .reply("It is the current year."),
    );
    let (agent, _) = agent(backend.clone(), config(AgentMode::Native));

    let outcome = agent.run("what year is it?").await.unwrap();

    assert_eq!(outcome.answer, "It is the current year.");
    let requests = backend.requests();
    let messages = &requests[2].messages;
    let assistant = &messages[messages.len() - 2];
    assert_eq!(assistant.tool_calls[0].function.name, "get_current_time");
    assert!(assistant.content.is_empty());
    let year = &messages[messages.len() - 1].content;
    assert_eq!(year.len(), 4);
}

#[tokio::test]
async fn test_native_loop_synthesizes_empty_answer() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .reply("1. Answer")
            .reply("")
            .reply("Synthesised answer"),
    );
    let (agent, _) = agent(backend.clone(), config(AgentMode::Native));

    let outcome = agent.run("anything").await.unwrap();

    assert_eq!(outcome.answer, "Synthesised answer");
    let requests = backend.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[2].tools.is_empty());
    assert!(last_message(&requests[2]).content.contains("final answer"));
}

#[tokio::test]
async fn test_native_loop_blocks_unsafe_tool_call() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .reply("1. Reboot")
            .tool_call("run_shell_command", json!({"command": "reboot"}))
            .reply("I was not allowed to reboot."),
    );
    let (agent, _) = agent(backend.clone(), config(AgentMode::Native));

    agent.run("reboot the machine").await.unwrap();

    let tool_turn = last_message(&backend.requests()[2]).clone();
    assert_eq!(tool_turn.role, Role::Tool);
    assert!(tool_turn.content.contains("was blocked by the safety guard"));
}

#[tokio::test]
async fn test_probe_reports_abstracted_marker() {
    let backend = ScriptedBackend::new();
    backend.replies.lock().unwrap().push_back(ChatCompletion {
        message: ChatMessage::assistant("")
            .with_tool_calls(vec![ToolCall::new("run_shell_command", json!({"command": "date"}))]),
        finish_reason: FinishReason::ToolCalls,
        logprobs: ["{\"", "name", "\":", "date", "\"}"]
            .iter()
            .map(|t| TokenLogprob {
                token: t.to_string(),
                logprob: -0.05,
            })
            .collect(),
    });
    *backend.raw.lock().unwrap() = Some(TextCompletion {
        text: "Mon Jan  1 00:00:00 UTC 2024".to_string(),
        finish_reason: FinishReason::Stop,
    });

    let tools = ToolRegistry::with_defaults(&ToolsConfig::default());
    let report = probe::run_probe(&backend, &tools, probe::DEFAULT_PROMPT, TemplateFamily::Llama3)
        .await
        .unwrap();

    assert!(report.turn_end.ended_on_eog);
    assert!(report.turn_end.marker_abstracted());
    assert_eq!(report.turn_end.tail_tokens.len(), 5);
    let raw = report.raw.as_ref().unwrap();
    assert_eq!(raw.stop, vec!["<|eot_id|>".to_string(), "<|eom_id|>".to_string()]);
    assert!(raw.stopped_on_marker());

    let request = &backend.requests()[0];
    assert!(request.logprobs);
    assert_eq!(request.tools.len(), 2);
    assert!(report.summary()[0].contains("finish_reason=\"tool_calls\""));

    // the plain completion continues the templated conversation, not the bare prompt
    let text_requests = backend.text_requests.lock().unwrap();
    match &text_requests[0].prompt {
        TextPrompt::Templated { messages, tools } => {
            assert_eq!(messages.len(), 2);
            assert_eq!(messages[0].role, Role::System);
            assert_eq!(messages[1].content, probe::DEFAULT_PROMPT);
            assert_eq!(tools.len(), 2);
        }
        TextPrompt::Raw(_) => panic!("completion was sent without the chat template"),
    }
}

#[tokio::test]
async fn test_turn_end_report_shows_leaked_marker_ids() {
    let backend = ScriptedBackend::new().reply("It is Monday.<|eot_id|>");
    *backend.raw.lock().unwrap() = Some(TextCompletion {
        text: "It is Monday.<|eot_id|>".to_string(),
        finish_reason: FinishReason::Stop,
    });
    let tools = ToolRegistry::with_defaults(&ToolsConfig::default());

    let report = probe::run_probe(&backend, &tools, probe::DEFAULT_PROMPT, TemplateFamily::Llama3)
        .await
        .unwrap();

    let summary = report.summary();
    assert!(summary
        .iter()
        .any(|l| l == "EOG marker <|eot_id|> (id 128009) leaked into message content."));
    assert!(summary
        .iter()
        .any(|l| l.starts_with("Templated completion text contains <|eot_id|> (id 128009)")));
}

#[tokio::test]
async fn test_probe_tolerates_missing_raw_endpoint() {
    let backend = ScriptedBackend::new().reply("The date is today.");
    let tools = ToolRegistry::with_defaults(&ToolsConfig::default());

    let report = probe::run_probe(&backend, &tools, "Run the date command", TemplateFamily::Gemma)
        .await
        .unwrap();

    assert!(report.raw.is_none());
    assert_eq!(report.chat.finish_reason, FinishReason::Stop);
}
