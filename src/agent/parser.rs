//! Parsing of model output: the pipe-delimited ReAct sections, the older
//! line-prefixed form, and JSON tool calls embedded in plain content.

use crate::core::llm::ToolCall;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

const THOUGHT: &str = "|Thought:|";
const ACTION: &str = "|Action:|";
const FINAL_ANSWER: &str = "|Final Answer:|";
const BETTER_ANSWER: &str = "|Better Answer:|";

static THOUGHT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\|Thought:\|(.*?)(?:\|Action:\||\|Final Answer:\||$)").expect("valid regex")
});
static ACTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\|Action:\|(.*?)(?:\|Thought:\||\|Final Answer:\||$)").expect("valid regex")
});
static FINAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\|Final Answer:\|(.*?)(?:\|Thought:\||\|Action:\||$)").expect("valid regex")
});
static BETTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\|Better Answer:\|(.*)$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub tool: String,
    pub argument: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub thought: String,
    pub action: Option<Action>,
    pub final_answer: Option<String>,
}

/// A response that both acts and answers is rejected and the step retried
pub fn is_malformed(output: &str) -> bool {
    output.contains(ACTION) && output.contains(FINAL_ANSWER)
}

pub fn parse_output(output: &str) -> ParsedOutput {
    if [THOUGHT, ACTION, FINAL_ANSWER]
        .iter()
        .any(|marker| output.contains(marker))
    {
        parse_delimited(output)
    } else {
        parse_lines(output)
    }
}

fn section(re: &Regex, output: &str) -> String {
    re.captures(output)
        .and_then(|c| c.get(1))
        .map(|m| clean(m.as_str()))
        .unwrap_or_default()
}

/// Models often close a section with a stray `|`
fn clean(text: &str) -> String {
    text.trim().trim_end_matches('|').trim().to_string()
}

fn parse_delimited(output: &str) -> ParsedOutput {
    let final_answer = section(&FINAL_RE, output);
    ParsedOutput {
        thought: section(&THOUGHT_RE, output),
        action: parse_action(&section(&ACTION_RE, output)),
        final_answer: (!final_answer.is_empty()).then_some(final_answer),
    }
}

/// `Thought:` / `Action:` / `Final Answer:` at line start; the answer runs to the end
fn parse_lines(output: &str) -> ParsedOutput {
    let mut parsed = ParsedOutput::default();
    let lines: Vec<&str> = output.trim().lines().collect();

    for (i, line) in lines.iter().enumerate() {
        let line = line.trim_start();
        if let Some(rest) = line.strip_prefix("Thought:") {
            parsed.thought = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("Action:") {
            parsed.action = parse_action(rest.trim());
        } else if let Some(rest) = line.strip_prefix("Final Answer:") {
            let mut answer = vec![rest.trim()];
            answer.extend(&lines[i + 1..]);
            let answer = answer.join("\n").trim().to_string();
            parsed.final_answer = (!answer.is_empty()).then_some(answer);
            break;
        }
    }

    parsed
}

/// `tool_name: argument`, split on the first colon only
fn parse_action(action: &str) -> Option<Action> {
    let (tool, argument) = action.split_once(':')?;
    let tool = tool.trim();
    if tool.is_empty() {
        return None;
    }
    Some(Action {
        tool: tool.to_string(),
        argument: argument.trim().to_string(),
    })
}

pub fn better_answer(verification: &str) -> Option<String> {
    if !verification.contains(BETTER_ANSWER) {
        return None;
    }
    let answer = section(&BETTER_RE, verification);
    (!answer.is_empty()).then_some(answer)
}

#[derive(Debug, Deserialize)]
struct EmbeddedCall {
    name: String,
    #[serde(default, alias = "arguments")]
    parameters: Option<Value>,
}

/// Tool call written into message content as `{"name": ..., "parameters": {...}}`.
/// Returns `None` for anything that is not such an object, so the caller can
/// fall back to treating the content as plain text.
pub fn parse_embedded_tool_call(content: &str) -> Option<ToolCall> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }

    let call: EmbeddedCall = match serde_json::from_str(&content[start..=end]) {
        Ok(call) => call,
        Err(e) => {
            tracing::debug!("Content is not a JSON tool call: {}", e);
            return None;
        }
    };
    if call.name.trim().is_empty() {
        return None;
    }

    let arguments = match call.parameters {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(Value::Object(map)) => Value::Object(map),
        Some(other) => {
            tracing::warn!("Ignoring tool call with non-object parameters: {}", other);
            return None;
        }
    };
    Some(ToolCall::new(call.name.trim(), arguments))
}
