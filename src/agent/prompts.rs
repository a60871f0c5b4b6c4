use crate::core::llm::{ChatMessage, ToolCall};
use serde_json::json;

pub fn react_system_prompt(tools_description: &str) -> String {
    format!(
        "You are an AI agent that solves tasks iteratively using Reasoning and Acting (ReAct).\n\
         Your response MUST be in the following format for each step:\n\
         |Thought:| [Your reasoning process here]\n\
         ONE OF THE FOLLOWING ELEMENTS:\n\
         |Action:| [tool_name: argument]\n\
         OR\n\
         |Final Answer:| [your final answer]\n\n\
         Explanation about these possible output sections:\n\
         - |Thought:| Reason step-by-step about what to do next.\n\
         - |Action:| If needed, call a tool in the format 'tool_name: argument' (e.g., 'run_shell_command: ls -l /home').\n\
         - If you have the final answer, output '|Final Answer:| [your answer]'.\n\n\
         Available tools:\n{}\n\n\
         If you need to run several commands, suggest only one command per |Action:| section; you will get another turn for the next one.\n\
         You can't have multiple instances of |Thought:| in one response, put all the thoughts in one |Thought:| element.\n\
         Never provide both |Action:| and |Final Answer:| elements in one response.\n\
         If there is no action to perform, do not add an |Action:| section to the response.\n\
         Do not repeat actions unnecessarily. Stop when the query is solved.\n\
         Do not try to install additional software on the computer where you are being executed.",
        tools_description
    )
}

pub const PLANNING_PROMPT: &str = "You are a helpful AI assistant.\n\
Create a concise, step-by-step plan to answer the user's question.\n\
Output ONLY the plan as a numbered list. Do not execute any actions yet.";

pub const ACTING_PROMPT: &str = "You are a helpful AI assistant that uses tools to answer questions.\n\n\
CRITICAL: You MUST use the provided tools by making actual function calls. Do NOT write JSON descriptions of tool calls - the system will automatically format them for you.\n\n\
Follow this pattern:\n\
1. Make a tool call to gather information\n\
2. Wait for the result\n\
3. Reflect on the result\n\
4. Continue with more tool calls if needed\n\
5. Provide final answer when you have enough information";

pub const SYNTHESIS_PROMPT: &str = "Based on the tool results above, write the final answer to the original question. \
Answer directly and do not call any more tools.";

/// Opening transcript for the execution phase: acting prompt, one worked
/// tool-call exchange, then the real question with its plan
pub fn acting_history(query: &str, plan: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(ACTING_PROMPT),
        ChatMessage::user("What is the current directory?"),
        ChatMessage::assistant(
            "I'll use the run_shell_command tool to check the current directory.",
        )
        .with_tool_calls(vec![
            ToolCall::new("run_shell_command", json!({"command": "pwd"})).with_id("call_0")
        ]),
        ChatMessage::tool("/home/user/projects").with_tool_call_id(Some("call_0".to_string())),
        ChatMessage::assistant("The current directory is /home/user/projects"),
        ChatMessage::user(format!(
            "Original question: {}\n\nPlan to follow:\n{}\n\nNow execute this plan using available tools.",
            query, plan
        )),
    ]
}

pub fn safety_prompt(command: &str) -> String {
    format!(
        "You have suggested to execute the following command as part of resolving user query: {}. \
         Is it possible that the command alters user system in an irreversible manner resulting in data loss or system instability. \
         Please answer POSSIBLE or NOT POSSIBLE.",
        command
    )
}

pub fn verification_prompt(query: &str, answer: &str, history: &[ChatMessage]) -> String {
    let steps = history
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Original ask was: {}\nFinal answer is: {}\nSteps are:\n{}\n\n\
         Is this a good answer given the request? If you have better answer please respond with |Better Answer:| element.",
        query, answer, steps
    )
}
