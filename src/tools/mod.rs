//! Tool System - local actions the agent can take
//!
//! Information Hiding:
//! - Process spawning and time formatting hidden behind the `Tool` trait
//! - Parameter schemas owned by each tool's metadata
//! - Text-protocol argument binding hidden in `args_from_text`
//! - Failures reported as `ToolResult::failure` values, never raised to the loop

pub mod registry;
pub mod shell;
pub mod time;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Tool parameter schema definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: String,
    pub description: String,
    pub required: bool,
}

/// Tool metadata - describes what the tool does and how to use it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl fmt::Display for ToolMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.description)
    }
}

impl ToolMetadata {
    /// Function-tool schema understood by both Ollama and OpenAI-style servers
    pub fn function_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    json!({"type": p.param_type, "description": p.description}),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                },
            },
        })
    }
}

/// Result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Text handed back to the model
    pub fn observation(&self) -> String {
        if self.success {
            self.output.clone()
        } else {
            self.error.clone().unwrap_or_default()
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Get tool metadata
    fn metadata(&self) -> ToolMetadata;

    /// Execute the tool with JSON arguments
    async fn execute(&self, args: Value) -> Result<ToolResult>;

    /// Validate arguments before execution
    fn validate(&self, _args: &Value) -> Result<()> {
        Ok(())
    }

    /// Map a `tool_name: argument` text action onto JSON arguments.
    /// The argument binds to the first declared parameter.
    fn args_from_text(&self, argument: &str) -> Value {
        let mut args = Map::new();
        if let Some(param) = self.metadata().parameters.first() {
            if !argument.is_empty() {
                args.insert(param.name.clone(), Value::String(argument.to_string()));
            }
        }
        Value::Object(args)
    }
}
