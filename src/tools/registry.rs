//! Tool Registry
//!
//! Information Hiding:
//! - Tool storage and ordering hidden
//! - Prompt and schema rendering derived from tool metadata
//! - Default tool set assembled from `ToolsConfig`

use super::{Tool, ToolMetadata};
use crate::config::ToolsConfig;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Tools keyed by name; ordered so prompts and schemas are stable between runs
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a new tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.metadata().name;
        tracing::info!("Registering tool: {}", name);
        self.tools.insert(name, tool);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool exists
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get all tool names, sorted
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Get all tool metadata
    pub fn list_tools(&self) -> Vec<ToolMetadata> {
        self.tools.values().map(|tool| tool.metadata()).collect()
    }

    /// One line per tool for the text-protocol system prompt
    pub fn tools_description(&self) -> String {
        self.tools
            .values()
            .map(|tool| {
                let metadata = tool.metadata();
                let argument = metadata
                    .parameters
                    .first()
                    .map(|p| {
                        if p.required {
                            p.name.clone()
                        } else {
                            format!("optional {}", p.name)
                        }
                    })
                    .unwrap_or_else(|| "no argument".to_string());
                format!(
                    "- {}: {} Argument: {}.",
                    metadata.name, metadata.description, argument
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Schemas for native tool calling
    pub fn function_schemas(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| tool.metadata().function_schema())
            .collect()
    }

    /// Registry with the shell and time tools
    pub fn with_defaults(config: &ToolsConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::tools::shell::ShellTool::new(
            config.shell_timeout_secs,
        )));
        registry.register(Arc::new(crate::tools::time::TimeTool));
        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::shell::ShellTool;

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ShellTool::new(10)));

        assert!(registry.has_tool("run_shell_command"));
        assert!(registry.get("run_shell_command").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_defaults_are_sorted() {
        let registry = ToolRegistry::with_defaults(&ToolsConfig::default());
        assert_eq!(
            registry.tool_names(),
            vec!["get_current_time".to_string(), "run_shell_command".to_string()]
        );
        assert_eq!(registry.function_schemas().len(), 2);
    }

    #[test]
    fn test_tools_description() {
        let registry = ToolRegistry::with_defaults(&ToolsConfig::default());
        let description = registry.tools_description();

        assert!(description.contains("- run_shell_command: Execute a shell command"));
        assert!(description.contains("Argument: command."));
        assert!(description.contains("Argument: optional format."));
    }
}
