//! Shell Command Tool
//!
//! Runs `sh -c <command>` under a timeout. Success yields trimmed stdout,
//! a non-zero exit yields `Error: <stderr>`.

use super::{Tool, ToolMetadata, ToolParameter, ToolResult};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

pub const SHELL_TOOL_NAME: &str = "run_shell_command";

pub struct ShellTool {
    timeout_secs: u64,
}

impl ShellTool {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: SHELL_TOOL_NAME.to_string(),
            description: "Execute a shell command and return its output.".to_string(),
            parameters: vec![ToolParameter {
                name: "command".to_string(),
                param_type: "string".to_string(),
                description: "The shell command to execute.".to_string(),
                required: true,
            }],
        }
    }

    fn validate(&self, args: &Value) -> Result<()> {
        let command = args["command"].as_str().ok_or_else(|| {
            anyhow::anyhow!("'command' parameter is required and must be a string")
        })?;

        if command.trim().is_empty() {
            return Err(anyhow::anyhow!("Command cannot be empty"));
        }

        Ok(())
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        if let Err(e) = self.validate(&args) {
            return Ok(ToolResult::failure(format!("Error: {}", e)));
        }
        let command = args["command"].as_str().unwrap_or_default();

        tracing::info!("Executing shell command: {}", command);

        let result = timeout(
            Duration::from_secs(self.timeout_secs),
            Command::new("sh")
                .arg("-c")
                .arg(command)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        Ok(match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                tracing::debug!("Command exited with {:?}", output.status.code());

                if output.status.success() {
                    ToolResult::success(stdout.trim())
                } else {
                    ToolResult::failure(format!("Error: {}", stderr.trim()))
                }
            }
            Ok(Err(e)) => ToolResult::failure(format!("Exception: {}", e)),
            Err(_) => {
                tracing::warn!(
                    "Command timed out after {} seconds: {}",
                    self.timeout_secs,
                    command
                );
                ToolResult::failure("action execution failed with timeout")
            }
        })
    }
}
