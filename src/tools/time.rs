use super::{Tool, ToolMetadata, ToolParameter, ToolResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use serde_json::Value;

/// Current local date and time
pub struct TimeTool;

#[async_trait]
impl Tool for TimeTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: "get_current_time".to_string(),
            description: "Get the current local date and time. Returns RFC 3339 unless a format is given.".to_string(),
            parameters: vec![ToolParameter {
                name: "format".to_string(),
                param_type: "string".to_string(),
                description: "Optional strftime format, e.g. '%Y-%m-%d %H:%M'".to_string(),
                required: false,
            }],
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let now = Local::now();
        let format = args["format"].as_str().map(str::trim).filter(|f| !f.is_empty());

        Ok(match format {
            None => ToolResult::success(now.to_rfc3339()),
            Some(format) => {
                // chrono panics on Display for invalid specifiers; reject them up front
                let items: Vec<Item> = StrftimeItems::new(format).collect();
                if items.iter().any(|i| matches!(i, Item::Error)) {
                    ToolResult::failure(format!("Error: invalid time format '{}'", format))
                } else {
                    ToolResult::success(now.format_with_items(items.into_iter()).to_string())
                }
            }
        })
    }
}
