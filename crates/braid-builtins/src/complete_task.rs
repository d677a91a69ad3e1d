use async_trait::async_trait;
use braid_core::{BraidResult, ToolCall};
use braid_tools::{Tool, ToolContext, ToolDescriptor, ToolOutcome, ToolResponse};

/// Finishes the current task with the given result.
pub struct CompleteTaskTool {
    descriptor: ToolDescriptor,
}

impl CompleteTaskTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: "complete_task".to_string(),
                description: "Finish the current task. The result is passed on to the next \
                    task of the sequence, if any."
                    .to_string(),
                parameters_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "result": {
                            "type": "string",
                            "description": "Final result of the task"
                        }
                    },
                    "required": ["result"]
                }),
            },
        }
    }
}

impl Default for CompleteTaskTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CompleteTaskTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, _ctx: &ToolContext, call: &ToolCall) -> BraidResult<ToolOutcome> {
        let result = match &call.arguments["result"] {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        Ok(ToolResponse::success(result).complete().into())
    }
}
