use async_trait::async_trait;
use braid_core::{BraidResult, ToolCall};
use braid_tools::{Tool, ToolContext, ToolDescriptor, ToolOutcome, ToolResponse};
use tracing::info;

/// Suspends the agent until a human answers the prompt.
pub struct AskHumanTool {
    descriptor: ToolDescriptor,
}

impl AskHumanTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: "ask_human".to_string(),
                description: "Ask a human operator a question and wait for the answer."
                    .to_string(),
                parameters_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "prompt": {
                            "type": "string",
                            "description": "The question for the human"
                        }
                    },
                    "required": ["prompt"]
                }),
            },
        }
    }
}

impl Default for AskHumanTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for AskHumanTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, ctx: &ToolContext, call: &ToolCall) -> BraidResult<ToolOutcome> {
        let prompt = call.arguments["prompt"].as_str().unwrap_or("").trim();
        if prompt.is_empty() {
            return Ok(ToolResponse::error("A prompt is required").into());
        }
        info!(agent = %ctx.agent_id, "Human input requested");
        Ok(ToolOutcome::AskHuman {
            prompt: prompt.to_string(),
        })
    }
}
