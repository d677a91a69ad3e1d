use async_trait::async_trait;
use braid_core::{BraidResult, ToolCall, WaitCondition};
use braid_tools::{Tool, ToolContext, ToolDescriptor, ToolOutcome, ToolResponse};
use tracing::debug;

/// Suspends the agent for a number of scheduler rounds.
pub struct WaitTicksTool {
    descriptor: ToolDescriptor,
}

impl WaitTicksTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: "wait_ticks".to_string(),
                description: "Pause for the given number of scheduler rounds.".to_string(),
                parameters_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "ticks": {"type": "integer", "minimum": 1}
                    },
                    "required": ["ticks"]
                }),
            },
        }
    }
}

impl Default for WaitTicksTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WaitTicksTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, ctx: &ToolContext, call: &ToolCall) -> BraidResult<ToolOutcome> {
        match call.arguments["ticks"].as_u64() {
            Some(ticks) if ticks > 0 => {
                debug!(agent = %ctx.agent_id, ticks, "Waiting for ticks");
                Ok(ToolOutcome::Wait(WaitCondition::TickCount { ticks }))
            }
            _ => Ok(ToolResponse::error("'ticks' must be a positive integer").into()),
        }
    }
}

/// Suspends the agent until a named external signal arrives.
pub struct WaitSignalTool {
    descriptor: ToolDescriptor,
}

impl WaitSignalTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: "wait_signal".to_string(),
                description: "Pause until the named external signal is delivered. \
                    The signal's payload becomes the result."
                    .to_string(),
                parameters_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"}
                    },
                    "required": ["name"]
                }),
            },
        }
    }
}

impl Default for WaitSignalTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WaitSignalTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, ctx: &ToolContext, call: &ToolCall) -> BraidResult<ToolOutcome> {
        match call.arguments["name"].as_str().filter(|n| !n.is_empty()) {
            Some(name) => {
                debug!(agent = %ctx.agent_id, signal = name, "Waiting for signal");
                Ok(ToolOutcome::Wait(WaitCondition::ExternalSignal {
                    name: name.to_string(),
                }))
            }
            None => Ok(ToolResponse::error("'name' is required").into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use braid_core::{AgentId, BranchId};
    use braid_security::NamespaceStore;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn ctx() -> ToolContext {
        ToolContext {
            agent_id: AgentId::new(),
            branch_id: BranchId::MAIN,
            task_name: "t".into(),
            parameters: BTreeMap::new(),
            namespaces: Arc::new(NamespaceStore::new()),
        }
    }

    #[tokio::test]
    async fn test_wait_ticks() {
        let tool = WaitTicksTool::new();
        let call = ToolCall::new("c1", "wait_ticks", json!({"ticks": 3}));
        assert_eq!(
            tool.invoke(&ctx(), &call).await.unwrap(),
            ToolOutcome::Wait(WaitCondition::TickCount { ticks: 3 })
        );

        let zero = ToolCall::new("c2", "wait_ticks", json!({"ticks": 0}));
        assert!(matches!(
            tool.invoke(&ctx(), &zero).await.unwrap(),
            ToolOutcome::Response(ToolResponse { is_error: true, .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_signal() {
        let tool = WaitSignalTool::new();
        let call = ToolCall::new("c1", "wait_signal", json!({"name": "go"}));
        assert_eq!(
            tool.invoke(&ctx(), &call).await.unwrap(),
            ToolOutcome::Wait(WaitCondition::ExternalSignal { name: "go".into() })
        );
    }
}
