use async_trait::async_trait;
use braid_core::{BraidResult, ToolCall};
use braid_tools::{AgentCall, Tool, ToolContext, ToolDescriptor, ToolOutcome, ToolResponse};
use std::collections::BTreeMap;
use tracing::info;

/// Starts a child agent and suspends the caller until the child is terminal.
///
/// The child's final result arrives as an `AgentResult` interaction. The
/// session may refuse the call (depth or fan-out limits), in which case the
/// caller sees an error result instead.
pub struct SpawnAgentTool {
    descriptor: ToolDescriptor,
}

impl SpawnAgentTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: "spawn_agent".to_string(),
                description: "Delegate a task to a new child agent and wait for its result. \
                    Provide the child's config, the task name and the task arguments."
                    .to_string(),
                parameters_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "config": {
                            "type": "string",
                            "description": "Config the child runs under"
                        },
                        "task": {
                            "type": "string",
                            "description": "Task the child runs"
                        },
                        "arguments": {
                            "type": "object",
                            "description": "Task parameters"
                        }
                    },
                    "required": ["config", "task"]
                }),
            },
        }
    }
}

impl Default for SpawnAgentTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SpawnAgentTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, ctx: &ToolContext, call: &ToolCall) -> BraidResult<ToolOutcome> {
        let config = call.arguments["config"].as_str().unwrap_or("");
        let task = call.arguments["task"].as_str().unwrap_or("");
        if config.is_empty() || task.is_empty() {
            return Ok(ToolResponse::error("'config' and 'task' are required").into());
        }

        let arguments: BTreeMap<String, serde_json::Value> = match call.arguments.get("arguments") {
            None | Some(serde_json::Value::Null) => BTreeMap::new(),
            Some(serde_json::Value::Object(map)) => {
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
            Some(_) => return Ok(ToolResponse::error("'arguments' must be an object").into()),
        };

        info!(agent = %ctx.agent_id, config, task, "Delegating to child agent");
        Ok(ToolOutcome::AgentCall(AgentCall {
            config: config.to_string(),
            task: task.to_string(),
            arguments,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use braid_core::{AgentId, BranchId};
    use braid_security::NamespaceStore;
    use serde_json::json;
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
    async fn test_spawn_request() {
        let call = ToolCall::new(
            "c1",
            "spawn_agent",
            json!({"config": "worker", "task": "sum", "arguments": {"n": 3}}),
        );
        let outcome = SpawnAgentTool::new().invoke(&ctx(), &call).await.unwrap();
        let ToolOutcome::AgentCall(agent_call) = outcome else {
            panic!("expected an agent call");
        };
        assert_eq!(agent_call.config, "worker");
        assert_eq!(agent_call.task, "sum");
        assert_eq!(agent_call.arguments["n"], json!(3));
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let tool = SpawnAgentTool::new();
        let missing = ToolCall::new("c1", "spawn_agent", json!({"config": "worker"}));
        assert!(matches!(
            tool.invoke(&ctx(), &missing).await.unwrap(),
            ToolOutcome::Response(ToolResponse { is_error: true, .. })
        ));

        let bad = ToolCall::new(
            "c2",
            "spawn_agent",
            json!({"config": "worker", "task": "sum", "arguments": [1, 2]}),
        );
        assert!(matches!(
            tool.invoke(&ctx(), &bad).await.unwrap(),
            ToolOutcome::Response(ToolResponse { is_error: true, .. })
        ));
    }
}
