use async_trait::async_trait;
use braid_core::{BraidError, BraidResult, ToolCall};
use braid_tools::{Tool, ToolContext, ToolDescriptor, ToolOutcome, ToolResponse};
use serde_json::Value;
use tracing::info;

fn required_str<'a>(call: &'a ToolCall, field: &str) -> Result<&'a str, ToolResponse> {
    call.arguments[field]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolResponse::error(format!("'{field}' is required")))
}

/// Store failures the agent can react to become error results.
fn store_error(err: BraidError) -> BraidResult<ToolOutcome> {
    match err {
        BraidError::AccessDenied { .. } | BraidError::UnknownNamespace(_) => {
            Ok(ToolResponse::error(err.to_string()).into())
        }
        other => Err(other),
    }
}

/// Reads one key of a namespace.
pub struct SharedStateGetTool {
    descriptor: ToolDescriptor,
}

impl SharedStateGetTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: "shared_state_get".to_string(),
                description: "Read a value from a shared namespace. \
                    Returns null when the key is unset."
                    .to_string(),
                parameters_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "namespace": {"type": "string"},
                        "key": {"type": "string"}
                    },
                    "required": ["namespace", "key"]
                }),
            },
        }
    }
}

impl Default for SharedStateGetTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SharedStateGetTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, ctx: &ToolContext, call: &ToolCall) -> BraidResult<ToolOutcome> {
        let (namespace, key) = match (required_str(call, "namespace"), required_str(call, "key")) {
            (Ok(ns), Ok(key)) => (ns, key),
            (Err(e), _) | (_, Err(e)) => return Ok(e.into()),
        };
        match ctx.namespaces.get(namespace, key, ctx.agent_id).await {
            Ok(value) => {
                let value = value.unwrap_or(Value::Null);
                Ok(ToolResponse::success(value.to_string()).into())
            }
            Err(e) => store_error(e),
        }
    }
}

/// Writes one key of a namespace.
pub struct SharedStateSetTool {
    descriptor: ToolDescriptor,
}

impl SharedStateSetTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: "shared_state_set".to_string(),
                description: "Write a value to a shared namespace and return the previous value."
                    .to_string(),
                parameters_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "namespace": {"type": "string"},
                        "key": {"type": "string"},
                        "value": {}
                    },
                    "required": ["namespace", "key", "value"]
                }),
            },
        }
    }
}

impl Default for SharedStateSetTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SharedStateSetTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, ctx: &ToolContext, call: &ToolCall) -> BraidResult<ToolOutcome> {
        let (namespace, key) = match (required_str(call, "namespace"), required_str(call, "key")) {
            (Ok(ns), Ok(key)) => (ns, key),
            (Err(e), _) | (_, Err(e)) => return Ok(e.into()),
        };
        let value = call.arguments.get("value").cloned().unwrap_or(Value::Null);
        match ctx.namespaces.set(namespace, key, value, ctx.agent_id).await {
            Ok(previous) => {
                info!(agent = %ctx.agent_id, namespace, key, "Shared state written");
                Ok(ToolResponse::success(previous.unwrap_or(Value::Null).to_string()).into())
            }
            Err(e) => store_error(e),
        }
    }
}

/// Compare-and-set on one key, for read-then-write updates across agents.
pub struct SharedStateCasTool {
    descriptor: ToolDescriptor,
}

impl SharedStateCasTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: "shared_state_cas".to_string(),
                description: "Write 'value' only if the current value equals 'expected' \
                    (omit 'expected' to require the key to be unset). \
                    Returns whether the write happened."
                    .to_string(),
                parameters_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "namespace": {"type": "string"},
                        "key": {"type": "string"},
                        "expected": {},
                        "value": {}
                    },
                    "required": ["namespace", "key", "value"]
                }),
            },
        }
    }
}

impl Default for SharedStateCasTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SharedStateCasTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, ctx: &ToolContext, call: &ToolCall) -> BraidResult<ToolOutcome> {
        let (namespace, key) = match (required_str(call, "namespace"), required_str(call, "key")) {
            (Ok(ns), Ok(key)) => (ns, key),
            (Err(e), _) | (_, Err(e)) => return Ok(e.into()),
        };
        let expected = call.arguments.get("expected").filter(|v| !v.is_null());
        let value = call.arguments.get("value").cloned().unwrap_or(Value::Null);
        match ctx
            .namespaces
            .compare_and_set(namespace, key, expected, value, ctx.agent_id)
            .await
        {
            Ok(swapped) => {
                let body = serde_json::json!({ "swapped": swapped });
                Ok(ToolResponse::success(body.to_string()).into())
            }
            Err(e) => store_error(e),
        }
    }
}
