use braid_core::{AgentId, BraidResult, BranchId, ToolCall, WaitCondition};
use braid_security::NamespaceStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Metadata describing a tool's interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// What a tool sees of the agent invoking it.
#[derive(Clone)]
pub struct ToolContext {
    pub agent_id: AgentId,
    pub branch_id: BranchId,
    pub task_name: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// The session's shared state, checked against `agent_id` on every access.
    pub namespaces: Arc<NamespaceStore>,
}

/// A regular tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub is_error: bool,
    pub content: String,
    /// Tool to run immediately afterwards, without consulting the oracle.
    #[serde(default)]
    pub next_tool: Option<String>,
    #[serde(default)]
    pub next_tool_args: Option<serde_json::Value>,
    /// When false the result is persisted but hidden from the oracle.
    #[serde(default = "default_include_in_context")]
    pub include_in_context: bool,
    /// Whether this result finishes the current task.
    #[serde(default)]
    pub completes_task: bool,
}

fn default_include_in_context() -> bool {
    true
}

impl ToolResponse {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            is_error: false,
            content: content.into(),
            next_tool: None,
            next_tool_args: None,
            include_in_context: true,
            completes_task: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::success(content)
        }
    }

    /// Chain straight into `tool` with `args`.
    pub fn then(mut self, tool: impl Into<String>, args: serde_json::Value) -> Self {
        self.next_tool = Some(tool.into());
        self.next_tool_args = Some(args);
        self
    }

    /// Keep this result out of the oracle's view.
    pub fn hidden(mut self) -> Self {
        self.include_in_context = false;
        self
    }

    /// Mark the current task as complete with this result's content.
    pub fn complete(mut self) -> Self {
        self.completes_task = true;
        self
    }
}

/// A request for the session to start a child agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCall {
    pub config: String,
    pub task: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, serde_json::Value>,
}

/// Everything a tool may hand back to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Response(ToolResponse),
    /// Spawn a child agent and suspend until it is terminal.
    AgentCall(AgentCall),
    /// Suspend until a human answers `prompt`.
    AskHuman { prompt: String },
    /// Suspend until `condition` holds.
    Wait(WaitCondition),
}

impl From<ToolResponse> for ToolOutcome {
    fn from(response: ToolResponse) -> Self {
        ToolOutcome::Response(response)
    }
}

/// Trait that every tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    async fn invoke(&self, ctx: &ToolContext, call: &ToolCall) -> BraidResult<ToolOutcome>;
}
