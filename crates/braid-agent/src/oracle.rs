use crate::config::PromptTemplate;
use async_trait::async_trait;
use braid_core::{AgentId, BraidError, BraidResult, BranchId, Interaction};
use braid_tools::ToolDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::Mutex;

/// Everything the oracle is shown for one consultation.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub agent_id: AgentId,
    pub branch_id: BranchId,
    pub config: String,
    pub state: Option<String>,
    /// Behaviour template of the active config or state.
    pub system: PromptTemplate,
    /// Template of the current task.
    pub prompt: PromptTemplate,
    /// Bound parameters of the current task.
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Oracle-visible context of the active branch, oldest first.
    pub history: Vec<Interaction>,
    /// Tools available in the current config or state.
    pub tools: Vec<ToolDescriptor>,
}

/// A tool the oracle wants invoked. Call ids are assigned by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolRequest {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OracleReply {
    /// Free text. Completes the current task with this content.
    Text(String),
    /// One or more tool invocations, executed in order.
    ToolUse {
        content: Option<String>,
        tool_calls: Vec<ToolRequest>,
    },
}

impl OracleReply {
    pub fn tools(tool_calls: Vec<ToolRequest>) -> Self {
        OracleReply::ToolUse {
            content: None,
            tool_calls,
        }
    }
}

/// The decision-making service consulted by agents.
///
/// Implementations wrap an LLM, a planner or a fixed script. Agents treat
/// every error as a failed call and retry according to their config.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn consult(&self, request: &OracleRequest) -> BraidResult<OracleReply>;
}

/// Replays a fixed queue of replies, one per consultation.
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<BraidResult<OracleReply>>>,
}

impl ScriptedOracle {
    pub fn new(replies: Vec<OracleReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
        }
    }

    /// A script that may also contain failed calls.
    pub fn with_results(replies: Vec<BraidResult<OracleReply>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }

    pub async fn remaining(&self) -> usize {
        self.replies.lock().await.len()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn consult(&self, _request: &OracleRequest) -> BraidResult<OracleReply> {
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(BraidError::OracleCallFailed("script exhausted".into())))
    }
}

/// Answers each consultation with a closure over the request.
pub struct FnOracle<F> {
    respond: F,
}

impl<F> FnOracle<F>
where
    F: Fn(&OracleRequest) -> BraidResult<OracleReply> + Send + Sync,
{
    pub fn new(respond: F) -> Self {
        Self { respond }
    }
}

#[async_trait]
impl<F> Oracle for FnOracle<F>
where
    F: Fn(&OracleRequest) -> BraidResult<OracleReply> + Send + Sync,
{
    async fn consult(&self, request: &OracleRequest) -> BraidResult<OracleReply> {
        (self.respond)(request)
    }
}
