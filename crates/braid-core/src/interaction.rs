use crate::{AgentId, AgentStatus, BranchId, InteractionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A request to invoke a specific tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier unique within the owning agent's history.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON arguments to pass to the tool.
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Creates a tool call.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Condition a `Waiting` interaction is suspended on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaitCondition {
    /// Resume once the target child agent is terminal.
    ChildTerminal,
    /// Resume after this many scheduler rounds have elapsed.
    TickCount {
        /// Rounds to wait.
        ticks: u64,
    },
    /// Resume once an external caller delivers the named signal.
    ExternalSignal {
        /// Signal name to wait for.
        name: String,
    },
}

/// Everything needed to run one task of a chain.
///
/// Recorded by `TaskDefinition` and `TaskChain` so that an agent's current
/// task, config and remaining sequence can be recovered from history alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFrame {
    /// Name of the task in the catalog.
    pub task_name: String,
    /// Config active while this task runs.
    pub config: String,
    /// Prompt template reference.
    pub prompt_template: String,
    /// Validated, typed parameter bindings.
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Follow-up task names still to run after this one.
    #[serde(default)]
    pub remaining_sequence: Vec<String>,
    /// Parameter name the result of this task is bound to in the next one.
    #[serde(default)]
    pub pass_result_as: Option<String>,
    /// Config to switch to when chaining to the next task.
    #[serde(default)]
    pub chain_config: Option<String>,
}

/// Discriminant of an [`InteractionPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    TaskDefinition,
    AskOracle,
    OracleResponse,
    ToolCall,
    ToolResult,
    AskHuman,
    HumanResponse,
    TaskResult,
    TaskChain,
    AgentCall,
    AgentResult,
    Waiting,
    ExternalInput,
}

/// Kind-specific content of an interaction. The set of kinds is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InteractionPayload {
    /// The task an agent was created with.
    TaskDefinition { frame: TaskFrame },
    /// The dispatcher is about to consult the oracle.
    AskOracle {
        config: String,
        state: Option<String>,
        template: String,
        tools: Vec<String>,
        context_len: usize,
    },
    /// The oracle's complete answer.
    OracleResponse {
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    /// A tool invocation; `chained` is set when a previous tool requested it.
    ToolCall { call: ToolCall, chained: bool },
    /// The outcome of a tool invocation.
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
        include_in_context: bool,
        next_tool: Option<ToolCall>,
        completes_task: bool,
    },
    /// A tool asked for human input.
    AskHuman {
        call_id: Option<String>,
        prompt: String,
    },
    /// Human input answering the `AskHuman` with id `request_id`.
    HumanResponse {
        request_id: InteractionId,
        call_id: Option<String>,
        content: String,
    },
    /// Final result of a task.
    TaskResult {
        task_name: String,
        content: String,
        is_error: bool,
    },
    /// Transition to the next task of a sequence.
    TaskChain {
        previous_task: String,
        frame: TaskFrame,
    },
    /// A tool requested a child agent.
    AgentCall {
        call_id: String,
        config: String,
        task: String,
        arguments: BTreeMap<String, serde_json::Value>,
    },
    /// A child agent reached a terminal state.
    AgentResult {
        call_id: Option<String>,
        child_id: AgentId,
        status: AgentStatus,
        content: String,
        is_error: bool,
    },
    /// A paused continuation.
    Waiting {
        target_agent_id: Option<AgentId>,
        call_id: Option<String>,
        condition: WaitCondition,
    },
    /// Input delivered from outside the agent (signals, elapsed timers).
    ExternalInput {
        call_id: Option<String>,
        source: String,
        content: serde_json::Value,
    },
}

impl InteractionPayload {
    /// The discriminant of this payload.
    pub fn kind(&self) -> InteractionKind {
        match self {
            InteractionPayload::TaskDefinition { .. } => InteractionKind::TaskDefinition,
            InteractionPayload::AskOracle { .. } => InteractionKind::AskOracle,
            InteractionPayload::OracleResponse { .. } => InteractionKind::OracleResponse,
            InteractionPayload::ToolCall { .. } => InteractionKind::ToolCall,
            InteractionPayload::ToolResult { .. } => InteractionKind::ToolResult,
            InteractionPayload::AskHuman { .. } => InteractionKind::AskHuman,
            InteractionPayload::HumanResponse { .. } => InteractionKind::HumanResponse,
            InteractionPayload::TaskResult { .. } => InteractionKind::TaskResult,
            InteractionPayload::TaskChain { .. } => InteractionKind::TaskChain,
            InteractionPayload::AgentCall { .. } => InteractionKind::AgentCall,
            InteractionPayload::AgentResult { .. } => InteractionKind::AgentResult,
            InteractionPayload::Waiting { .. } => InteractionKind::Waiting,
            InteractionPayload::ExternalInput { .. } => InteractionKind::ExternalInput,
        }
    }

    /// The tool call id this interaction settles, if any.
    pub fn resolved_call_id(&self) -> Option<&str> {
        match self {
            InteractionPayload::ToolResult { call_id, .. } => Some(call_id),
            InteractionPayload::AgentResult { call_id, .. }
            | InteractionPayload::HumanResponse { call_id, .. }
            | InteractionPayload::ExternalInput { call_id, .. } => call_id.as_deref(),
            _ => None,
        }
    }

    /// Whether the oracle is shown this interaction.
    pub fn is_oracle_visible(&self) -> bool {
        !matches!(
            self,
            InteractionPayload::ToolResult {
                include_in_context: false,
                ..
            }
        )
    }

    /// The task frame introduced by this interaction, if any.
    pub fn task_frame(&self) -> Option<&TaskFrame> {
        match self {
            InteractionPayload::TaskDefinition { frame }
            | InteractionPayload::TaskChain { frame, .. } => Some(frame),
            _ => None,
        }
    }
}

/// One immutable record of agent activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// Arena position in the owning stack.
    pub id: InteractionId,
    /// Branch the interaction was appended to.
    pub branch_id: BranchId,
    /// Position within the branch's visible history.
    pub sequence_index: usize,
    /// The interaction that was the branch tip when this one was appended.
    pub causal_parent_id: Option<InteractionId>,
    /// UTC timestamp of when the interaction was appended.
    pub timestamp: DateTime<Utc>,
    /// Kind-specific content.
    pub payload: InteractionPayload,
}

impl Interaction {
    /// The discriminant of this interaction's payload.
    pub fn kind(&self) -> InteractionKind {
        self.payload.kind()
    }
}
