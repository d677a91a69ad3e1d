//! Core types and error definitions for the Braid orchestration engine.
//!
//! This crate provides the foundational types shared across all Braid crates:
//! the unified error enum, the identifiers used to address agents, branches and
//! interactions, and the closed set of interaction payloads that make up an
//! agent's history.
//!
//! # Main types
//!
//! - [`BraidError`] — Unified error enum for all Braid subsystems.
//! - [`BraidResult`] — Convenience alias for `Result<T, BraidError>`.
//! - [`Interaction`] — One immutable record appended to an agent's stack.
//! - [`InteractionPayload`] — Kind-specific content of an interaction.
//! - [`ToolCall`] — A request to invoke a tool, issued by the oracle or by a chain.
//! - [`AgentStatus`] — Lifecycle state of an agent.

/// Interaction records and their payloads.
pub mod interaction;

pub use interaction::{
    Interaction, InteractionKind, InteractionPayload, TaskFrame, ToolCall, WaitCondition,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Error types ---

/// Top-level error type for the Braid engine.
#[derive(Debug, thiserror::Error)]
pub enum BraidError {
    /// A push or read addressed a branch the stack never registered.
    #[error("Unknown branch: {0}")]
    UnknownBranch(BranchId),

    /// A fork index beyond the source branch's current length.
    #[error("Index {index} out of range for branch {branch} (length {len})")]
    IndexOutOfRange {
        /// Branch the fork was requested from.
        branch: BranchId,
        /// Requested fork index.
        index: usize,
        /// Current visible length of the branch.
        len: usize,
    },

    /// Missing or invalid task parameters, or an unresolvable config/template.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An error in configuration parsing or state machine compilation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error raised by a tool during invocation.
    #[error("Tool error: {0}")]
    Tool(String),

    /// The oracle timed out or returned malformed output.
    #[error("Oracle call failed: {0}")]
    OracleCallFailed(String),

    /// Namespace access by an agent that holds no grant.
    #[error("Access denied: agent {agent} may not access namespace '{namespace}'")]
    AccessDenied {
        /// Namespace that was addressed.
        namespace: String,
        /// Agent that attempted the access.
        agent: AgentId,
    },

    /// A namespace that was never created.
    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    /// An agent id the session does not know.
    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    /// An agent reached its step ceiling.
    #[error("Agent {agent} exceeded its limit of {max_steps} steps")]
    StepLimitExceeded {
        /// Agent that hit the ceiling.
        agent: AgentId,
        /// Configured ceiling.
        max_steps: u32,
    },

    /// An error reading or writing persisted history.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// An operation that does not apply to the agent's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BraidError {
    /// Programmer errors the engine must not try to continue past.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            BraidError::UnknownBranch(_) | BraidError::IndexOutOfRange { .. }
        )
    }
}

/// A convenience `Result` alias using [`BraidError`].
pub type BraidResult<T> = Result<T, BraidError>;

// --- Identifiers ---

/// Identifier of an agent within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub Uuid);

impl AgentId {
    /// Allocates a fresh random agent id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a branch inside one agent's stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(pub u32);

impl BranchId {
    /// The branch every stack starts with.
    pub const MAIN: BranchId = BranchId(0);
}

impl std::fmt::Display for BranchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Identifier of an interaction; its position in the owning stack's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InteractionId(pub u64);

impl std::fmt::Display for InteractionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "i{}", self.0)
    }
}

// --- Agent lifecycle ---

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Eligible to be stepped by the scheduler.
    Running,
    /// Suspended on a `Waiting` or `AskHuman` interaction.
    Waiting,
    /// Task (and its whole chain) completed.
    Finished,
    /// A fatal error ended the agent; a terminal interaction records why.
    Failed,
    /// The step ceiling was reached before completion.
    Stopped,
}

impl AgentStatus {
    /// Whether the agent can never be stepped again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AgentStatus::Finished | AgentStatus::Failed | AgentStatus::Stopped
        )
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Waiting => write!(f, "waiting"),
            AgentStatus::Finished => write!(f, "finished"),
            AgentStatus::Failed => write!(f, "failed"),
            AgentStatus::Stopped => write!(f, "stopped"),
        }
    }
}
