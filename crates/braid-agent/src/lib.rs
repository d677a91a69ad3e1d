//! Agents and the step dispatcher that drives them.
//!
//! An [`Agent`] owns a branching interaction history and grows it one
//! [`Agent::step`] at a time: consulting the [`Oracle`], executing tool calls,
//! chaining tasks and suspending on humans, children or wait conditions.
//! Configs, tasks and prompt templates are resolved through a [`Catalog`].

pub mod agent;
pub mod config;
pub mod context;
pub mod oracle;
pub mod retry;
pub mod state_machine;
pub mod task;

pub use agent::{Agent, AgentCallRequest, AgentEnv, PendingWait, StepOutcome, StepReport};
pub use config::{
    AgentConfig, Catalog, ParamKind, ParamSpec, PromptTemplate, StateMachineSpec, StatePattern,
    StateSpec, TaskSpec, ToolFailurePolicy, TransitionSpec, Trigger,
};
pub use oracle::{FnOracle, Oracle, OracleReply, OracleRequest, ScriptedOracle, ToolRequest};
pub use retry::RetryPolicy;
pub use state_machine::StateMachine;
