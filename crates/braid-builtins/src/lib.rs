//! Built-in tools for braid agents.
//!
//! Covers shared-state access, child agent delegation, human input,
//! wait conditions and explicit task completion.
//!
//! # Main entry points
//!
//! - [`register_builtins()`] — Register every built-in tool.

/// Child agent delegation.
pub mod agent_delegate;
/// Human input requests.
pub mod ask_human;
/// Explicit task completion.
pub mod complete_task;
/// Namespace get, set and compare-and-set.
pub mod shared_state;
/// Tick and signal waits.
pub mod wait;

pub use agent_delegate::SpawnAgentTool;
pub use ask_human::AskHumanTool;
pub use complete_task::CompleteTaskTool;
pub use shared_state::{SharedStateCasTool, SharedStateGetTool, SharedStateSetTool};
pub use wait::{WaitSignalTool, WaitTicksTool};

use braid_tools::ToolRegistry;
use std::sync::Arc;

/// Register all built-in tools into the given registry.
pub fn register_builtins(registry: &mut ToolRegistry) {
    registry.register(Arc::new(SharedStateGetTool::new()));
    registry.register(Arc::new(SharedStateSetTool::new()));
    registry.register(Arc::new(SharedStateCasTool::new()));
    registry.register(Arc::new(SpawnAgentTool::new()));
    registry.register(Arc::new(AskHumanTool::new()));
    registry.register(Arc::new(CompleteTaskTool::new()));
    registry.register(Arc::new(WaitTicksTool::new()));
    registry.register(Arc::new(WaitSignalTool::new()));
}
