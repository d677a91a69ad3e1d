pub mod registry;
pub mod tool;

pub use registry::ToolRegistry;
pub use tool::{AgentCall, Tool, ToolContext, ToolDescriptor, ToolOutcome, ToolResponse};
