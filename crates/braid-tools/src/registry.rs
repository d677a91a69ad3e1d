use crate::tool::{Tool, ToolContext, ToolDescriptor, ToolOutcome, ToolResponse};
use braid_core::{BraidError, BraidResult, ToolCall};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Central registry for all tools known to a session.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name.clone();
        info!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Descriptors for `names`, in the given order. Unknown names are skipped.
    pub fn descriptors_for(&self, names: &[String]) -> Vec<ToolDescriptor> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.descriptor().clone())
            .collect()
    }

    pub fn list_descriptors(&self) -> Vec<&ToolDescriptor> {
        let mut descriptors: Vec<&ToolDescriptor> =
            self.tools.values().map(|t| t.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Invoke a tool call, checking it is part of the active tool set first.
    pub async fn invoke(
        &self,
        ctx: &ToolContext,
        call: &ToolCall,
        active_tools: &[String],
    ) -> BraidResult<ToolOutcome> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| BraidError::Tool(format!("Unknown tool: {}", call.name)))?;

        if !active_tools.iter().any(|t| t == &call.name) {
            warn!(
                tool = %call.name,
                agent = %ctx.agent_id,
                "Tool not available in the active config"
            );
            return Ok(ToolResponse::error(format!(
                "Tool '{}' is not available in the current config",
                call.name
            ))
            .into());
        }

        tool.invoke(ctx, call).await
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
