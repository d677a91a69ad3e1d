use braid_core::{AgentId, BraidError, BraidResult};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct Lineage {
    parent: Option<AgentId>,
    depth: u32,
    children: Vec<AgentId>,
}

/// Tracks the spawn tree of a session and enforces its limits.
///
/// Roots sit at depth 0; a child is one deeper than its parent. A spawn is
/// refused when the child would exceed `max_depth` or the parent already
/// has `max_children` children.
pub struct SubAgentSpawner {
    lineage: HashMap<AgentId, Lineage>,
    max_depth: u32,
    max_children: u32,
}

impl SubAgentSpawner {
    pub fn new() -> Self {
        Self {
            lineage: HashMap::new(),
            max_depth: 3,
            max_children: 5,
        }
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_children(mut self, max: u32) -> Self {
        self.max_children = max;
        self
    }

    /// Registers an agent created directly by the session.
    pub fn register_root(&mut self, id: AgentId) {
        self.lineage.entry(id).or_insert(Lineage {
            parent: None,
            depth: 0,
            children: Vec::new(),
        });
    }

    /// Checks whether `parent` may spawn another child and returns the
    /// child's depth.
    pub fn check(&self, parent: AgentId) -> BraidResult<u32> {
        let lineage = self
            .lineage
            .get(&parent)
            .ok_or(BraidError::UnknownAgent(parent))?;
        let depth = lineage.depth + 1;
        if depth > self.max_depth {
            warn!(parent = %parent, depth, max = self.max_depth, "Spawn depth limit reached");
            return Err(BraidError::InvalidState(format!(
                "spawn depth {depth} exceeds the maximum of {}",
                self.max_depth
            )));
        }
        if lineage.children.len() as u32 >= self.max_children {
            warn!(parent = %parent, max = self.max_children, "Child limit reached");
            return Err(BraidError::InvalidState(format!(
                "agent {parent} already has the maximum of {} children",
                self.max_children
            )));
        }
        Ok(depth)
    }

    pub fn record_child(&mut self, parent: AgentId, child: AgentId) {
        let depth = match self.lineage.get_mut(&parent) {
            Some(lineage) => {
                lineage.children.push(child);
                lineage.depth + 1
            }
            None => 1,
        };
        self.lineage.insert(
            child,
            Lineage {
                parent: Some(parent),
                depth,
                children: Vec::new(),
            },
        );
        info!(parent = %parent, child = %child, depth, "Child agent registered");
    }

    pub fn children_of(&self, parent: AgentId) -> Vec<AgentId> {
        self.lineage
            .get(&parent)
            .map(|l| l.children.clone())
            .unwrap_or_default()
    }

    pub fn parent_of(&self, id: AgentId) -> Option<AgentId> {
        self.lineage.get(&id).and_then(|l| l.parent)
    }

    pub fn depth_of(&self, id: AgentId) -> u32 {
        self.lineage.get(&id).map(|l| l.depth).unwrap_or(0)
    }
}

impl Default for SubAgentSpawner {
    fn default() -> Self {
        Self::new()
    }
}
