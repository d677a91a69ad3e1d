use braid_core::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    open_access: bool,
    granted: BTreeSet<AgentId>,
}

impl AccessPolicy {
    /// Any agent may access the namespace.
    pub fn open() -> Self {
        Self {
            open_access: true,
            granted: BTreeSet::new(),
        }
    }

    /// Only explicitly granted agents may access the namespace.
    pub fn restricted() -> Self {
        Self::default()
    }

    pub fn grant(&mut self, agent: AgentId) {
        self.granted.insert(agent);
    }

    pub fn revoke(&mut self, agent: &AgentId) {
        self.granted.remove(agent);
    }

    pub fn permits(&self, agent: &AgentId) -> bool {
        self.open_access || self.granted.contains(agent)
    }

    pub fn is_open(&self) -> bool {
        self.open_access
    }

    pub fn granted(&self) -> impl Iterator<Item = &AgentId> {
        self.granted.iter()
    }
}
