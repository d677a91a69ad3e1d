use braid_core::{AgentId, AgentStatus, BraidError, BraidResult, InteractionId};
use serde::{Deserialize, Serialize};

/// Session-wide limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Caps every agent's step budget below its config's `max_steps`.
    #[serde(default)]
    pub max_steps_per_agent: Option<u32>,
    /// Rounds a single `run` may take before giving up.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u64,
    /// Deepest allowed agent in the spawn tree (roots are depth 0).
    #[serde(default = "default_max_spawn_depth")]
    pub max_spawn_depth: u32,
    /// Direct children one agent may spawn.
    #[serde(default = "default_max_children")]
    pub max_children_per_agent: u32,
}

fn default_max_rounds() -> u64 {
    1_000
}

fn default_max_spawn_depth() -> u32 {
    3
}

fn default_max_children() -> u32 {
    5
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_steps_per_agent: None,
            max_rounds: default_max_rounds(),
            max_spawn_depth: default_max_spawn_depth(),
            max_children_per_agent: default_max_children(),
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(source: &str) -> BraidResult<Self> {
        toml::from_str(source)
            .map_err(|e| BraidError::Config(format!("Invalid session config: {e}")))
    }
}

/// An open question from an agent to a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanRequest {
    pub agent_id: AgentId,
    pub request_id: InteractionId,
    pub prompt: String,
}

/// Per-agent counters collected by the monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub steps: u64,
    pub oracle_calls: u64,
    pub tool_calls: u64,
    pub tool_errors: u64,
    pub children_spawned: u64,
}

/// Where an agent stands at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: AgentId,
    pub status: AgentStatus,
    pub parent: Option<AgentId>,
    pub depth: u32,
    pub task: Option<String>,
    pub result: Option<String>,
}

/// What one scheduler round did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub round: u64,
    /// Agents stepped in the step phase.
    pub stepped: usize,
    /// Suspended agents resumed in the resolution phase.
    pub resolved: usize,
    /// Agents still counting down a tick wait.
    pub ticking: usize,
}

impl RoundReport {
    /// Nothing happened and nothing will without outside input.
    pub fn is_idle(&self) -> bool {
        self.stepped == 0 && self.resolved == 0 && self.ticking == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub rounds: u64,
    /// Every agent reached FINISHED, FAILED or STOPPED.
    pub all_terminal: bool,
    /// The run ended because only outside input (humans, signals) can make progress.
    pub blocked: bool,
    pub agents: Vec<AgentSummary>,
}
