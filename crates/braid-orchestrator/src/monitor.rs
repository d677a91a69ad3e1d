use crate::types::AgentMetrics;
use braid_agent::{StepOutcome, StepReport};
use braid_core::AgentId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-agent counters for a running session.
///
/// Cloned handles share the same table, so a reader can watch a session
/// that is being stepped elsewhere.
#[derive(Clone)]
pub struct AgentMonitor {
    metrics: Arc<RwLock<HashMap<AgentId, AgentMetrics>>>,
}

impl AgentMonitor {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, id: AgentId) {
        self.metrics.write().await.entry(id).or_default();
    }

    /// Folds one step report into the agent's counters.
    pub async fn record_step(&self, id: AgentId, report: &StepReport) {
        let mut metrics = self.metrics.write().await;
        let entry = metrics.entry(id).or_default();
        entry.steps += 1;
        entry.oracle_calls += u64::from(report.oracle_calls);
        entry.tool_calls += report.tools_executed.len() as u64;
        entry.tool_errors += u64::from(report.tool_errors);
    }

    /// Counts a child the session actually created for `parent`.
    pub async fn record_spawn(&self, parent: AgentId) {
        self.metrics
            .write()
            .await
            .entry(parent)
            .or_default()
            .children_spawned += 1;
    }

    pub async fn get(&self, id: AgentId) -> Option<AgentMetrics> {
        self.metrics.read().await.get(&id).cloned()
    }

    pub async fn snapshot(&self) -> HashMap<AgentId, AgentMetrics> {
        self.metrics.read().await.clone()
    }

    /// Sum of every agent's counters.
    pub async fn aggregate(&self) -> AgentMetrics {
        let metrics = self.metrics.read().await;
        metrics.values().fold(AgentMetrics::default(), |mut total, m| {
            total.steps += m.steps;
            total.oracle_calls += m.oracle_calls;
            total.tool_calls += m.tool_calls;
            total.tool_errors += m.tool_errors;
            total.children_spawned += m.children_spawned;
            total
        })
    }

    pub async fn to_json(&self) -> serde_json::Value {
        let metrics = self.metrics.read().await;
        let agents: serde_json::Map<String, serde_json::Value> = metrics
            .iter()
            .map(|(id, m)| {
                (
                    id.to_string(),
                    serde_json::to_value(m).unwrap_or(serde_json::Value::Null),
                )
            })
            .collect();
        serde_json::json!({ "agents": agents })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a step did any work worth counting.
pub(crate) fn is_productive(report: &StepReport) -> bool {
    !matches!(report.outcome, StepOutcome::Idle)
}
