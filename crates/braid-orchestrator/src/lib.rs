//! Session scheduling for Braid agents.
//!
//! A [`Session`] owns a set of agents, the shared namespace store and the
//! history store, and advances every agent one step per round in a fixed
//! order so that a run can be replayed exactly from persisted history.
//!
//! # Main types
//!
//! - [`Session`] — Cooperative round-based scheduler and external input surface.
//! - [`SubAgentSpawner`] — Spawn-tree bookkeeping with depth and fan-out limits.
//! - [`AgentMonitor`] — Per-agent step, oracle and tool counters.
//! - [`SessionConfig`] — Session-wide limits, loadable from TOML.

/// Session scheduler.
pub mod engine;
/// Per-agent metrics.
pub mod monitor;
/// Sub-agent spawn limits.
pub mod spawner;
/// Session configuration and reports.
pub mod types;

pub use engine::Session;
pub use monitor::AgentMonitor;
pub use spawner::SubAgentSpawner;
pub use types::{
    AgentMetrics, AgentSummary, HumanRequest, RoundReport, RunReport, SessionConfig,
};
