//! Branch-aware interaction history and its persistence.
//!
//! - [`InteractionStack`] — append-only arena of interactions with per-branch
//!   index lists and frozen fork points.
//! - [`InteractionStore`] — persistence seam; [`InMemoryInteractionStore`] and
//!   the JSONL-backed [`FileInteractionStore`] implement it.

pub mod stack;
pub mod store;

pub use stack::{BranchRecord, ForkPoint, InteractionStack};
pub use store::{AgentHistory, FileInteractionStore, InMemoryInteractionStore, InteractionStore};
