//! Access-controlled shared state for inter-agent coordination.
//!
//! # Main types
//!
//! - [`NamespaceStore`] — Named key/value regions shared by the agents of a session.
//! - [`AccessPolicy`] — Who may read and write one namespace.

/// Per-namespace access policy.
pub mod access;
/// Namespace store and its atomic update primitives.
pub mod namespace;

pub use access::AccessPolicy;
pub use namespace::NamespaceStore;
