use crate::access::AccessPolicy;
use braid_core::{AgentId, BraidError, BraidResult};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
struct Namespace {
    policy: AccessPolicy,
    data: BTreeMap<String, Value>,
}

/// Named, access-controlled key/value regions shared by the agents of a session.
///
/// The store is the only mutable resource touched by more than one agent.
/// Plain `get` followed by `set` is racy across rounds; tools that need
/// read-then-write correctness use [`compare_and_set`](Self::compare_and_set)
/// or [`mutate`](Self::mutate), which hold the write lock for the whole update.
pub struct NamespaceStore {
    namespaces: RwLock<BTreeMap<String, Namespace>>,
}

impl NamespaceStore {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(BTreeMap::new()),
        }
    }

    /// Creates an empty namespace. Fails if the name is taken.
    pub async fn create_namespace(&self, name: &str, open_access: bool) -> BraidResult<()> {
        let mut namespaces = self.namespaces.write().await;
        if namespaces.contains_key(name) {
            return Err(BraidError::InvalidState(format!(
                "namespace '{name}' already exists"
            )));
        }
        let policy = if open_access {
            AccessPolicy::open()
        } else {
            AccessPolicy::restricted()
        };
        namespaces.insert(
            name.to_string(),
            Namespace {
                policy,
                data: BTreeMap::new(),
            },
        );
        info!(namespace = %name, open_access, "Created namespace");
        Ok(())
    }

    pub async fn grant_access(&self, name: &str, agent: AgentId) -> BraidResult<()> {
        let mut namespaces = self.namespaces.write().await;
        let ns = namespace_mut(&mut namespaces, name)?;
        ns.policy.grant(agent);
        info!(namespace = %name, agent = %agent, "Granted namespace access");
        Ok(())
    }

    pub async fn revoke_access(&self, name: &str, agent: AgentId) -> BraidResult<()> {
        let mut namespaces = self.namespaces.write().await;
        let ns = namespace_mut(&mut namespaces, name)?;
        ns.policy.revoke(&agent);
        info!(namespace = %name, agent = %agent, "Revoked namespace access");
        Ok(())
    }

    pub async fn get(
        &self,
        name: &str,
        key: &str,
        requester: AgentId,
    ) -> BraidResult<Option<Value>> {
        let namespaces = self.namespaces.read().await;
        let ns = authorized(&namespaces, name, requester)?;
        Ok(ns.data.get(key).cloned())
    }

    /// Writes `value` under `key` and returns the previous value.
    pub async fn set(
        &self,
        name: &str,
        key: &str,
        value: Value,
        requester: AgentId,
    ) -> BraidResult<Option<Value>> {
        let mut namespaces = self.namespaces.write().await;
        let ns = authorized_mut(&mut namespaces, name, requester)?;
        Ok(ns.data.insert(key.to_string(), value))
    }

    /// Writes `new` only if the current value equals `expected`
    /// (`None` meaning the key is absent). Returns whether the write happened.
    pub async fn compare_and_set(
        &self,
        name: &str,
        key: &str,
        expected: Option<&Value>,
        new: Value,
        requester: AgentId,
    ) -> BraidResult<bool> {
        let mut namespaces = self.namespaces.write().await;
        let ns = authorized_mut(&mut namespaces, name, requester)?;
        if ns.data.get(key) != expected {
            return Ok(false);
        }
        ns.data.insert(key.to_string(), new);
        Ok(true)
    }

    /// Atomically replaces the value under `key` with `f(current)`.
    /// Returning `None` removes the key. Returns the value now stored.
    pub async fn mutate<F>(
        &self,
        name: &str,
        key: &str,
        requester: AgentId,
        f: F,
    ) -> BraidResult<Option<Value>>
    where
        F: FnOnce(Option<&Value>) -> Option<Value> + Send,
    {
        let mut namespaces = self.namespaces.write().await;
        let ns = authorized_mut(&mut namespaces, name, requester)?;
        match f(ns.data.get(key)) {
            Some(value) => {
                ns.data.insert(key.to_string(), value.clone());
                Ok(Some(value))
            }
            None => {
                ns.data.remove(key);
                Ok(None)
            }
        }
    }

    pub async fn remove(
        &self,
        name: &str,
        key: &str,
        requester: AgentId,
    ) -> BraidResult<Option<Value>> {
        let mut namespaces = self.namespaces.write().await;
        let ns = authorized_mut(&mut namespaces, name, requester)?;
        Ok(ns.data.remove(key))
    }

    /// A copy of every key/value pair in the namespace, in key order.
    pub async fn snapshot(
        &self,
        name: &str,
        requester: AgentId,
    ) -> BraidResult<BTreeMap<String, Value>> {
        let namespaces = self.namespaces.read().await;
        let ns = authorized(&namespaces, name, requester)?;
        Ok(ns.data.clone())
    }

    /// Subset match: every key of `pattern` is present with an equal value.
    pub async fn matches(
        &self,
        name: &str,
        requester: AgentId,
        pattern: &BTreeMap<String, Value>,
    ) -> BraidResult<bool> {
        let namespaces = self.namespaces.read().await;
        let ns = authorized(&namespaces, name, requester)?;
        Ok(pattern
            .iter()
            .all(|(key, expected)| ns.data.get(key) == Some(expected)))
    }

    pub async fn namespace_names(&self) -> Vec<String> {
        self.namespaces.read().await.keys().cloned().collect()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.namespaces.read().await.contains_key(name)
    }
}

impl Default for NamespaceStore {
    fn default() -> Self {
        Self::new()
    }
}

fn namespace_mut<'a>(
    namespaces: &'a mut BTreeMap<String, Namespace>,
    name: &str,
) -> BraidResult<&'a mut Namespace> {
    namespaces
        .get_mut(name)
        .ok_or_else(|| BraidError::UnknownNamespace(name.to_string()))
}

fn authorized<'a>(
    namespaces: &'a BTreeMap<String, Namespace>,
    name: &str,
    requester: AgentId,
) -> BraidResult<&'a Namespace> {
    let ns = namespaces
        .get(name)
        .ok_or_else(|| BraidError::UnknownNamespace(name.to_string()))?;
    if !ns.policy.permits(&requester) {
        warn!(namespace = %name, agent = %requester, "Namespace access denied");
        return Err(BraidError::AccessDenied {
            namespace: name.to_string(),
            agent: requester,
        });
    }
    Ok(ns)
}

fn authorized_mut<'a>(
    namespaces: &'a mut BTreeMap<String, Namespace>,
    name: &str,
    requester: AgentId,
) -> BraidResult<&'a mut Namespace> {
    authorized(namespaces, name, requester)?;
    namespace_mut(namespaces, name)
}
