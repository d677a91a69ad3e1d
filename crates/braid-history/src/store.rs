use crate::stack::BranchRecord;
use braid_core::{AgentId, BraidError, BraidResult, Interaction};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// AgentHistory
// ---------------------------------------------------------------------------

/// Everything persisted for one agent, in write order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentHistory {
    pub branches: Vec<BranchRecord>,
    pub interactions: Vec<Interaction>,
}

impl AgentHistory {
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty() && self.interactions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// InteractionStore trait
// ---------------------------------------------------------------------------

/// Append-only persistence for agent histories.
///
/// Implementations must give read-committed visibility: `load` never returns
/// a half-written interaction.
#[async_trait]
pub trait InteractionStore: Send + Sync {
    async fn record_branch(&self, agent_id: AgentId, branch: &BranchRecord) -> BraidResult<()>;
    async fn append(&self, agent_id: AgentId, interaction: &Interaction) -> BraidResult<()>;
    async fn load(&self, agent_id: AgentId) -> BraidResult<AgentHistory>;
    async fn agents(&self) -> BraidResult<Vec<AgentId>>;
}

// ---------------------------------------------------------------------------
// InMemoryInteractionStore
// ---------------------------------------------------------------------------

/// Store that keeps histories in process memory. Used by tests and by
/// sessions that do not need durability.
pub struct InMemoryInteractionStore {
    histories: RwLock<HashMap<AgentId, AgentHistory>>,
}

impl InMemoryInteractionStore {
    pub fn new() -> Self {
        Self {
            histories: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryInteractionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InteractionStore for InMemoryInteractionStore {
    async fn record_branch(&self, agent_id: AgentId, branch: &BranchRecord) -> BraidResult<()> {
        let mut histories = self.histories.write().await;
        histories
            .entry(agent_id)
            .or_default()
            .branches
            .push(branch.clone());
        Ok(())
    }

    async fn append(&self, agent_id: AgentId, interaction: &Interaction) -> BraidResult<()> {
        let mut histories = self.histories.write().await;
        histories
            .entry(agent_id)
            .or_default()
            .interactions
            .push(interaction.clone());
        Ok(())
    }

    async fn load(&self, agent_id: AgentId) -> BraidResult<AgentHistory> {
        let histories = self.histories.read().await;
        Ok(histories.get(&agent_id).cloned().unwrap_or_default())
    }

    async fn agents(&self) -> BraidResult<Vec<AgentId>> {
        let histories = self.histories.read().await;
        let mut ids: Vec<AgentId> = histories.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// FileInteractionStore
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum LogRecord {
    Branch(BranchRecord),
    Interaction(Interaction),
}

/// One JSONL file per agent. Each record is written as a whole line and
/// flushed; a trailing line with no newline is an in-flight write and is
/// skipped by `load`.
pub struct FileInteractionStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileInteractionStore {
    pub async fn new(dir: PathBuf) -> BraidResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn history_path(&self, agent_id: AgentId) -> PathBuf {
        self.dir.join(format!("{agent_id}.history.jsonl"))
    }

    async fn write_record(&self, agent_id: AgentId, record: &LogRecord) -> BraidResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_path(agent_id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl InteractionStore for FileInteractionStore {
    async fn record_branch(&self, agent_id: AgentId, branch: &BranchRecord) -> BraidResult<()> {
        self.write_record(agent_id, &LogRecord::Branch(branch.clone()))
            .await
    }

    async fn append(&self, agent_id: AgentId, interaction: &Interaction) -> BraidResult<()> {
        self.write_record(agent_id, &LogRecord::Interaction(interaction.clone()))
            .await
    }

    async fn load(&self, agent_id: AgentId) -> BraidResult<AgentHistory> {
        let path = self.history_path(agent_id);
        if !path.exists() {
            return Ok(AgentHistory::default());
        }
        let data = tokio::fs::read_to_string(&path).await?;

        let mut lines: Vec<&str> = data.split('\n').collect();
        // Whatever follows the last newline has not been committed yet.
        lines.pop();

        let mut history = AgentHistory::default();
        for (number, line) in lines.into_iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: LogRecord = serde_json::from_str(line).map_err(|e| {
                BraidError::Persistence(format!(
                    "corrupt record at {}:{}: {e}",
                    path.display(),
                    number + 1
                ))
            })?;
            match record {
                LogRecord::Branch(branch) => history.branches.push(branch),
                LogRecord::Interaction(interaction) => history.interactions.push(interaction),
            }
        }
        Ok(history)
    }

    async fn agents(&self) -> BraidResult<Vec<AgentId>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".history.jsonl") {
                    if let Ok(id) = Uuid::parse_str(stem) {
                        ids.push(AgentId(id));
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::InteractionStack;
    use braid_core::{BranchId, InteractionPayload};
    use tempfile::TempDir;

    fn sample_stack() -> InteractionStack {
        let mut stack = InteractionStack::new();
        stack
            .push(
                BranchId::MAIN,
                InteractionPayload::AskHuman {
                    call_id: None,
                    prompt: "name?".into(),
                },
            )
            .unwrap();
        stack
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = InMemoryInteractionStore::new();
        let agent = AgentId::new();
        let stack = sample_stack();

        store
            .record_branch(agent, &stack.branch_record(BranchId::MAIN).unwrap())
            .await
            .unwrap();
        store.append(agent, &stack.interactions()[0]).await.unwrap();

        let history = store.load(agent).await.unwrap();
        assert_eq!(history.branches.len(), 1);
        assert_eq!(history.interactions, stack.interactions());
        assert_eq!(store.agents().await.unwrap(), vec![agent]);
    }

    #[tokio::test]
    async fn missing_history_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = FileInteractionStore::new(tmp.path().to_path_buf())
            .await
            .unwrap();
        assert!(store.load(AgentId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_store_ignores_uncommitted_tail() {
        let tmp = TempDir::new().unwrap();
        let store = FileInteractionStore::new(tmp.path().to_path_buf())
            .await
            .unwrap();
        let agent = AgentId::new();
        let stack = sample_stack();
        store.append(agent, &stack.interactions()[0]).await.unwrap();

        // Simulate a writer that has not finished its line yet.
        let path = tmp.path().join(format!("{agent}.history.jsonl"));
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap();
        file.write_all(b"{\"record\":\"interaction\",\"id\":").await.unwrap();
        file.flush().await.unwrap();

        let history = store.load(agent).await.unwrap();
        assert_eq!(history.interactions.len(), 1);
    }

    #[tokio::test]
    async fn file_persistence_across_store_instances() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        let agent = AgentId::new();
        let mut stack = sample_stack();
        let alt = stack.create_branch("alt", BranchId::MAIN, None).unwrap();

        {
            let store = FileInteractionStore::new(dir.clone()).await.unwrap();
            store.append(agent, &stack.interactions()[0]).await.unwrap();
            store
                .record_branch(agent, &stack.branch_record(alt).unwrap())
                .await
                .unwrap();
        }

        let store2 = FileInteractionStore::new(dir).await.unwrap();
        let history = store2.load(agent).await.unwrap();
        assert_eq!(history.branches.len(), 1);
        assert_eq!(history.branches[0].name, "alt");
        assert_eq!(history.interactions, stack.interactions());
        assert_eq!(store2.agents().await.unwrap(), vec![agent]);
    }
}
