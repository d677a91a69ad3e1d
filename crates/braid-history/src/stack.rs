use braid_core::{
    BraidError, BraidResult, BranchId, Interaction, InteractionId, InteractionPayload,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Where a branch was forked from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkPoint {
    /// Branch the fork was taken from.
    pub parent: BranchId,
    /// Number of the parent's visible interactions inherited by the fork.
    pub index: usize,
}

/// Registration record of one branch, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub id: BranchId,
    pub name: String,
    pub fork: Option<ForkPoint>,
}

#[derive(Debug, Clone)]
struct Branch {
    name: String,
    fork: Option<ForkPoint>,
    entries: Vec<InteractionId>,
}

/// Append-only, branchable log of one agent's history.
///
/// Interactions live in an arena indexed by [`InteractionId`]; each branch
/// holds only the ids it appended itself plus the point it was forked from.
/// The prefix a branch inherits is resolved through its ancestors, so entries
/// appended to a parent after the fork point are never visible to the child.
#[derive(Debug, Clone)]
pub struct InteractionStack {
    arena: Vec<Interaction>,
    branches: BTreeMap<BranchId, Branch>,
    next_branch: u32,
}

impl InteractionStack {
    /// Creates a stack holding only the empty `main` branch.
    pub fn new() -> Self {
        let mut branches = BTreeMap::new();
        branches.insert(
            BranchId::MAIN,
            Branch {
                name: "main".to_string(),
                fork: None,
                entries: Vec::new(),
            },
        );
        Self {
            arena: Vec::new(),
            branches,
            next_branch: 1,
        }
    }

    /// Rebuilds a stack from persisted branch records and interactions.
    ///
    /// Records must arrive in registration order and interactions in arena
    /// order; anything else is reported as a persistence error.
    pub fn from_records(
        branches: &[BranchRecord],
        interactions: Vec<Interaction>,
    ) -> BraidResult<Self> {
        let mut stack = Self::new();
        for record in branches {
            if record.id == BranchId::MAIN {
                continue;
            }
            if let Some(fork) = record.fork {
                stack.branch(fork.parent)?;
            }
            stack.branches.insert(
                record.id,
                Branch {
                    name: record.name.clone(),
                    fork: record.fork,
                    entries: Vec::new(),
                },
            );
            stack.next_branch = stack.next_branch.max(record.id.0 + 1);
        }

        for interaction in interactions {
            let expected = stack.arena.len() as u64;
            if interaction.id.0 != expected {
                return Err(BraidError::Persistence(format!(
                    "interaction {} found where {} was expected",
                    interaction.id,
                    InteractionId(expected)
                )));
            }
            let visible = stack.len(interaction.branch_id)?;
            if interaction.sequence_index != visible {
                return Err(BraidError::Persistence(format!(
                    "interaction {} has sequence index {} but branch {} is at {}",
                    interaction.id, interaction.sequence_index, interaction.branch_id, visible
                )));
            }
            stack.branch_mut(interaction.branch_id)?.entries.push(interaction.id);
            stack.arena.push(interaction);
        }

        Ok(stack)
    }

    /// Appends a new interaction to `branch_id` and returns it.
    ///
    /// The causal parent is the branch's current tip.
    pub fn push(
        &mut self,
        branch_id: BranchId,
        payload: InteractionPayload,
    ) -> BraidResult<&Interaction> {
        let sequence_index = self.len(branch_id)?;
        let causal_parent_id = self.tip(branch_id)?;
        let id = InteractionId(self.arena.len() as u64);

        debug!(
            branch = %branch_id,
            interaction = %id,
            kind = ?payload.kind(),
            "Appending interaction"
        );

        self.branch_mut(branch_id)?.entries.push(id);
        self.arena.push(Interaction {
            id,
            branch_id,
            sequence_index,
            causal_parent_id,
            timestamp: Utc::now(),
            payload,
        });
        Ok(&self.arena[self.arena.len() - 1])
    }

    /// Registers a branch forked from `from_branch_id`.
    ///
    /// The fork inherits the first `from_index` visible interactions of the
    /// source branch, defaulting to all of them (the current tip).
    pub fn create_branch(
        &mut self,
        name: impl Into<String>,
        from_branch_id: BranchId,
        from_index: Option<usize>,
    ) -> BraidResult<BranchId> {
        let len = self.len(from_branch_id)?;
        let index = from_index.unwrap_or(len);
        if index > len {
            return Err(BraidError::IndexOutOfRange {
                branch: from_branch_id,
                index,
                len,
            });
        }

        let id = BranchId(self.next_branch);
        self.next_branch += 1;
        let name = name.into();
        debug!(branch = %id, name = %name, parent = %from_branch_id, index, "Created branch");
        self.branches.insert(
            id,
            Branch {
                name,
                fork: Some(ForkPoint {
                    parent: from_branch_id,
                    index,
                }),
                entries: Vec::new(),
            },
        );
        Ok(id)
    }

    /// The ordered interaction sequence visible to `branch_id`.
    pub fn get_context(&self, branch_id: BranchId) -> BraidResult<Vec<&Interaction>> {
        let ids = self.context_ids(branch_id)?;
        Ok(ids.into_iter().map(|id| &self.arena[id.0 as usize]).collect())
    }

    fn context_ids(&self, branch_id: BranchId) -> BraidResult<Vec<InteractionId>> {
        // Walk up to the root, then replay prefixes top-down.
        let mut chain = Vec::new();
        let mut current = branch_id;
        loop {
            let branch = self.branch(current)?;
            chain.push(current);
            match branch.fork {
                Some(fork) => current = fork.parent,
                None => break,
            }
        }

        let mut ids: Vec<InteractionId> = Vec::new();
        for (depth, id) in chain.iter().enumerate().rev() {
            let branch = self.branch(*id)?;
            // The child below this ancestor decides how much of it is visible.
            let limit = if depth == 0 {
                None
            } else {
                self.branch(chain[depth - 1])?.fork.map(|f| f.index)
            };
            ids.extend(branch.entries.iter().copied());
            if let Some(limit) = limit {
                ids.truncate(limit);
            }
        }
        Ok(ids)
    }

    /// Number of interactions visible to `branch_id`.
    pub fn len(&self, branch_id: BranchId) -> BraidResult<usize> {
        let branch = self.branch(branch_id)?;
        let own = branch.entries.len();
        Ok(match branch.fork {
            Some(fork) => fork.index + own,
            None => own,
        })
    }

    /// Whether the branch sees no interactions at all.
    pub fn is_empty(&self, branch_id: BranchId) -> BraidResult<bool> {
        Ok(self.len(branch_id)? == 0)
    }

    /// Id of the last interaction visible to `branch_id`.
    pub fn tip(&self, branch_id: BranchId) -> BraidResult<Option<InteractionId>> {
        let branch = self.branch(branch_id)?;
        if let Some(last) = branch.entries.last() {
            return Ok(Some(*last));
        }
        match branch.fork {
            Some(fork) if fork.index > 0 => {
                let parent_ctx = self.context_ids(fork.parent)?;
                Ok(parent_ctx.get(fork.index - 1).copied())
            }
            _ => Ok(None),
        }
    }

    /// The last interaction visible to `branch_id`.
    pub fn top(&self, branch_id: BranchId) -> BraidResult<Option<&Interaction>> {
        Ok(self.tip(branch_id)?.map(|id| &self.arena[id.0 as usize]))
    }

    /// Looks up an interaction by id.
    pub fn get(&self, id: InteractionId) -> Option<&Interaction> {
        self.arena.get(id.0 as usize)
    }

    /// Every interaction ever appended, in arena order.
    pub fn interactions(&self) -> &[Interaction] {
        &self.arena
    }

    /// Registration records of all branches, in id order.
    pub fn branch_records(&self) -> Vec<BranchRecord> {
        self.branches
            .iter()
            .map(|(id, b)| BranchRecord {
                id: *id,
                name: b.name.clone(),
                fork: b.fork,
            })
            .collect()
    }

    /// Registration record of one branch.
    pub fn branch_record(&self, branch_id: BranchId) -> BraidResult<BranchRecord> {
        let branch = self.branch(branch_id)?;
        Ok(BranchRecord {
            id: branch_id,
            name: branch.name.clone(),
            fork: branch.fork,
        })
    }

    /// Where `branch_id` was forked from, if it is not a root branch.
    pub fn fork_point(&self, branch_id: BranchId) -> BraidResult<Option<ForkPoint>> {
        Ok(self.branch(branch_id)?.fork)
    }

    /// Finds a branch by name.
    pub fn branch_by_name(&self, name: &str) -> Option<BranchId> {
        self.branches
            .iter()
            .find(|(_, b)| b.name == name)
            .map(|(id, _)| *id)
    }

    /// Whether `branch_id` has been registered.
    pub fn has_branch(&self, branch_id: BranchId) -> bool {
        self.branches.contains_key(&branch_id)
    }

    fn branch(&self, branch_id: BranchId) -> BraidResult<&Branch> {
        self.branches
            .get(&branch_id)
            .ok_or(BraidError::UnknownBranch(branch_id))
    }

    fn branch_mut(&mut self, branch_id: BranchId) -> BraidResult<&mut Branch> {
        self.branches
            .get_mut(&branch_id)
            .ok_or(BraidError::UnknownBranch(branch_id))
    }
}

impl Default for InteractionStack {
    fn default() -> Self {
        Self::new()
    }
}
