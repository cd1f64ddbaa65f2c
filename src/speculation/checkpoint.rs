//! Point-in-time snapshots of a speculative state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::object::TrackedObject;

use super::mutation::Mutation;
use super::tree::NodeId;

/// Stable identifier for a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointId(Uuid);

impl CheckpointId {
    /// Create a new random checkpoint ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Copy of a speculative state and its mutation log.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub id: CheckpointId,
    /// Node whose frame was snapshotted.
    pub node: NodeId,
    pub state: TrackedObject,
    pub mutations: Vec<Mutation>,
    pub created_at: DateTime<Utc>,
}

/// Checkpoints taken during one top-level speculation, in creation order.
#[derive(Debug, Default)]
pub(crate) struct CheckpointTable {
    entries: Vec<Checkpoint>,
}

impl CheckpointTable {
    pub(crate) fn insert(&mut self, node: NodeId, state: TrackedObject, mutations: Vec<Mutation>) -> CheckpointId {
        let id = CheckpointId::new();
        self.entries.push(Checkpoint {
            id,
            node,
            state,
            mutations,
            created_at: Utc::now(),
        });
        id
    }

    pub(crate) fn get(&self, id: CheckpointId) -> Option<&Checkpoint> {
        self.entries.iter().find(|c| c.id == id)
    }

    pub(crate) fn ids(&self) -> Vec<CheckpointId> {
        self.entries.iter().map(|c| c.id).collect()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
