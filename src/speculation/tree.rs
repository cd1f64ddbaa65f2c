//! Execution tree: one node per speculation, kept for the engine's lifetime.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::Value;

use super::mutation::Mutation;

/// Index of a node in its `ExecutionTree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Completed,
    Error,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordOutcome {
    Completed { result: Value },
    Failed { error: String },
}

/// Result of one callback run under a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeculationRecord {
    pub mutations: Vec<Mutation>,
    pub outcome: RecordOutcome,
    pub timestamp: DateTime<Utc>,
}

impl SpeculationRecord {
    pub(crate) fn new(mutations: Vec<Mutation>, outcome: RecordOutcome) -> Self {
        Self {
            mutations,
            outcome,
            timestamp: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, RecordOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    /// 0 for a top-level speculation.
    pub depth: usize,
    pub speculations: Vec<SpeculationRecord>,
    pub status: NodeStatus,
    pub created_at: DateTime<Utc>,
}

/// Every speculation opened by an engine, top-level and nested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTree {
    /// Most recent top-level node.
    root_id: Option<NodeId>,
    current_id: Option<NodeId>,
    nodes: Vec<ExecutionNode>,
}

impl ExecutionTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn root_id(&self) -> Option<NodeId> {
        self.root_id
    }

    pub const fn current_id(&self) -> Option<NodeId> {
        self.current_id
    }

    pub fn nodes(&self) -> &[ExecutionNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&ExecutionNode> {
        usize::try_from(id.0).ok().and_then(|idx| self.nodes.get(idx))
    }

    pub fn root(&self) -> Option<&ExecutionNode> {
        self.root_id.and_then(|id| self.node(id))
    }

    pub fn current(&self) -> Option<&ExecutionNode> {
        self.current_id.and_then(|id| self.node(id))
    }

    /// Direct children of `id`, in creation order.
    pub fn children(&self, id: NodeId) -> Vec<&ExecutionNode> {
        self.nodes
            .iter()
            .filter(|node| node.parent_id == Some(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds an active node under `parent` (or a new top-level node) and makes it current.
    pub(crate) fn open(&mut self, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len() as u64);
        let depth = parent
            .and_then(|p| self.node(p))
            .map_or(0, |p| p.depth + 1);
        self.nodes.push(ExecutionNode {
            id,
            parent_id: parent,
            depth,
            speculations: Vec::new(),
            status: NodeStatus::Active,
            created_at: Utc::now(),
        });
        if parent.is_none() {
            self.root_id = Some(id);
        }
        self.current_id = Some(id);
        id
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut ExecutionNode> {
        usize::try_from(id.0).ok().and_then(|idx| self.nodes.get_mut(idx))
    }

    pub(crate) fn record(&mut self, id: NodeId, record: SpeculationRecord) {
        if let Some(node) = self.node_mut(id) {
            node.speculations.push(record);
        }
    }

    pub(crate) fn set_status(&mut self, id: NodeId, status: NodeStatus) {
        if let Some(node) = self.node_mut(id) {
            node.status = status;
        }
    }

    pub(crate) fn set_current(&mut self, id: Option<NodeId>) {
        self.current_id = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_tracks_depth_and_parent() {
        let mut tree = ExecutionTree::new();
        let root = tree.open(None);
        let child = tree.open(Some(root));
        let grandchild = tree.open(Some(child));
        let sibling = tree.open(Some(root));

        assert_eq!(tree.root_id(), Some(root));
        assert_eq!(tree.current_id(), Some(sibling));
        assert_eq!(tree.node(grandchild).unwrap().depth, 2);
        assert_eq!(tree.node(grandchild).unwrap().parent_id, Some(child));

        let children: Vec<NodeId> = tree.children(root).iter().map(|n| n.id).collect();
        assert_eq!(children, vec![child, sibling]);
    }

    #[test]
    fn test_records_and_status_updates() {
        let mut tree = ExecutionTree::new();
        let root = tree.open(None);
        tree.record(
            root,
            SpeculationRecord::new(
                Vec::new(),
                RecordOutcome::Failed {
                    error: "boom".to_string(),
                },
            ),
        );
        tree.set_status(root, NodeStatus::Error);

        let node = tree.root().unwrap();
        assert_eq!(node.status, NodeStatus::Error);
        assert!(node.speculations[0].is_failure());
    }

    #[test]
    fn test_tree_serializes() {
        let mut tree = ExecutionTree::new();
        let root = tree.open(None);
        tree.record(
            root,
            SpeculationRecord::new(Vec::new(), RecordOutcome::Completed { result: Value::Int(1) }),
        );

        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["nodes"][0]["status"], "active");
        assert_eq!(json["nodes"][0]["speculations"][0]["outcome"]["type"], "completed");

        let back: ExecutionTree = serde_json::from_value(json).unwrap();
        assert_eq!(back, tree);
    }
}
