//! Speculative (counterfactual) execution.
//!
//! Key invariants:
//! - While a speculation is active, reads and writes resolve against an
//!   isolated copy of the tracked object; the real object is never touched.
//! - The real object changes only through `SpeculativeEngine::commit`.
//! - A nested speculation copies its parent's current state and unwinds back to
//!   the parent when its callback returns, whatever the outcome.

pub mod changeset;
pub mod checkpoint;
pub mod engine;
pub mod mutation;
pub mod options;
pub mod tree;

pub use changeset::{ChangeSet, Modification};
pub use checkpoint::{Checkpoint, CheckpointId};
pub use engine::{SpeculationScope, SpeculativeEngine};
pub use mutation::{Mutation, MutationKind};
pub use options::{InvocationPolicy, SpeculationOptions};
pub use tree::{ExecutionNode, ExecutionTree, NodeId, NodeStatus, RecordOutcome, SpeculationRecord};
