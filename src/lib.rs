//! # membrane - operation interception with journaling and speculation
//!
//! Every interaction with a tracked object is described as an operation
//! (read, write, delete, enumerate, describe, invoke, construct) and applied
//! to a `Target`. Two engines build on that seam:
//!
//! - **Transactions** apply mutations immediately and keep a reversible
//!   journal, so the caller can commit or roll back afterwards.
//! - **Speculation** runs code against an isolated copy of the object, with
//!   nested branches, checkpoints, changesets and an execution tree.
//!
//! Interceptors sit in front of either engine through a `Membrane`.
//!
//! ## Usage
//!
//! ```rust
//! use membrane::{SpeculativeEngine, TargetExt, TrackedObject, TransactionEngine, Value};
//!
//! let mut doc = TrackedObject::from_iter([("a", Value::Int(1)), ("b", Value::Int(2))]);
//!
//! // Try a change without touching `doc`.
//! let mut spec = SpeculativeEngine::default();
//! spec.speculate(&doc, |s| s.write("a", 10).map(|_| ()))?;
//! assert_eq!(spec.change_set(&doc).len(), 1);
//! spec.abort()?;
//!
//! // Apply it for real, then undo it.
//! let mut tx = TransactionEngine::default();
//! tx.run_in_transaction(&mut doc, |t| t.write("a", 10).map(|_| ()))?;
//! tx.rollback(&mut doc)?;
//! assert_eq!(doc.get("a"), Some(&Value::Int(1)));
//! # Ok::<(), membrane::MembraneError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod context;
pub mod error;
pub mod intercept;
pub mod object;
pub mod operation;
pub mod speculation;
pub mod transaction;
pub mod value;

pub use context::{ContextStack, Scoped};
pub use error::{ExecutionError, MembraneError, MembraneResult, ValidationError};
pub use intercept::{FnInterceptor, InterceptDecision, Interceptor, Membrane, Target, TargetExt};
pub use object::{Callable, CloneDepth, FnCallable, StateDigest, TrackedObject};
pub use operation::{KeyDescription, OperationDescriptor, OperationKind, Outcome};
pub use speculation::{
    ChangeSet, CheckpointId, ExecutionTree, InvocationPolicy, Modification, Mutation, MutationKind, NodeId,
    NodeStatus, SpeculationOptions, SpeculationScope, SpeculativeEngine,
};
pub use transaction::{JournalEntry, JournalKind, Savepoint, TransactionEngine, TransactionOptions, TransactionScope};
pub use value::{RegexValue, Value};
