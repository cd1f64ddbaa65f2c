//! Transaction journaling.
//!
//! Mutations made through a `TransactionScope` apply to the target immediately
//! and are appended to a reversible journal. `commit` keeps them and drops the
//! journal; `rollback` replays the journal backwards.
//!
//! Nested `run_in_transaction` calls share the outer journal (a rollback always
//! undoes the whole transaction). Partial rollback is opt-in through
//! `TransactionScope::savepoint` / `TransactionScope::rollback_to`.

pub mod engine;
pub mod journal;
pub mod options;

pub use engine::{TransactionEngine, TransactionScope};
pub use journal::{Journal, JournalEntry, JournalKind, Savepoint};
pub use options::TransactionOptions;
