//! Transaction engine and the scope handed to transaction callbacks.

use std::fmt;

use crate::context::{ContextStack, Scoped};
use crate::error::{ExecutionError, MembraneError, MembraneResult};
use crate::intercept::Target;
use crate::operation::{OperationDescriptor, OperationKind, Outcome};

use super::journal::{Journal, JournalEntry, JournalKind, Savepoint};
use super::options::TransactionOptions;

/// Journals mutations so they can be committed or rolled back.
///
/// The engine is opt-in per call: only operations issued through the
/// `TransactionScope` of `run_in_transaction` are journaled. The transaction
/// stays open after the callback returns until `commit` or `rollback`.
///
/// # Examples
///
/// ```
/// use membrane::{TargetExt, TrackedObject, TransactionEngine, Value};
///
/// let mut account = TrackedObject::from_iter([("balance", Value::Int(1000))]);
/// let mut engine = TransactionEngine::default();
///
/// engine.run_in_transaction(&mut account, |tx| {
///     tx.write("balance", 500)?;
///     Ok(())
/// })?;
/// assert_eq!(account.get("balance"), Some(&Value::Int(500)));
///
/// engine.rollback(&mut account)?;
/// assert_eq!(account.get("balance"), Some(&Value::Int(1000)));
/// # Ok::<(), membrane::MembraneError>(())
/// ```
pub struct TransactionEngine {
    options: TransactionOptions,
    journal: Journal,
    active: bool,
    // Journal length at entry of each running (possibly nested) callback.
    levels: ContextStack<usize>,
}

impl TransactionEngine {
    /// Creates an engine with validated options.
    pub fn new(options: TransactionOptions) -> MembraneResult<Self> {
        options.validate().map_err(MembraneError::from)?;
        Ok(Self {
            options,
            journal: Journal::new(),
            active: false,
            levels: ContextStack::new(),
        })
    }

    pub const fn options(&self) -> TransactionOptions {
        self.options
    }

    /// Runs `f` inside a transaction over `target`.
    ///
    /// Opens a transaction if none is active; otherwise `f` joins the open one.
    /// Errors from `f` propagate unchanged and leave the transaction open with
    /// its journal intact.
    pub fn run_in_transaction<R, F>(&mut self, target: &mut dyn Target, f: F) -> MembraneResult<R>
    where
        F: FnOnce(&mut TransactionScope<'_>) -> MembraneResult<R>,
    {
        if self.active {
            tracing::debug!(entries = self.journal.len(), "joining open transaction");
        } else {
            self.active = true;
            tracing::debug!("transaction opened");
        }

        let start = self.journal.len();
        let mut scope = TransactionScope {
            journal: &mut self.journal,
            options: &self.options,
            levels: self.levels.push_scoped(start),
            target,
        };
        let result = f(&mut scope);
        drop(scope);

        if let Err(err) = &result {
            tracing::debug!(
                entries = self.journal.len(),
                error = %err,
                "transaction callback failed; journal preserved"
            );
        }
        result
    }

    /// Keeps every applied mutation and discards the journal.
    ///
    /// # Errors
    ///
    /// `NoActiveTransaction` if no transaction is open.
    pub fn commit(&mut self) -> MembraneResult<bool> {
        if !self.active {
            return Err(MembraneError::Execution(ExecutionError::NoActiveTransaction));
        }
        tracing::debug!(entries = self.journal.len(), "transaction committed");
        self.journal.reset();
        self.active = false;
        Ok(true)
    }

    /// Reverts every journaled mutation, newest first.
    ///
    /// Set entries for keys that did not exist are deleted, other set and
    /// delete entries restore the previous value. Invocations are not undone.
    /// If the target rejects an undo, the error is returned and the entries not
    /// yet reverted (including the failing one) stay in the journal.
    ///
    /// # Errors
    ///
    /// `NoActiveTransaction` if no transaction is open.
    pub fn rollback(&mut self, target: &mut dyn Target) -> MembraneResult<()> {
        if !self.active {
            return Err(MembraneError::Execution(ExecutionError::NoActiveTransaction));
        }
        let entries = self.journal.len();
        undo_until(&mut self.journal, target, 0)?;
        tracing::debug!(entries, "transaction rolled back");
        self.journal.reset();
        self.active = false;
        Ok(())
    }

    /// Owned copy of the journal, for previewing what a rollback would revert.
    pub fn dry_run(&self) -> Vec<JournalEntry> {
        self.journal.entries().to_vec()
    }

    pub fn journal(&self) -> &[JournalEntry] {
        self.journal.entries()
    }

    pub const fn is_active(&self) -> bool {
        self.active
    }
}

impl Default for TransactionEngine {
    fn default() -> Self {
        Self {
            options: TransactionOptions::default(),
            journal: Journal::new(),
            active: false,
            levels: ContextStack::new(),
        }
    }
}

impl fmt::Debug for TransactionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionEngine")
            .field("options", &self.options)
            .field("active", &self.active)
            .field("entries", &self.journal.len())
            .finish_non_exhaustive()
    }
}

fn undo_until(journal: &mut Journal, target: &mut dyn Target, position: usize) -> MembraneResult<usize> {
    let mut undone = 0;
    while journal.len() > position {
        let Some(entry) = journal.last() else {
            break;
        };
        if let Some(op) = entry.undo_operation() {
            target.apply(op)?;
        }
        journal.pop();
        undone += 1;
    }
    Ok(undone)
}

/// Handle to an open transaction for the duration of one callback.
///
/// Implements `Target`: reads pass through, writes and deletes are applied to
/// the underlying target and journaled.
pub struct TransactionScope<'a> {
    journal: &'a mut Journal,
    options: &'a TransactionOptions,
    levels: Scoped<'a, usize>,
    target: &'a mut dyn Target,
}

impl TransactionScope<'_> {
    /// Runs `f` under the same journal. No savepoint is created: a later
    /// rollback reverts the nested work together with the outer work.
    pub fn run_in_transaction<R, F>(&mut self, f: F) -> MembraneResult<R>
    where
        F: FnOnce(&mut TransactionScope<'_>) -> MembraneResult<R>,
    {
        let start = self.journal.len();
        let mut nested = TransactionScope {
            journal: &mut *self.journal,
            options: self.options,
            levels: self.levels.nest(start),
            target: &mut *self.target,
        };
        let result = f(&mut nested);
        tracing::trace!(
            depth = nested.depth(),
            added = nested.journaled_in_scope(),
            "nested transaction callback returned"
        );
        result
    }

    /// Marks the current journal position for a later `rollback_to`.
    pub fn savepoint(&self) -> Savepoint {
        self.journal.savepoint()
    }

    /// Reverts the entries journaled after `savepoint`, newest first, and
    /// returns how many were removed. Earlier entries are kept.
    ///
    /// # Errors
    ///
    /// `SavepointNotFound` if the savepoint belongs to another transaction or
    /// lies beyond the journal (for example after an earlier `rollback_to`).
    pub fn rollback_to(&mut self, savepoint: Savepoint) -> MembraneResult<usize> {
        if !self.journal.accepts(savepoint) {
            return Err(MembraneError::Execution(ExecutionError::SavepointNotFound {
                position: savepoint.position,
                generation: savepoint.generation,
            }));
        }
        let undone = undo_until(self.journal, &mut *self.target, savepoint.position)?;
        tracing::debug!(undone, position = savepoint.position, "rolled back to savepoint");
        Ok(undone)
    }

    pub fn journal(&self) -> &[JournalEntry] {
        self.journal.entries()
    }

    /// Nesting depth of the running callback, 1 for the outermost.
    pub fn depth(&self) -> usize {
        self.levels.depth()
    }

    /// Entries journaled since this callback started, nested callbacks included.
    pub fn journaled_in_scope(&self) -> usize {
        let start = self.levels.current().copied().unwrap_or(0);
        self.journal.len().saturating_sub(start)
    }

    fn ensure_capacity(&self) -> MembraneResult<()> {
        match self.options.max_entries {
            Some(max_entries) if self.journal.len() >= max_entries => {
                Err(MembraneError::Execution(ExecutionError::JournalLimitExceeded { max_entries }))
            }
            _ => Ok(()),
        }
    }
}

impl Target for TransactionScope<'_> {
    fn apply(&mut self, op: OperationDescriptor) -> MembraneResult<Outcome> {
        match op.kind() {
            OperationKind::Read | OperationKind::Enumerate | OperationKind::Describe => {
                self.target.apply(op)
            }
            OperationKind::Write => {
                self.ensure_capacity()?;
                let key = op.require_key()?.to_string();
                let value = op.require_value()?.clone();
                let outcome = self.target.apply(op)?;
                let previous = outcome.clone().into_value()?;
                let had_key_before = previous.is_some();
                self.journal
                    .append(JournalKind::Set, key, Some(value), previous, had_key_before, Vec::new());
                Ok(outcome)
            }
            OperationKind::Delete => {
                self.ensure_capacity()?;
                let key = op.require_key()?.to_string();
                let previous = self
                    .target
                    .apply(OperationDescriptor::read(key.clone()))?
                    .into_value()?;
                let outcome = self.target.apply(op)?;
                let deleted = outcome.clone().into_deleted()?;
                let previous = if deleted { previous } else { None };
                self.journal
                    .append(JournalKind::Delete, key, None, previous, deleted, Vec::new());
                Ok(outcome)
            }
            OperationKind::Invoke | OperationKind::Construct => {
                if !self.options.journal_invocations {
                    return self.target.apply(op);
                }
                self.ensure_capacity()?;
                let kind = if op.kind() == OperationKind::Invoke {
                    JournalKind::Invoke
                } else {
                    JournalKind::Construct
                };
                let key = op.require_key()?.to_string();
                let args = op.args().to_vec();
                let outcome = self.target.apply(op)?;
                let returned = outcome.clone().into_returned()?;
                self.journal
                    .append(kind, key, Some(returned), None, false, args);
                Ok(outcome)
            }
        }
    }
}

impl fmt::Debug for TransactionScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionScope")
            .field("depth", &self.levels.depth())
            .field("entries", &self.journal.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::intercept::TargetExt;
    use crate::object::{FnCallable, TrackedObject};
    use crate::value::Value;

    fn abc() -> TrackedObject {
        TrackedObject::from_iter([
            ("a", Value::Int(1)),
            ("b", Value::Int(2)),
            ("c", Value::Int(3)),
        ])
    }

    #[test]
    fn test_writes_apply_immediately_and_are_journaled() {
        let mut obj = abc();
        let mut engine = TransactionEngine::default();

        let seen = engine
            .run_in_transaction(&mut obj, |tx| {
                tx.write("a", 10)?;
                tx.read("a")
            })
            .unwrap();

        assert_eq!(seen, Some(Value::Int(10)));
        assert_eq!(obj.get("a"), Some(&Value::Int(10)));
        assert!(engine.is_active());

        let entry = &engine.journal()[0];
        assert_eq!(entry.kind, JournalKind::Set);
        assert_eq!(entry.previous_value, Some(Value::Int(1)));
        assert!(entry.had_key_before);
    }

    #[test]
    fn test_nested_transactions_share_one_flat_journal() {
        let mut obj = abc();
        let before = obj.digest().unwrap();
        let mut engine = TransactionEngine::default();

        engine
            .run_in_transaction(&mut obj, |tx| {
                tx.write("a", 10)?;
                tx.run_in_transaction(|inner| {
                    assert_eq!(inner.depth(), 2);
                    assert_eq!(inner.journaled_in_scope(), 0);
                    inner.write("b", 20)?;
                    assert_eq!(inner.journaled_in_scope(), 1);
                    Ok(())
                })?;
                assert_eq!(tx.depth(), 1);
                assert_eq!(tx.journaled_in_scope(), 2);
                tx.write("c", 30)?;
                Ok(())
            })
            .unwrap();

        let keys: Vec<&str> = engine.journal().iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        let seqs: Vec<u64> = engine.journal().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);

        engine.rollback(&mut obj).unwrap();
        assert_eq!(obj, abc());
        assert_eq!(obj.digest().unwrap(), before);
        assert!(!engine.is_active());
        assert!(engine.journal().is_empty());
    }

    #[test]
    fn test_rollback_deletes_created_keys_and_restores_deleted_ones() {
        let mut obj = abc();
        let mut engine = TransactionEngine::default();

        engine
            .run_in_transaction(&mut obj, |tx| {
                tx.write("d", 4)?;
                tx.delete("a")?;
                tx.delete("missing")?;
                tx.write("d", 5)?;
                Ok(())
            })
            .unwrap();
        assert!(!obj.contains_key("a"));

        engine.rollback(&mut obj).unwrap();
        assert_eq!(obj, abc());
    }

    #[test]
    fn test_commit_keeps_mutations_and_clears_journal() {
        let mut obj = abc();
        let mut engine = TransactionEngine::default();

        engine
            .run_in_transaction(&mut obj, |tx| tx.write("a", 100).map(|_| ()))
            .unwrap();
        let applied = obj.clone();

        assert!(engine.commit().unwrap());
        assert_eq!(obj, applied);
        assert!(engine.journal().is_empty());
        assert!(!engine.is_active());
    }

    #[test]
    fn test_commit_and_rollback_require_active_transaction() {
        let mut obj = abc();
        let mut engine = TransactionEngine::default();

        let err = engine.commit().unwrap_err();
        assert!(matches!(err, MembraneError::Execution(ExecutionError::NoActiveTransaction)));
        let err = engine.rollback(&mut obj).unwrap_err();
        assert!(matches!(err, MembraneError::Execution(ExecutionError::NoActiveTransaction)));
    }

    #[test]
    fn test_callback_error_preserves_journal() {
        let mut obj = abc();
        let mut engine = TransactionEngine::default();

        let err = engine
            .run_in_transaction(&mut obj, |tx| {
                tx.write("a", 9)?;
                Err::<(), _>(MembraneError::callback("boom"))
            })
            .unwrap_err();

        assert!(format!("{err}").contains("boom"));
        assert!(engine.is_active());
        assert_eq!(engine.dry_run().len(), 1);

        engine.rollback(&mut obj).unwrap();
        assert_eq!(obj, abc());
    }

    #[test]
    fn test_sequence_restarts_after_commit() {
        let mut obj = abc();
        let mut engine = TransactionEngine::default();

        engine
            .run_in_transaction(&mut obj, |tx| tx.write("a", 1).map(|_| ()))
            .unwrap();
        engine.commit().unwrap();
        engine
            .run_in_transaction(&mut obj, |tx| tx.write("b", 1).map(|_| ()))
            .unwrap();

        assert_eq!(engine.journal()[0].sequence, 0);
    }

    #[test]
    fn test_savepoint_rolls_back_only_later_entries() {
        let mut obj = abc();
        let mut engine = TransactionEngine::default();

        engine
            .run_in_transaction(&mut obj, |tx| {
                tx.write("a", 10)?;
                let sp = tx.savepoint();
                tx.write("b", 20)?;
                tx.delete("c")?;
                assert_eq!(tx.rollback_to(sp)?, 2);
                assert_eq!(tx.journal().len(), 1);

                // The savepoint position is still valid, but nothing remains after it.
                assert_eq!(tx.rollback_to(sp)?, 0);
                Ok(())
            })
            .unwrap();

        assert_eq!(obj.get("a"), Some(&Value::Int(10)));
        assert_eq!(obj.get("b"), Some(&Value::Int(2)));
        assert_eq!(obj.get("c"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_stale_savepoint_is_rejected() {
        let mut obj = abc();
        let mut engine = TransactionEngine::default();

        let sp = engine
            .run_in_transaction(&mut obj, |tx| {
                tx.write("a", 10)?;
                Ok(tx.savepoint())
            })
            .unwrap();
        engine.commit().unwrap();

        let err = engine
            .run_in_transaction(&mut obj, |tx| tx.rollback_to(sp))
            .unwrap_err();
        assert!(matches!(
            err,
            MembraneError::Execution(ExecutionError::SavepointNotFound { .. })
        ));
    }

    #[test]
    fn test_journal_limit_rejects_before_applying() {
        let mut obj = abc();
        let mut engine = TransactionEngine::new(TransactionOptions::default().with_max_entries(1)).unwrap();

        let err = engine
            .run_in_transaction(&mut obj, |tx| {
                tx.write("a", 10)?;
                tx.write("b", 20)?;
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(
            err,
            MembraneError::Execution(ExecutionError::JournalLimitExceeded { max_entries: 1 })
        ));
        assert_eq!(obj.get("b"), Some(&Value::Int(2)));
        assert_eq!(engine.journal().len(), 1);
    }

    #[test]
    fn test_invocations_are_journaled_but_not_undone() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut obj = abc().with_callable(
            "tick",
            Arc::new(FnCallable::new(move |_args: &[Value]| {
                Ok(Value::Int(counter.fetch_add(1, Ordering::SeqCst) as i64 + 1))
            })),
        );
        let mut engine = TransactionEngine::default();

        engine
            .run_in_transaction(&mut obj, |tx| {
                tx.invoke("tick", vec![Value::from("arg")])?;
                tx.write("a", 5)?;
                Ok(())
            })
            .unwrap();

        let entry = &engine.journal()[0];
        assert_eq!(entry.kind, JournalKind::Invoke);
        assert_eq!(entry.new_value, Some(Value::Int(1)));
        assert_eq!(entry.args, vec![Value::from("arg")]);

        engine.rollback(&mut obj).unwrap();
        assert_eq!(obj.get("a"), Some(&Value::Int(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invocations_skip_journal_when_disabled() {
        let mut obj = abc().with_callable(
            "noop",
            Arc::new(FnCallable::pure(|_args: &[Value]| Ok(Value::Null))),
        );
        let mut engine =
            TransactionEngine::new(TransactionOptions::default().with_journal_invocations(false)).unwrap();

        engine
            .run_in_transaction(&mut obj, |tx| tx.invoke("noop", Vec::new()).map(|_| ()))
            .unwrap();
        assert!(engine.journal().is_empty());
        assert!(engine.is_active());
    }
}
