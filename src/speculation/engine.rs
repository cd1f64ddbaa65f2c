//! Speculative engine and the scope handed to speculation callbacks.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::context::{ContextStack, Scoped};
use crate::error::{ExecutionError, MembraneError, MembraneResult};
use crate::intercept::Target;
use crate::object::TrackedObject;
use crate::operation::{OperationDescriptor, OperationKind, Outcome};
use crate::value::Value;

use super::changeset::ChangeSet;
use super::checkpoint::{CheckpointId, CheckpointTable};
use super::mutation::{Mutation, MutationKind};
use super::options::{InvocationPolicy, SpeculationOptions};
use super::tree::{ExecutionTree, NodeId, NodeStatus, RecordOutcome, SpeculationRecord};

/// One active speculation: its isolated state and what was done to it.
#[derive(Debug)]
struct Frame {
    node: NodeId,
    state: TrackedObject,
    mutations: Vec<Mutation>,
}

fn no_active_simulation() -> MembraneError {
    MembraneError::Execution(ExecutionError::NoActiveSimulation)
}

/// Runs code against isolated copies of a tracked object.
///
/// A top-level `speculate` stays active after its callback returns, so the
/// result can be inspected with `change_set` and then kept with `commit` or
/// dropped with `abort`.
///
/// # Examples
///
/// ```
/// use membrane::{SpeculativeEngine, TargetExt, TrackedObject, Value};
///
/// let mut account = TrackedObject::from_iter([("balance", Value::Int(1000))]);
/// let mut engine = SpeculativeEngine::default();
///
/// engine.speculate(&account, |s| {
///     let balance = s.read("balance")?.and_then(|v| v.as_int()).unwrap_or(0);
///     s.write("balance", balance - 500)?;
///     Ok(())
/// })?;
/// assert_eq!(account.get("balance"), Some(&Value::Int(1000)));
///
/// let changes = engine.change_set(&account);
/// assert_eq!(changes.modified["balance"].to, Value::Int(500));
///
/// engine.commit(&mut account)?;
/// assert_eq!(account.get("balance"), Some(&Value::Int(500)));
/// # Ok::<(), membrane::MembraneError>(())
/// ```
pub struct SpeculativeEngine {
    options: SpeculationOptions,
    frames: ContextStack<Frame>,
    tree: ExecutionTree,
    checkpoints: CheckpointTable,
}

impl SpeculativeEngine {
    /// Creates an engine with validated options.
    pub fn new(options: SpeculationOptions) -> MembraneResult<Self> {
        options.validate().map_err(MembraneError::from)?;
        Ok(Self {
            options,
            frames: ContextStack::new(),
            tree: ExecutionTree::new(),
            checkpoints: CheckpointTable::default(),
        })
    }

    pub const fn options(&self) -> SpeculationOptions {
        self.options
    }

    /// Runs `f` against a copy of `target`.
    ///
    /// A speculation left active by an earlier call is discarded first. The
    /// outcome of `f` is recorded on a new top-level node; errors propagate and
    /// leave the speculation active.
    pub fn speculate<R, F>(&mut self, target: &TrackedObject, f: F) -> MembraneResult<R>
    where
        R: Into<Value> + Clone,
        F: FnOnce(&mut SpeculationScope<'_>) -> MembraneResult<R>,
    {
        if let Some(stale) = self.frames.root() {
            let node = stale.node;
            tracing::warn!(
                node = %node,
                mutations = stale.mutations.len(),
                "discarding stale speculation"
            );
            self.tree.set_status(node, NodeStatus::Aborted);
            self.frames.clear();
            self.checkpoints.clear();
        }

        let node = self.tree.open(None);
        self.frames.push(Frame {
            node,
            state: target.clone_with(self.options.clone_depth),
            mutations: Vec::new(),
        });
        tracing::debug!(node = %node, depth = 0, clone_depth = ?self.options.clone_depth, "speculation started");

        let mut scope = SpeculationScope {
            node,
            frames: self.frames.enter(),
            tree: &mut self.tree,
            checkpoints: &mut self.checkpoints,
            options: &self.options,
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| f(&mut scope)));
        drop(scope);

        let mutations = self
            .frames
            .root()
            .map(|frame| frame.mutations.clone())
            .unwrap_or_default();
        match result {
            Ok(result) => {
                record_outcome(&mut self.tree, node, mutations, &result);
                result
            }
            Err(payload) => {
                record_panic(&mut self.tree, node, mutations);
                panic::resume_unwind(payload)
            }
        }
    }

    /// Applies the speculative changes to `target` and ends the speculation.
    ///
    /// # Errors
    ///
    /// `NoActiveSimulation` if nothing is being speculated.
    pub fn commit(&mut self, target: &mut TrackedObject) -> MembraneResult<bool> {
        let frame = self.frames.root().ok_or_else(no_active_simulation)?;
        let node = frame.node;
        let changes = ChangeSet::between(target, &frame.state);
        let applied = changes.apply(target)?;

        self.tree.set_status(node, NodeStatus::Committed);
        self.finish();
        tracing::debug!(node = %node, changes = applied, "speculation committed");
        Ok(true)
    }

    /// Drops the speculative state without touching the real object.
    ///
    /// # Errors
    ///
    /// `NoActiveSimulation` if nothing is being speculated.
    pub fn abort(&mut self) -> MembraneResult<()> {
        let node = self.frames.root().ok_or_else(no_active_simulation)?.node;
        self.tree.set_status(node, NodeStatus::Aborted);
        self.finish();
        tracing::debug!(node = %node, "speculation aborted");
        Ok(())
    }

    fn finish(&mut self) {
        self.frames.clear();
        self.checkpoints.clear();
        self.tree.set_current(None);
    }

    /// Differences between `target` and the speculative state; empty when inactive.
    pub fn change_set(&self, target: &TrackedObject) -> ChangeSet {
        self.frames
            .current()
            .map(|frame| ChangeSet::between(target, &frame.state))
            .unwrap_or_default()
    }

    /// Owned copy of the speculative state.
    pub fn speculative_state(&self) -> MembraneResult<TrackedObject> {
        self.frames
            .current()
            .map(|frame| frame.state.clone())
            .ok_or_else(no_active_simulation)
    }

    /// Snapshots the speculative state and its mutations.
    ///
    /// # Errors
    ///
    /// `NoActiveSimulation` if nothing is being speculated, `CheckpointsDisabled`
    /// unless enabled in the options.
    pub fn checkpoint(&mut self) -> MembraneResult<CheckpointId> {
        let frame = self.frames.current().ok_or_else(no_active_simulation)?;
        take_checkpoint(&self.options, &mut self.checkpoints, frame)
    }

    /// Replaces the speculative state and mutations with a checkpoint's.
    ///
    /// # Errors
    ///
    /// `NoActiveSimulation` if nothing is being speculated, `CheckpointNotFound`
    /// for an unknown id or one taken before the last commit or abort.
    pub fn restore(&mut self, id: CheckpointId) -> MembraneResult<()> {
        let frame = self.frames.current_mut().ok_or_else(no_active_simulation)?;
        restore_checkpoint(&self.options, &self.checkpoints, frame, id)
    }

    /// Checkpoints available for `restore`, oldest first.
    pub fn checkpoint_ids(&self) -> Vec<CheckpointId> {
        self.checkpoints.ids()
    }

    pub fn execution_tree(&self) -> &ExecutionTree {
        &self.tree
    }

    /// Mutations recorded by the active top-level speculation.
    pub fn mutations(&self) -> &[Mutation] {
        self.frames
            .current()
            .map(|frame| frame.mutations.as_slice())
            .unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        !self.frames.is_empty()
    }
}

impl Default for SpeculativeEngine {
    fn default() -> Self {
        Self {
            options: SpeculationOptions::default(),
            frames: ContextStack::new(),
            tree: ExecutionTree::new(),
            checkpoints: CheckpointTable::default(),
        }
    }
}

impl fmt::Debug for SpeculativeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeculativeEngine")
            .field("options", &self.options)
            .field("active", &self.is_active())
            .field("nodes", &self.tree.len())
            .finish_non_exhaustive()
    }
}

fn record_outcome<R>(tree: &mut ExecutionTree, node: NodeId, mutations: Vec<Mutation>, result: &MembraneResult<R>)
where
    R: Into<Value> + Clone,
{
    let (outcome, status) = match result {
        Ok(value) => (
            RecordOutcome::Completed {
                result: value.clone().into(),
            },
            NodeStatus::Completed,
        ),
        Err(err) => {
            tracing::debug!(node = %node, error = %err, "speculation callback failed");
            (
                RecordOutcome::Failed {
                    error: err.to_string(),
                },
                NodeStatus::Error,
            )
        }
    };
    tree.record(node, SpeculationRecord::new(mutations, outcome));
    tree.set_status(node, status);
}

// The frame is gone (nested) or kept for inspection (root); either way the
// node must not stay `Active`.
fn record_panic(tree: &mut ExecutionTree, node: NodeId, mutations: Vec<Mutation>) {
    tracing::warn!(node = %node, "speculation callback panicked");
    tree.record(
        node,
        SpeculationRecord::new(
            mutations,
            RecordOutcome::Failed {
                error: "callback panicked".to_string(),
            },
        ),
    );
    tree.set_status(node, NodeStatus::Error);
}

fn take_checkpoint(
    options: &SpeculationOptions,
    checkpoints: &mut CheckpointTable,
    frame: &Frame,
) -> MembraneResult<CheckpointId> {
    if !options.checkpoints {
        return Err(MembraneError::Execution(ExecutionError::CheckpointsDisabled));
    }
    let id = checkpoints.insert(
        frame.node,
        frame.state.clone_with(options.clone_depth),
        frame.mutations.clone(),
    );
    tracing::debug!(node = %frame.node, checkpoint = %id, mutations = frame.mutations.len(), "checkpoint taken");
    Ok(id)
}

fn restore_checkpoint(
    options: &SpeculationOptions,
    checkpoints: &CheckpointTable,
    frame: &mut Frame,
    id: CheckpointId,
) -> MembraneResult<()> {
    let checkpoint = checkpoints.get(id).ok_or_else(|| {
        MembraneError::Execution(ExecutionError::CheckpointNotFound { id: id.to_string() })
    })?;
    frame.state = checkpoint.state.clone_with(options.clone_depth);
    frame.mutations.clone_from(&checkpoint.mutations);
    tracing::debug!(node = %frame.node, checkpoint = %id, "checkpoint restored");
    Ok(())
}

/// Handle to the innermost running speculation.
///
/// Implements `Target`: every operation resolves against the isolated state
/// of the current frame. Wrap it in a `Membrane` to run interceptors before
/// operations reach that state.
pub struct SpeculationScope<'a> {
    node: NodeId,
    frames: Scoped<'a, Frame>,
    tree: &'a mut ExecutionTree,
    checkpoints: &'a mut CheckpointTable,
    options: &'a SpeculationOptions,
}

impl SpeculationScope<'_> {
    /// Runs `f` against a copy of this scope's current state.
    ///
    /// The nested frame is dropped when `f` returns, on success, error or
    /// panic; its changes never reach this scope.
    ///
    /// # Errors
    ///
    /// `NestedSimulationDisallowed` when nesting is off, and
    /// `SimulationLimitExceeded` past `max_depth`. Errors from `f` propagate.
    pub fn speculate<R, F>(&mut self, f: F) -> MembraneResult<R>
    where
        R: Into<Value> + Clone,
        F: FnOnce(&mut SpeculationScope<'_>) -> MembraneResult<R>,
    {
        if !self.options.nested {
            return Err(MembraneError::Execution(ExecutionError::NestedSimulationDisallowed));
        }
        let depth = self.depth() + 1;
        if let Some(max_depth) = self.options.max_depth {
            if depth > max_depth {
                return Err(MembraneError::Execution(ExecutionError::SimulationLimitExceeded {
                    limit_type: "nesting_depth".to_string(),
                    max_value: max_depth as u64,
                    actual_value: depth as u64,
                }));
            }
        }

        let state = self.state()?.clone_with(self.options.clone_depth);
        let parent = self.node;
        let node = self.tree.open(Some(parent));
        tracing::debug!(node = %node, parent = %parent, depth, "nested speculation started");

        let result = {
            let mut child = SpeculationScope {
                node,
                frames: self.frames.nest(Frame {
                    node,
                    state,
                    mutations: Vec::new(),
                }),
                tree: &mut *self.tree,
                checkpoints: &mut *self.checkpoints,
                options: self.options,
            };
            let result = panic::catch_unwind(AssertUnwindSafe(|| f(&mut child)));
            let mutations = child
                .frames
                .current_mut()
                .map(|frame| std::mem::take(&mut frame.mutations))
                .unwrap_or_default();
            match result {
                Ok(result) => {
                    record_outcome(child.tree, node, mutations, &result);
                    result
                }
                Err(payload) => {
                    record_panic(child.tree, node, mutations);
                    drop(child);
                    self.tree.set_current(Some(parent));
                    panic::resume_unwind(payload);
                }
            }
        };

        self.tree.set_current(Some(parent));
        result
    }

    fn frame(&self) -> MembraneResult<&Frame> {
        self.frames.current().ok_or_else(no_active_simulation)
    }

    fn frame_mut(&mut self) -> MembraneResult<&mut Frame> {
        self.frames.current_mut().ok_or_else(no_active_simulation)
    }

    /// Snapshots this scope's state and mutations.
    pub fn checkpoint(&mut self) -> MembraneResult<CheckpointId> {
        let frame = self.frames.current().ok_or_else(no_active_simulation)?;
        take_checkpoint(self.options, self.checkpoints, frame)
    }

    /// Replaces this scope's state and mutations with a checkpoint's.
    pub fn restore(&mut self, id: CheckpointId) -> MembraneResult<()> {
        let frame = self.frames.current_mut().ok_or_else(no_active_simulation)?;
        restore_checkpoint(self.options, self.checkpoints, frame, id)
    }

    /// The isolated state this scope reads and writes.
    pub fn state(&self) -> MembraneResult<&TrackedObject> {
        self.frame().map(|frame| &frame.state)
    }

    pub fn speculative_state(&self) -> MembraneResult<TrackedObject> {
        self.state().cloned()
    }

    pub fn mutations(&self) -> &[Mutation] {
        self.frames
            .current()
            .map(|frame| frame.mutations.as_slice())
            .unwrap_or_default()
    }

    /// 0 for a top-level speculation.
    pub fn depth(&self) -> usize {
        self.frames.depth().saturating_sub(1)
    }

    pub const fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn execution_tree(&self) -> &ExecutionTree {
        self.tree
    }

    pub fn change_set_against(&self, base: &TrackedObject) -> MembraneResult<ChangeSet> {
        self.state().map(|state| ChangeSet::between(base, state))
    }

    fn check_invocation(&self, op: &OperationDescriptor) -> MembraneResult<()> {
        let key = op.require_key()?;
        let reason = match self.options.invocation {
            InvocationPolicy::Allow => return Ok(()),
            InvocationPolicy::Deny => "invocations are denied while speculating",
            InvocationPolicy::PureOnly => match self.state()?.callable(key) {
                Some(callable) if !callable.is_pure() => "callable is not pure",
                // Unknown keys fall through to NotCallable from the state.
                _ => return Ok(()),
            },
        };
        tracing::warn!(key, node = %self.node, "invocation rejected during speculation");
        Err(MembraneError::Execution(ExecutionError::InvocationDisallowed {
            key: key.to_string(),
            reason: reason.to_string(),
        }))
    }
}

impl Target for SpeculationScope<'_> {
    fn apply(&mut self, op: OperationDescriptor) -> MembraneResult<Outcome> {
        if op.kind().is_call() {
            self.check_invocation(&op)?;
        }
        let frame = self.frame_mut()?;

        match op.kind() {
            OperationKind::Read | OperationKind::Enumerate | OperationKind::Describe => frame.state.apply(op),
            OperationKind::Write => {
                let key = op.require_key()?.to_string();
                let value = op.require_value()?.clone();
                let outcome = frame.state.apply(op)?;
                let previous = outcome.clone().into_value()?;
                frame
                    .mutations
                    .push(Mutation::new(MutationKind::Set, key, Some(value), previous, Vec::new()));
                Ok(outcome)
            }
            OperationKind::Delete => {
                let key = op.require_key()?.to_string();
                let previous = frame.state.get(&key).cloned();
                let outcome = frame.state.apply(op)?;
                frame
                    .mutations
                    .push(Mutation::new(MutationKind::Delete, key, None, previous, Vec::new()));
                Ok(outcome)
            }
            OperationKind::Invoke | OperationKind::Construct => {
                let kind = if op.kind() == OperationKind::Invoke {
                    MutationKind::Invoke
                } else {
                    MutationKind::Construct
                };
                let key = op.require_key()?.to_string();
                let args = op.args().to_vec();
                let outcome = frame.state.apply(op)?;
                let returned = outcome.clone().into_returned()?;
                frame
                    .mutations
                    .push(Mutation::new(kind, key, Some(returned), None, args));
                Ok(outcome)
            }
        }
    }
}

impl fmt::Debug for SpeculationScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeculationScope")
            .field("node", &self.node)
            .field("depth", &self.depth())
            .field("mutations", &self.mutations().len())
            .finish_non_exhaustive()
    }
}
