//! The tracked object: the caller-owned key-value structure that engines mediate.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, MembraneError, MembraneResult};
use crate::value::Value;

/// A host function reachable through `Invoke` / `Construct` operations.
///
/// Callables are shared, not copied, when a tracked object is cloned. Whatever
/// side effects a callable has are therefore never isolated by a speculation.
pub trait Callable: Send + Sync {
    /// Calls the function.
    fn call(&self, args: &[Value]) -> MembraneResult<Value>;

    /// Calls the function as a constructor. Not constructible by default.
    fn construct(&self, _args: &[Value]) -> MembraneResult<Value> {
        Err(MembraneError::Execution(ExecutionError::NotConstructible {
            key: "<anonymous>".to_string(),
        }))
    }

    /// Returns true if calling the function has no observable side effects.
    fn is_pure(&self) -> bool {
        false
    }
}

/// Adapter turning a closure into a `Callable`.
pub struct FnCallable<F> {
    func: F,
    pure: bool,
}

impl<F> FnCallable<F>
where
    F: Fn(&[Value]) -> MembraneResult<Value> + Send + Sync,
{
    /// Wraps a closure with side effects.
    pub fn new(func: F) -> Self {
        Self { func, pure: false }
    }

    /// Wraps a closure declared free of side effects.
    pub fn pure(func: F) -> Self {
        Self { func, pure: true }
    }
}

impl<F> Callable for FnCallable<F>
where
    F: Fn(&[Value]) -> MembraneResult<Value> + Send + Sync,
{
    fn call(&self, args: &[Value]) -> MembraneResult<Value> {
        (self.func)(args)
    }

    fn is_pure(&self) -> bool {
        self.pure
    }
}

/// How far a tracked object is copied when a speculation clones it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneDepth {
    /// Copy the top-level entries only; nested values are shared and copied on
    /// first write.
    Shallow,
    /// Copy every nested value eagerly.
    #[default]
    Deep,
}

/// Stable fingerprint of a tracked object's data entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateDigest([u8; 32]);

impl StateDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Key-value structure observed and mediated by the engines.
///
/// Data entries are kept ordered by key so enumeration and digests are
/// deterministic. Callables live in a separate table.
#[derive(Clone, Default)]
pub struct TrackedObject {
    entries: BTreeMap<String, Value>,
    callables: BTreeMap<String, Arc<dyn Callable>>,
}

impl TrackedObject {
    /// Creates an empty object.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callable under `key`.
    #[must_use]
    pub fn with_callable(mut self, key: impl Into<String>, callable: Arc<dyn Callable>) -> Self {
        self.callables.insert(key.into(), callable);
        self
    }

    /// Registers or replaces a callable under `key`.
    pub fn register_callable(&mut self, key: impl Into<String>, callable: Arc<dyn Callable>) {
        self.callables.insert(key.into(), callable);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Sets `key`, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    /// Removes `key`, returning the removed value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Data keys in ascending order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn callable(&self, key: &str) -> Option<Arc<dyn Callable>> {
        self.callables.get(key).map(Arc::clone)
    }

    /// Copies the object at the requested depth. Callables are always shared.
    #[must_use]
    pub fn clone_with(&self, depth: CloneDepth) -> Self {
        let entries = match depth {
            CloneDepth::Shallow => self.entries.clone(),
            CloneDepth::Deep => self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.deep_clone()))
                .collect(),
        };
        Self {
            entries,
            callables: self.callables.clone(),
        }
    }

    /// Returns true if both objects hold the same entries under structural equality.
    pub fn same_entries(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && va.same_value(vb))
    }

    /// blake3 digest over the canonical JSON encoding of the data entries.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the entries cannot be encoded.
    pub fn digest(&self) -> MembraneResult<StateDigest> {
        let bytes = serde_json::to_vec(&self.entries)
            .map_err(|e| MembraneError::internal(format!("failed to encode entries: {e}")))?;
        Ok(StateDigest(*blake3::hash(&bytes).as_bytes()))
    }
}

impl fmt::Debug for TrackedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedObject")
            .field("entries", &self.entries)
            .field("callables", &self.callables.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PartialEq for TrackedObject {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for TrackedObject {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            callables: BTreeMap::new(),
        }
    }
}

impl From<BTreeMap<String, Value>> for TrackedObject {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Self {
            entries,
            callables: BTreeMap::new(),
        }
    }
}
