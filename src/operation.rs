//! Operation descriptors: immutable records of one attempted action.
//!
//! Every read, write, delete, enumeration, description, invocation and
//! construction performed through a `Target` is first described by an
//! `OperationDescriptor`, which interceptors inspect before the engine (or the
//! plain object) executes it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ExecutionError, MembraneError, MembraneResult};
use crate::value::Value;

/// The closed set of primitive operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Read,
    Write,
    Delete,
    Enumerate,
    Describe,
    Invoke,
    Construct,
}

impl OperationKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Read,
        Self::Write,
        Self::Delete,
        Self::Enumerate,
        Self::Describe,
        Self::Invoke,
        Self::Construct,
    ];

    /// Returns true for kinds that change the tracked data.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        matches!(self, Self::Write | Self::Delete)
    }

    /// Returns true for kinds that run host code.
    #[must_use]
    pub const fn is_call(self) -> bool {
        matches!(self, Self::Invoke | Self::Construct)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Enumerate => "enumerate",
            Self::Describe => "describe",
            Self::Invoke => "invoke",
            Self::Construct => "construct",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An attempted action on a tracked object.
///
/// Fields are private: once built, a descriptor cannot be changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    id: Uuid,
    kind: OperationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<Value>,
    timestamp: DateTime<Utc>,
}

impl OperationDescriptor {
    fn build(kind: OperationKind, key: Option<String>, value: Option<Value>, args: Vec<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            key,
            value,
            args,
            timestamp: Utc::now(),
        }
    }

    /// Describes reading `key`.
    pub fn read(key: impl Into<String>) -> Self {
        Self::build(OperationKind::Read, Some(key.into()), None, Vec::new())
    }

    /// Describes setting `key` to `value`.
    pub fn write(key: impl Into<String>, value: Value) -> Self {
        Self::build(OperationKind::Write, Some(key.into()), Some(value), Vec::new())
    }

    /// Describes removing `key`.
    pub fn delete(key: impl Into<String>) -> Self {
        Self::build(OperationKind::Delete, Some(key.into()), None, Vec::new())
    }

    /// Describes listing the keys.
    pub fn enumerate() -> Self {
        Self::build(OperationKind::Enumerate, None, None, Vec::new())
    }

    /// Describes inspecting `key` without reading its value.
    pub fn describe(key: impl Into<String>) -> Self {
        Self::build(OperationKind::Describe, Some(key.into()), None, Vec::new())
    }

    /// Describes calling the callable registered under `key`.
    pub fn invoke(key: impl Into<String>, args: Vec<Value>) -> Self {
        Self::build(OperationKind::Invoke, Some(key.into()), None, args)
    }

    /// Describes constructing through the callable registered under `key`.
    pub fn construct(key: impl Into<String>, args: Vec<Value>) -> Self {
        Self::build(OperationKind::Construct, Some(key.into()), None, args)
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub const fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub const fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the key, failing for descriptors that carry none.
    pub(crate) fn require_key(&self) -> MembraneResult<&str> {
        self.key().ok_or_else(|| {
            MembraneError::internal(format!("{} descriptor without a key", self.kind))
        })
    }

    /// Returns the written value, failing for descriptors that carry none.
    pub(crate) fn require_value(&self) -> MembraneResult<&Value> {
        self.value().ok_or_else(|| {
            MembraneError::internal(format!("{} descriptor without a value", self.kind))
        })
    }
}

/// Metadata returned by a `Describe` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDescription {
    pub key: String,
    /// Type name of the stored value, or `"callable"`.
    pub type_name: String,
    pub callable: bool,
}

/// What an operation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    /// Read result, or the previous value replaced by a write.
    Value(Option<Value>),
    /// Whether a delete removed something.
    Deleted(bool),
    /// Enumerated keys.
    Keys(Vec<String>),
    /// Description of a key, `None` if absent.
    Described(Option<KeyDescription>),
    /// Return value of an invocation or construction.
    Returned(Value),
}

impl Outcome {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Deleted(_) => "deleted",
            Self::Keys(_) => "keys",
            Self::Described(_) => "described",
            Self::Returned(_) => "returned",
        }
    }

    fn mismatch(self, expected: &str) -> MembraneError {
        MembraneError::Execution(ExecutionError::InvalidOutcome {
            expected: expected.to_string(),
            actual: self.name().to_string(),
        })
    }

    pub fn into_value(self) -> MembraneResult<Option<Value>> {
        match self {
            Self::Value(v) => Ok(v),
            other => Err(other.mismatch("value")),
        }
    }

    pub fn into_deleted(self) -> MembraneResult<bool> {
        match self {
            Self::Deleted(d) => Ok(d),
            other => Err(other.mismatch("deleted")),
        }
    }

    pub fn into_keys(self) -> MembraneResult<Vec<String>> {
        match self {
            Self::Keys(k) => Ok(k),
            other => Err(other.mismatch("keys")),
        }
    }

    pub fn into_description(self) -> MembraneResult<Option<KeyDescription>> {
        match self {
            Self::Described(d) => Ok(d),
            other => Err(other.mismatch("described")),
        }
    }

    pub fn into_returned(self) -> MembraneResult<Value> {
        match self {
            Self::Returned(v) => Ok(v),
            other => Err(other.mismatch("returned")),
        }
    }
}
