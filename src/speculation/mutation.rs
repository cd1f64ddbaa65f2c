//! Mutations recorded by a speculation frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Set,
    Delete,
    Invoke,
    Construct,
}

/// One change made to a speculative state, or one call made while speculating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub kind: MutationKind,
    pub key: String,
    /// Written value, or the return value of a call.
    pub value: Option<Value>,
    pub previous: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    pub timestamp: DateTime<Utc>,
}

impl Mutation {
    pub(crate) fn new(
        kind: MutationKind,
        key: impl Into<String>,
        value: Option<Value>,
        previous: Option<Value>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            kind,
            key: key.into(),
            value,
            previous,
            args,
            timestamp: Utc::now(),
        }
    }
}
