//! Reversible mutation journal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::operation::OperationDescriptor;
use crate::value::Value;

/// Kind of a journaled mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalKind {
    Set,
    Delete,
    Invoke,
    Construct,
}

impl JournalKind {
    /// Calls cannot be undone; their entries are informational.
    #[must_use]
    pub const fn is_reversible(self) -> bool {
        matches!(self, Self::Set | Self::Delete)
    }
}

/// One journaled mutation with the state it replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub kind: JournalKind,
    pub key: String,
    /// Written value, or the return value of a call.
    pub new_value: Option<Value>,
    pub previous_value: Option<Value>,
    pub had_key_before: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    /// Position within the transaction, starting at 0.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl JournalEntry {
    /// The operation that reverts this entry, if it is reversible.
    pub fn undo_operation(&self) -> Option<OperationDescriptor> {
        match (self.kind, self.had_key_before, &self.previous_value) {
            (JournalKind::Set | JournalKind::Delete, true, Some(previous)) => {
                Some(OperationDescriptor::write(self.key.clone(), previous.clone()))
            }
            (JournalKind::Set, _, _) => Some(OperationDescriptor::delete(self.key.clone())),
            (JournalKind::Delete | JournalKind::Invoke | JournalKind::Construct, _, _) => None,
        }
    }
}

/// Journal position captured by `TransactionScope::savepoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Savepoint {
    pub(crate) position: usize,
    pub(crate) generation: u64,
}

impl Savepoint {
    /// Number of journal entries that existed when the savepoint was taken.
    pub const fn position(&self) -> usize {
        self.position
    }
}

/// Ordered log of one transaction's mutations.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
    next_sequence: u64,
    // Bumped on every reset so savepoints from an earlier transaction are rejected.
    generation: u64,
}

impl Journal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(
        &mut self,
        kind: JournalKind,
        key: impl Into<String>,
        new_value: Option<Value>,
        previous_value: Option<Value>,
        had_key_before: bool,
        args: Vec<Value>,
    ) -> &JournalEntry {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push(JournalEntry {
            kind,
            key: key.into(),
            new_value,
            previous_value,
            had_key_before,
            args,
            sequence,
            timestamp: Utc::now(),
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&JournalEntry> {
        self.entries.last()
    }

    pub(crate) fn pop(&mut self) -> Option<JournalEntry> {
        self.entries.pop()
    }

    pub(crate) fn savepoint(&self) -> Savepoint {
        Savepoint {
            position: self.entries.len(),
            generation: self.generation,
        }
    }

    pub(crate) fn accepts(&self, savepoint: Savepoint) -> bool {
        savepoint.generation == self.generation && savepoint.position <= self.entries.len()
    }

    /// Drops every entry and restarts the sequence at 0.
    pub(crate) fn reset(&mut self) {
        self.entries.clear();
        self.next_sequence = 0;
        self.generation += 1;
    }
}
