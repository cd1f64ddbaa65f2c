//! Error types for membrane.
//!
//! All errors are strongly typed using thiserror so callers can match on the
//! specific condition (e.g. `NoActiveSimulation`) instead of parsing messages.

use thiserror::Error;

use crate::operation::OperationKind;

/// Validation errors raised while checking options or constructing values.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid options: {reason}")]
    InvalidOptions {
        reason: String,
    },

    #[error("Invalid regex '{source_text}': {reason}")]
    InvalidRegex {
        source_text: String,
        reason: String,
    },

    #[error("Unsupported regex flag '{flag}'")]
    UnsupportedRegexFlag {
        flag: char,
    },
}

/// Execution errors raised by the engines and the interceptor chain.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("No active transaction")]
    NoActiveTransaction,

    #[error("No active simulation")]
    NoActiveSimulation,

    #[error("Nested simulation is disallowed by the engine options")]
    NestedSimulationDisallowed,

    #[error("Checkpoint not found: {id}")]
    CheckpointNotFound {
        id: String,
    },

    #[error("Checkpoints are disabled by the engine options")]
    CheckpointsDisabled,

    #[error("Savepoint not found: position {position} in generation {generation}")]
    SavepointNotFound {
        position: usize,
        generation: u64,
    },

    #[error("Simulation limit exceeded: {limit_type} (max: {max_value}, actual: {actual_value})")]
    SimulationLimitExceeded {
        limit_type: String,
        max_value: u64,
        actual_value: u64,
    },

    #[error("Journal limit exceeded: max {max_entries} entries")]
    JournalLimitExceeded {
        max_entries: usize,
    },

    #[error("Invocation of '{key}' disallowed: {reason}")]
    InvocationDisallowed {
        key: String,
        reason: String,
    },

    #[error("'{key}' is not callable")]
    NotCallable {
        key: String,
    },

    #[error("'{key}' is not constructible")]
    NotConstructible {
        key: String,
    },

    #[error("{kind} operation vetoed by '{interceptor}': {reason}")]
    OperationVetoed {
        interceptor: String,
        kind: OperationKind,
        reason: String,
    },

    #[error("Invalid outcome: expected {expected}, got {actual}")]
    InvalidOutcome {
        expected: String,
        actual: String,
    },

    #[error("Callback failed: {message}")]
    Callback {
        message: String,
    },
}

/// Top-level error type for membrane.
#[derive(Debug, Error)]
pub enum MembraneError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl MembraneError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a callback error; convenient for user code failing inside a scope.
    #[must_use]
    pub fn callback(message: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::Callback {
            message: message.into(),
        })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if the operation was denied by an interceptor.
    #[must_use]
    pub const fn is_vetoed(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::OperationVetoed { .. }))
    }

    /// Returns true if this error is retryable.
    ///
    /// Engine errors are user errors: the same call fails the same way until the
    /// caller changes engine state, so nothing here is transient.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        false
    }
}

/// Result type alias for membrane operations.
pub type MembraneResult<T> = Result<T, MembraneError>;
