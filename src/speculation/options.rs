//! Speculative engine options.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::object::CloneDepth;

/// Whether host callables may run while a speculation is active.
///
/// Callables are shared with the real object, so their side effects escape the
/// speculation. Running them is therefore opt-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationPolicy {
    /// Reject every invocation and construction.
    Deny,
    /// Allow callables that declare themselves pure.
    #[default]
    PureOnly,
    /// Allow everything; side effects are real.
    Allow,
}

/// Options for a `SpeculativeEngine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeculationOptions {
    /// How the tracked object is copied when a speculation starts.
    pub clone_depth: CloneDepth,
    /// Whether a speculation may open nested speculations.
    pub nested: bool,
    /// Whether `checkpoint` is available.
    pub checkpoints: bool,
    pub invocation: InvocationPolicy,
    /// Maximum nesting depth below the root speculation. `None` means unbounded.
    pub max_depth: Option<usize>,
}

impl Default for SpeculationOptions {
    fn default() -> Self {
        Self {
            clone_depth: CloneDepth::Deep,
            nested: true,
            checkpoints: false,
            invocation: InvocationPolicy::PureOnly,
            max_depth: None,
        }
    }
}

impl SpeculationOptions {
    #[must_use]
    pub const fn with_clone_depth(mut self, clone_depth: CloneDepth) -> Self {
        self.clone_depth = clone_depth;
        self
    }

    #[must_use]
    pub const fn with_nested(mut self, nested: bool) -> Self {
        self.nested = nested;
        self
    }

    #[must_use]
    pub const fn with_checkpoints(mut self, checkpoints: bool) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    #[must_use]
    pub const fn with_invocation(mut self, invocation: InvocationPolicy) -> Self {
        self.invocation = invocation;
        self
    }

    #[must_use]
    pub const fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    /// Validate options.
    ///
    /// This must be called before constructing a `SpeculativeEngine`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_depth == Some(0) {
            return Err(ValidationError::InvalidOptions {
                reason: "max_depth must be > 0 (set nested = false to forbid nesting)".to_string(),
            });
        }
        if !self.nested && self.max_depth.is_some() {
            return Err(ValidationError::InvalidOptions {
                reason: "max_depth has no effect when nested = false".to_string(),
            });
        }
        Ok(())
    }
}
