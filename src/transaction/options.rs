//! Transaction engine options.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Options that bound a transaction's journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionOptions {
    /// Maximum journal entries per transaction. `None` means unbounded.
    pub max_entries: Option<usize>,
    /// Whether invocations and constructions are journaled (informational only).
    pub journal_invocations: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            max_entries: None,
            journal_invocations: true,
        }
    }
}

impl TransactionOptions {
    #[must_use]
    pub const fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    #[must_use]
    pub const fn with_journal_invocations(mut self, enabled: bool) -> Self {
        self.journal_invocations = enabled;
        self
    }

    /// Validate options.
    ///
    /// This must be called before constructing a `TransactionEngine`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_entries == Some(0) {
            return Err(ValidationError::InvalidOptions {
                reason: "max_entries must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default_is_valid() {
        TransactionOptions::default().validate().unwrap();
    }

    #[test]
    fn test_options_reject_zero_limit() {
        assert!(TransactionOptions::default()
            .with_max_entries(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let opts: TransactionOptions = serde_json::from_str(r#"{"max_entries":8}"#).unwrap();
        assert_eq!(opts.max_entries, Some(8));
        assert!(opts.journal_invocations);
    }
}
