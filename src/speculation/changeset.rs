//! Difference between a tracked object and a speculative state.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::MembraneResult;
use crate::intercept::Target;
use crate::object::TrackedObject;
use crate::operation::OperationDescriptor;
use crate::value::Value;

/// Old and new value of a modified key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub from: Value,
    pub to: Value,
}

/// Keys added, modified and deleted by a speculation.
///
/// Values are compared structurally (`Value::same_value`), so a key whose
/// value was copied but not changed is never reported as modified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: BTreeMap<String, Value>,
    pub modified: BTreeMap<String, Modification>,
    pub deleted: BTreeMap<String, Value>,
}

impl ChangeSet {
    /// Diffs `speculative` against `base`.
    pub fn between(base: &TrackedObject, speculative: &TrackedObject) -> Self {
        let mut out = Self::default();

        for (key, to) in speculative.entries() {
            match base.get(key) {
                None => {
                    out.added.insert(key.clone(), to.clone());
                }
                Some(from) if !from.same_value(to) => {
                    out.modified.insert(
                        key.clone(),
                        Modification {
                            from: from.clone(),
                            to: to.clone(),
                        },
                    );
                }
                Some(_) => {}
            }
        }

        for (key, value) in base.entries() {
            if !speculative.contains_key(key) {
                out.deleted.insert(key.clone(), value.clone());
            }
        }

        out
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Number of keys touched.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    /// Every key touched, in order.
    pub fn keys(&self) -> BTreeSet<&str> {
        self.added
            .keys()
            .chain(self.modified.keys())
            .chain(self.deleted.keys())
            .map(String::as_str)
            .collect()
    }

    /// Applies the changes to `target`: deletes first, then sets for added and
    /// modified keys. Returns the number of operations issued.
    ///
    /// Applying through a `Membrane` runs its interceptors on every change; the
    /// first veto stops the application and leaves earlier changes in place.
    pub fn apply(&self, target: &mut dyn Target) -> MembraneResult<usize> {
        let mut issued = 0;
        for key in self.deleted.keys() {
            target.apply(OperationDescriptor::delete(key.clone()))?;
            issued += 1;
        }
        let sets = self
            .added
            .iter()
            .chain(self.modified.iter().map(|(k, m)| (k, &m.to)));
        for (key, value) in sets {
            target.apply(OperationDescriptor::write(key.clone(), value.clone()))?;
            issued += 1;
        }
        Ok(issued)
    }
}
