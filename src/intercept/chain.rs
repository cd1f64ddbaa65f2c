//! Ordered interceptor chain in front of a target.

use std::fmt;
use std::sync::Arc;

use crate::error::{ExecutionError, MembraneError, MembraneResult};
use crate::operation::{OperationDescriptor, OperationKind, Outcome};

use super::target::Target;

/// Decision returned by an interceptor.
#[derive(Debug, Clone, PartialEq)]
pub enum InterceptDecision {
    /// Pass the operation to the next interceptor, then to the target.
    Continue,
    /// Deny the operation.
    Veto { reason: String },
    /// Answer the operation without reaching the target.
    Respond(Outcome),
}

/// A guard consulted before an operation reaches its target.
///
/// Capability checks, invariants, sandboxes and audit layers all plug in here.
pub trait Interceptor: Send + Sync {
    /// Stable interceptor name, reported in veto errors.
    fn name(&self) -> &str {
        "interceptor"
    }

    /// Returns true if this interceptor wants to see operations of `kind`.
    fn handles(&self, _kind: OperationKind) -> bool {
        true
    }

    /// Inspects `op` and decides how it proceeds.
    fn intercept(&self, op: &OperationDescriptor) -> InterceptDecision;
}

/// Closure-backed interceptor registered for a fixed set of kinds.
pub struct FnInterceptor<F> {
    name: String,
    kinds: Vec<OperationKind>,
    func: F,
}

impl<F> FnInterceptor<F>
where
    F: Fn(&OperationDescriptor) -> InterceptDecision + Send + Sync,
{
    pub fn new(name: impl Into<String>, kinds: impl IntoIterator<Item = OperationKind>, func: F) -> Self {
        Self {
            name: name.into(),
            kinds: kinds.into_iter().collect(),
            func,
        }
    }
}

impl<F> Interceptor for FnInterceptor<F>
where
    F: Fn(&OperationDescriptor) -> InterceptDecision + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handles(&self, kind: OperationKind) -> bool {
        self.kinds.contains(&kind)
    }

    fn intercept(&self, op: &OperationDescriptor) -> InterceptDecision {
        (self.func)(op)
    }
}

/// A target wrapped by an ordered list of interceptors.
///
/// Interceptors run in registration order. Put policy layers here and the engine
/// scope as the target so denied operations never reach a journal or a
/// speculative state.
pub struct Membrane<T> {
    target: T,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl<T: Target> Membrane<T> {
    pub fn new(target: T) -> Self {
        Self {
            target,
            interceptors: Vec::new(),
        }
    }

    /// Appends an interceptor to the chain.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Appends a closure guard for the given kinds.
    #[must_use]
    pub fn with_guard<F>(self, name: impl Into<String>, kinds: impl IntoIterator<Item = OperationKind>, func: F) -> Self
    where
        F: Fn(&OperationDescriptor) -> InterceptDecision + Send + Sync + 'static,
    {
        self.with_interceptor(Arc::new(FnInterceptor::new(name, kinds, func)))
    }

    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Interceptor names in chain order.
    pub fn interceptor_names(&self) -> Vec<&str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    pub fn into_inner(self) -> T {
        self.target
    }
}

impl<T: Target> Target for Membrane<T> {
    fn apply(&mut self, op: OperationDescriptor) -> MembraneResult<Outcome> {
        for interceptor in &self.interceptors {
            if !interceptor.handles(op.kind()) {
                continue;
            }
            match interceptor.intercept(&op) {
                InterceptDecision::Continue => {}
                InterceptDecision::Veto { reason } => {
                    tracing::warn!(
                        interceptor = interceptor.name(),
                        kind = %op.kind(),
                        key = op.key().unwrap_or_default(),
                        %reason,
                        "operation vetoed"
                    );
                    return Err(MembraneError::Execution(ExecutionError::OperationVetoed {
                        interceptor: interceptor.name().to_string(),
                        kind: op.kind(),
                        reason,
                    }));
                }
                InterceptDecision::Respond(outcome) => return Ok(outcome),
            }
        }
        self.target.apply(op)
    }
}

impl<T: fmt::Debug> fmt::Debug for Membrane<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Membrane")
            .field("target", &self.target)
            .field(
                "interceptors",
                &self.interceptors.iter().map(|i| i.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::intercept::TargetExt;
    use crate::object::TrackedObject;
    use crate::value::Value;

    struct Counter(AtomicUsize);

    impl Interceptor for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn intercept(&self, _op: &OperationDescriptor) -> InterceptDecision {
            self.0.fetch_add(1, Ordering::SeqCst);
            InterceptDecision::Continue
        }
    }

    #[test]
    fn test_veto_stops_before_target() {
        let mut membrane = Membrane::new(TrackedObject::from_iter([("locked", Value::Int(1))]))
            .with_guard("read-only", [OperationKind::Write, OperationKind::Delete], |op| {
                if op.key() == Some("locked") {
                    InterceptDecision::Veto {
                        reason: "key is locked".to_string(),
                    }
                } else {
                    InterceptDecision::Continue
                }
            });

        let err = membrane.write("locked", 2).unwrap_err();
        assert!(err.is_vetoed());
        assert_eq!(membrane.target().get("locked"), Some(&Value::Int(1)));

        membrane.write("free", 2).unwrap();
        assert_eq!(membrane.target().get("free"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_respond_short_circuits() {
        let mut membrane = Membrane::new(TrackedObject::new()).with_guard(
            "virtual",
            [OperationKind::Read],
            |op| match op.key() {
                Some("computed") => InterceptDecision::Respond(Outcome::Value(Some(Value::Int(42)))),
                _ => InterceptDecision::Continue,
            },
        );

        assert_eq!(membrane.read("computed").unwrap(), Some(Value::Int(42)));
        assert_eq!(membrane.read("other").unwrap(), None);
    }

    #[test]
    fn test_interceptors_run_in_order_and_filter_by_kind() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let mut membrane = Membrane::new(TrackedObject::new())
            .with_guard("deny-enumerate", [OperationKind::Enumerate], |_| {
                InterceptDecision::Veto {
                    reason: "hidden".to_string(),
                }
            })
            .with_interceptor(counter.clone());

        assert_eq!(membrane.interceptor_names(), vec!["deny-enumerate", "counter"]);

        membrane.write("a", 1).unwrap();
        assert!(membrane.enumerate().is_err());
        // The veto ends the chain before the counter runs.
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
