//! Interception substrate.
//!
//! A `Target` executes operation descriptors. The plain `TrackedObject` is the
//! default target; `TransactionScope` and `SpeculationScope` are engine targets.
//! A `Membrane` puts an ordered list of `Interceptor`s in front of any target so
//! that guards run before the engine sees an operation.

pub mod chain;
pub mod target;

pub use chain::{FnInterceptor, InterceptDecision, Interceptor, Membrane};
pub use target::{Target, TargetExt};
