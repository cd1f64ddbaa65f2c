//! The `Target` seam and the default (uninstrumented) behavior of a tracked object.

use crate::error::{ExecutionError, MembraneError, MembraneResult};
use crate::object::TrackedObject;
use crate::operation::{KeyDescription, OperationDescriptor, OperationKind, Outcome};
use crate::value::Value;

/// Anything that can execute an operation descriptor.
pub trait Target {
    /// Executes `op` and reports what it produced.
    fn apply(&mut self, op: OperationDescriptor) -> MembraneResult<Outcome>;
}

impl<T: Target + ?Sized> Target for &mut T {
    fn apply(&mut self, op: OperationDescriptor) -> MembraneResult<Outcome> {
        (**self).apply(op)
    }
}

impl<T: Target + ?Sized> Target for Box<T> {
    fn apply(&mut self, op: OperationDescriptor) -> MembraneResult<Outcome> {
        (**self).apply(op)
    }
}

/// Typed helpers that build descriptors and unpack outcomes.
pub trait TargetExt: Target {
    /// Reads `key`; `None` if absent.
    fn read(&mut self, key: impl Into<String>) -> MembraneResult<Option<Value>> {
        self.apply(OperationDescriptor::read(key))?.into_value()
    }

    /// Sets `key`, returning the previous value.
    fn write(&mut self, key: impl Into<String>, value: impl Into<Value>) -> MembraneResult<Option<Value>> {
        self.apply(OperationDescriptor::write(key, value.into()))?
            .into_value()
    }

    /// Removes `key`, returning whether anything was removed.
    fn delete(&mut self, key: impl Into<String>) -> MembraneResult<bool> {
        self.apply(OperationDescriptor::delete(key))?.into_deleted()
    }

    /// Lists the data keys.
    fn enumerate(&mut self) -> MembraneResult<Vec<String>> {
        self.apply(OperationDescriptor::enumerate())?.into_keys()
    }

    /// Describes `key` without reading it.
    fn describe(&mut self, key: impl Into<String>) -> MembraneResult<Option<KeyDescription>> {
        self.apply(OperationDescriptor::describe(key))?
            .into_description()
    }

    /// Calls the callable registered under `key`.
    fn invoke(&mut self, key: impl Into<String>, args: Vec<Value>) -> MembraneResult<Value> {
        self.apply(OperationDescriptor::invoke(key, args))?
            .into_returned()
    }

    /// Constructs through the callable registered under `key`.
    fn construct(&mut self, key: impl Into<String>, args: Vec<Value>) -> MembraneResult<Value> {
        self.apply(OperationDescriptor::construct(key, args))?
            .into_returned()
    }
}

impl<T: Target + ?Sized> TargetExt for T {}

impl TrackedObject {
    /// Describes a data key or a callable.
    pub fn describe_key(&self, key: &str) -> Option<KeyDescription> {
        if let Some(value) = self.get(key) {
            return Some(KeyDescription {
                key: key.to_string(),
                type_name: value.type_name().to_string(),
                callable: false,
            });
        }
        self.callable(key).map(|_| KeyDescription {
            key: key.to_string(),
            type_name: "callable".to_string(),
            callable: true,
        })
    }

    fn call_registered(&self, op: &OperationDescriptor) -> MembraneResult<Value> {
        let key = op.require_key()?;
        let callable = self.callable(key).ok_or_else(|| {
            MembraneError::Execution(ExecutionError::NotCallable {
                key: key.to_string(),
            })
        })?;

        match op.kind() {
            OperationKind::Construct => callable.construct(op.args()).map_err(|err| match err {
                MembraneError::Execution(ExecutionError::NotConstructible { .. }) => {
                    MembraneError::Execution(ExecutionError::NotConstructible {
                        key: key.to_string(),
                    })
                }
                other => other,
            }),
            _ => callable.call(op.args()),
        }
    }
}

impl Target for TrackedObject {
    fn apply(&mut self, op: OperationDescriptor) -> MembraneResult<Outcome> {
        match op.kind() {
            OperationKind::Read => Ok(Outcome::Value(self.get(op.require_key()?).cloned())),
            OperationKind::Write => {
                let key = op.require_key()?.to_string();
                let value = op.require_value()?.clone();
                Ok(Outcome::Value(self.insert(key, value)))
            }
            OperationKind::Delete => Ok(Outcome::Deleted(self.remove(op.require_key()?).is_some())),
            OperationKind::Enumerate => Ok(Outcome::Keys(self.keys())),
            OperationKind::Describe => Ok(Outcome::Described(self.describe_key(op.require_key()?))),
            OperationKind::Invoke | OperationKind::Construct => {
                self.call_registered(&op).map(Outcome::Returned)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::object::{Callable, FnCallable};

    struct Point;

    impl Callable for Point {
        fn call(&self, _args: &[Value]) -> MembraneResult<Value> {
            Err(MembraneError::callback("Point must be constructed"))
        }

        fn construct(&self, args: &[Value]) -> MembraneResult<Value> {
            Ok(Value::record([
                ("x", args.first().cloned().unwrap_or_default()),
                ("y", args.get(1).cloned().unwrap_or_default()),
            ]))
        }
    }

    fn object() -> TrackedObject {
        let sum: Arc<dyn Callable> = Arc::new(FnCallable::pure(|args: &[Value]| {
            Ok(Value::Int(args.iter().filter_map(Value::as_int).sum()))
        }));
        TrackedObject::from_iter([("a", Value::Int(1))])
            .with_callable("sum", sum)
            .with_callable("Point", Arc::new(Point))
    }

    #[test]
    fn test_plain_object_reads_and_writes() {
        let mut obj = object();
        assert_eq!(obj.read("a").unwrap(), Some(Value::Int(1)));
        assert_eq!(obj.write("a", 2).unwrap(), Some(Value::Int(1)));
        assert_eq!(obj.write("b", "x").unwrap(), None);
        assert_eq!(obj.enumerate().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert!(obj.delete("b").unwrap());
        assert!(!obj.delete("b").unwrap());
        assert_eq!(obj.read("b").unwrap(), None);
    }

    #[test]
    fn test_enumerate_lists_data_keys_only() {
        let mut obj = object();
        obj.insert("b", Value::Null);

        let outcome = obj.apply(OperationDescriptor::enumerate()).unwrap();
        assert_eq!(outcome, Outcome::Keys(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(obj.enumerate().unwrap(), obj.keys());
    }

    #[test]
    fn test_describe_distinguishes_data_and_callables() {
        let mut obj = object();
        let desc = obj.describe("a").unwrap().unwrap();
        assert_eq!(desc.type_name, "int");
        assert!(!desc.callable);

        let desc = obj.describe("sum").unwrap().unwrap();
        assert!(desc.callable);
        assert!(obj.describe("missing").unwrap().is_none());
    }

    #[test]
    fn test_invoke_and_construct() {
        let mut obj = object();
        assert_eq!(
            obj.invoke("sum", vec![Value::Int(2), Value::Int(3)]).unwrap(),
            Value::Int(5)
        );

        let point = obj.construct("Point", vec![Value::Int(1), Value::Int(2)]).unwrap();
        assert_eq!(point.field("y"), Some(&Value::Int(2)));

        let err = obj.construct("sum", Vec::new()).unwrap_err();
        let MembraneError::Execution(ExecutionError::NotConstructible { key }) = err else {
            panic!("expected NotConstructible, got {err:?}");
        };
        assert_eq!(key, "sum");

        let err = obj.invoke("a", Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            MembraneError::Execution(ExecutionError::NotCallable { .. })
        ));
    }

    #[test]
    fn test_target_through_mut_ref_and_box() {
        let mut obj = object();
        {
            let mut by_ref: &mut TrackedObject = &mut obj;
            by_ref.write("c", 3).unwrap();
        }
        let mut boxed: Box<dyn Target> = Box::new(obj);
        assert_eq!(boxed.read("c").unwrap(), Some(Value::Int(3)));
    }
}
