//! Operations a worker exposes, and the table a factory builds.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Outcome of one operation call. The error is the message sent to the host.
pub type OpResult = std::result::Result<Value, String>;

type SyncFn = dyn Fn(Vec<Value>) -> OpResult + Send + Sync;
type AsyncFn = dyn Fn(Vec<Value>) -> BoxFuture<'static, OpResult> + Send + Sync;

/// A callable living in worker scope.
#[derive(Clone)]
pub enum Operation {
    /// Runs to completion on the dispatcher, in arrival order.
    Sync(Arc<SyncFn>),
    /// Polled alongside incoming messages; several may be in flight.
    Async(Arc<AsyncFn>),
}

impl Operation {
    /// Wrap a synchronous function.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> OpResult + Send + Sync + 'static,
    {
        Operation::Sync(Arc::new(f))
    }

    /// Wrap a function returning a future.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OpResult> + Send + 'static,
    {
        Operation::Async(Arc::new(move |args| f(args).boxed()))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Operation::Async(_))
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Sync(_) => f.write_str("Operation::Sync"),
            Operation::Async(_) => f.write_str("Operation::Async"),
        }
    }
}

/// Named operations produced by a factory.
///
/// Names are reported in insertion order; that order is also the index used
/// by [`BatchedWorker`](crate::BatchedWorker). Re-inserting a name replaces
/// the operation but keeps its original position.
#[derive(Clone, Default, Debug)]
pub struct OperationTable {
    names: Vec<String>,
    operations: FxHashMap<String, Operation>,
}

impl OperationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation, replacing any previous one with the same name.
    pub fn insert(&mut self, name: impl Into<String>, operation: Operation) {
        let name = name.into();
        if self.operations.insert(name.clone(), operation).is_none() {
            self.names.push(name);
        }
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, operation: Operation) -> Self {
        self.insert(name, operation);
        self
    }

    /// Add a synchronous operation.
    pub fn with_sync<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> OpResult + Send + Sync + 'static,
    {
        self.with(name, Operation::sync(f))
    }

    /// Add an asynchronous operation.
    pub fn with_async<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OpResult> + Send + 'static,
    {
        self.with(name, Operation::future(f))
    }

    pub fn get(&self, name: &str) -> Option<&Operation> {
        self.operations.get(name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Deserialize positional argument `index`.
///
/// The error is phrased for the caller, since it becomes the call's error message.
pub fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> std::result::Result<T, String> {
    let value = args
        .get(index)
        .ok_or_else(|| format!("missing argument {}", index))?;
    serde_json::from_value(value.clone()).map_err(|e| format!("argument {}: {}", index, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_names_keep_insertion_order() {
        let table = OperationTable::new()
            .with_sync("zeta", |_| Ok(Value::Null))
            .with_sync("alpha", |_| Ok(Value::Null))
            .with_async("mid", |_| async { Ok(Value::Null) });

        assert_eq!(table.names(), ["zeta", "alpha", "mid"]);
        assert!(table.get("mid").unwrap().is_async());
        assert!(!table.get("zeta").unwrap().is_async());
    }

    #[test]
    fn test_reinsert_replaces_in_place() {
        let table = OperationTable::new()
            .with_sync("a", |_| Ok(json!(1)))
            .with_sync("b", |_| Ok(json!(2)))
            .with_sync("a", |_| Ok(json!(3)));

        assert_eq!(table.len(), 2);
        assert_eq!(table.names(), ["a", "b"]);
        match table.get("a").unwrap() {
            Operation::Sync(f) => assert_eq!(f(vec![]), Ok(json!(3))),
            other => panic!("Wrong operation kind: {:?}", other),
        }
    }

    #[test]
    fn test_arg_helper() {
        let args = vec![json!(5), json!("x")];
        assert_eq!(arg::<i64>(&args, 0), Ok(5));
        assert_eq!(arg::<String>(&args, 1), Ok("x".to_string()));
        assert_eq!(arg::<i64>(&args, 2), Err("missing argument 2".to_string()));
        assert!(arg::<i64>(&args, 1).unwrap_err().starts_with("argument 1:"));
    }
}
