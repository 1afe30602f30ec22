//! One-shot workers wrapping a single function.

use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;
use crate::host::{Captures, Host};
use crate::worker::{OpResult, Operation, OperationTable, Registry};

const ENTRY: &str = "fn";

/// Runs a function off the calling thread, in a fresh worker per call.
///
/// Every call creates a thread worker with the single operation `fn`,
/// invokes it and terminates the worker, so calls share no state.
#[derive(Debug, Clone)]
pub struct SimpleWorker {
    host: Host,
}

impl SimpleWorker {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> OpResult + Send + Sync + 'static,
    {
        Self::from_operation(Operation::sync(f))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OpResult> + Send + 'static,
    {
        Self::from_operation(Operation::future(f))
    }

    pub fn from_operation(operation: Operation) -> Self {
        let registry = Registry::new().register(ENTRY, move |_| {
            OperationTable::new().with(ENTRY, operation.clone())
        });
        Self {
            host: Host::threads(registry),
        }
    }

    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        let handle = self.host.create_worker(ENTRY, Captures::new()).await?;
        let result = handle.call(ENTRY, args).await;
        handle.terminate();
        result
    }

    pub async fn call_as<R: DeserializeOwned>(&self, args: impl Serialize) -> Result<R> {
        let handle = self.host.create_worker(ENTRY, Captures::new()).await?;
        let result = handle.call_as(ENTRY, args).await;
        handle.terminate();
        result
    }
}
