//! Workers whose operations are addressed by position.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::host::WorkerHandle;

/// A worker whose operations are called by index instead of by name.
///
/// Indices follow the order in which the factory inserted operations.
#[derive(Debug, Clone)]
pub struct BatchedWorker {
    handle: WorkerHandle,
}

impl BatchedWorker {
    pub fn new(handle: WorkerHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &WorkerHandle {
        &self.handle
    }

    pub fn len(&self) -> usize {
        self.handle.names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handle.names().is_empty()
    }

    /// Name of the operation at `index`.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.handle.names().get(index).map(String::as_str)
    }

    pub async fn call(&self, index: usize, args: Vec<Value>) -> Result<Value> {
        let name = self.resolve(index)?;
        self.handle.call(name, args).await
    }

    pub async fn call_as<R: DeserializeOwned>(
        &self,
        index: usize,
        args: impl Serialize,
    ) -> Result<R> {
        let name = self.resolve(index)?;
        self.handle.call_as(name, args).await
    }

    pub fn terminate(&self) {
        self.handle.terminate();
    }

    fn resolve(&self, index: usize) -> Result<&str> {
        self.name(index).ok_or_else(|| {
            Error::InvalidOperation(format!(
                "operation index {} out of range for worker with {} operation(s)",
                index,
                self.len()
            ))
        })
    }
}
