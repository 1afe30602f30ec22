//! Host-provided bindings visible to a worker's factory.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::{self, WorkerMessage};

/// The environment a factory runs in: every capture the host sent before
/// `invoke-factory`.
#[derive(Clone, Default)]
pub struct Scope {
    values: FxHashMap<String, Value>,
    functions: FxHashMap<String, CapturedFunction>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value capture. Useful for exercising a factory directly.
    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert_value(name.into(), value);
        self
    }

    /// A captured value, exactly as the host sent it.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// A captured value converted to `T`; `None` if absent or of the wrong shape.
    pub fn value_as<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let value = self.values.get(name)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Captured value '{}' has an unexpected shape: {}", name, e);
                None
            }
        }
    }

    /// A stub forwarding to a host callback.
    pub fn function(&self, name: &str) -> Option<CapturedFunction> {
        self.functions.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.functions.is_empty()
    }

    pub(crate) fn insert_value(&mut self, name: String, value: Value) {
        // A name is either a value or a function, whichever came last.
        self.functions.remove(&name);
        self.values.insert(name, value);
    }

    pub(crate) fn insert_function(&mut self, name: String, outbound: mpsc::UnboundedSender<Value>) {
        self.values.remove(&name);
        let stub = CapturedFunction {
            name: Arc::from(name.as_str()),
            outbound,
        };
        self.functions.insert(name, stub);
    }
}

/// Worker-side stub for a host callback.
///
/// Calling it only queues an `invoke-function` notification; it never waits
/// for the host and never yields a result.
#[derive(Clone)]
pub struct CapturedFunction {
    name: Arc<str>,
    outbound: mpsc::UnboundedSender<Value>,
}

impl CapturedFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: Vec<Value>) {
        let message = WorkerMessage::InvokeFunction {
            name: self.name.to_string(),
            args,
        };
        let value = match protocol::encode(&message) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(
                    "Failed to encode call to captured function '{}': {}",
                    self.name,
                    e
                );
                return;
            }
        };
        if self.outbound.send(value).is_err() {
            tracing::debug!(
                "Host channel closed; dropping call to captured function '{}'",
                self.name
            );
        }
    }
}

impl std::fmt::Debug for CapturedFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedFunction")
            .field("name", &self.name)
            .finish()
    }
}
