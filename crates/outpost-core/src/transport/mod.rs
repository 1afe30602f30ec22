//! Worker creation primitives.
//!
//! A [`Transport`] starts one isolated worker for a named entry and hands
//! back a [`Link`]: a duplex channel of JSON values plus the resource that
//! keeps the worker alive.

mod process;
mod thread;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

pub use process::ProcessTransport;
pub use thread::ThreadTransport;

/// Starts workers.
pub trait Transport: Send + Sync {
    /// Spawn a worker running `entry`.
    ///
    /// Must be polled from within a tokio runtime.
    fn open<'a>(&'a self, entry: &'a str) -> BoxFuture<'a, Result<Link>>;
}

/// The isolated execution context behind a link.
///
/// Dropping the resource must stop the worker.
pub trait WorkerResource: Send + Sync {
    /// Stop the worker immediately. Idempotent.
    fn terminate(&self);

    fn is_alive(&self) -> bool;

    /// Short human-readable label, e.g. `process 4242`.
    fn describe(&self) -> String;
}

/// One open channel to a worker.
pub struct Link {
    /// Host → worker messages.
    pub outbound: mpsc::UnboundedSender<Value>,
    /// Worker → host messages. Closes when the worker stops.
    pub inbound: mpsc::UnboundedReceiver<Value>,
    pub resource: Box<dyn WorkerResource>,
}
