//! Request/response RPC over isolated workers.
//!
//! This crate provides:
//! - A host session that calls named worker operations and matches
//!   responses to requests by id
//! - A worker dispatcher that builds its operation table from a factory
//! - Capability captures: host values and host callbacks made visible to
//!   the worker before its factory runs
//! - Thread and child-process transports
//! - Lifecycle tracking, simple one-shot workers and index-addressed workers

pub mod batched;
pub mod config;
pub mod error;
pub mod frame;
pub mod host;
pub mod protocol;
pub mod simple;
pub mod transport;
pub mod worker;

pub use batched::BatchedWorker;
pub use config::{ProcessConfig, ThreadConfig};
pub use error::{Error, Result};
pub use host::{Captures, Host, RemoteOperation, WorkerHandle, WorkerId};
pub use protocol::{HostMessage, RequestId, WorkerMessage};
pub use simple::SimpleWorker;
pub use transport::{Link, ProcessTransport, ThreadTransport, Transport, WorkerResource};
pub use worker::{
    CapturedFunction, Dispatcher, Factory, OpResult, Operation, OperationTable, Registry, Scope,
    arg,
};
