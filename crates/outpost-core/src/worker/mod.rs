//! Everything that runs inside a worker.
//!
//! A worker is built from a [`Registry`] entry: the factory receives the
//! host's captures through a [`Scope`] and returns an [`OperationTable`].
//! The [`Dispatcher`] then serves calls against that table.

mod dispatcher;
mod operation;
mod registry;
mod scope;
mod serve;

pub use dispatcher::Dispatcher;
pub use operation::{OpResult, Operation, OperationTable, arg};
pub use registry::{Factory, Registry};
pub use scope::{CapturedFunction, Scope};
pub use serve::{serve, serve_stdio};
