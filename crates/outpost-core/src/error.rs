//! Error types for outpost-core.

use thiserror::Error;

/// Result type for outpost-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while creating or calling a worker.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// No factory is registered under the requested entry name.
    #[error("unknown worker entry: {0}")]
    UnknownEntry(String),

    /// The worker thread or process could not be started.
    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    /// Channel communication error with the worker.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// A value could not be converted to or from JSON.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(String),

    /// The remote operation failed. Only the message crosses the boundary.
    #[error("{0}")]
    Operation(String),

    /// The worker was terminated before the call completed.
    #[error("worker terminated")]
    Terminated,

    /// The worker's channel closed without an explicit termination.
    #[error("worker exited: {0}")]
    WorkerExited(String),

    /// A configuration value could not be used.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Local misuse of a handle (e.g. an index out of range).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Render the error with a short recovery hint where one applies.
    pub fn with_hint(&self) -> String {
        match self {
            Error::UnknownEntry(name) => format!(
                "{}\n  hint: register a factory named '{}' in the worker's Registry",
                self, name
            ),
            Error::Spawn(_) => format!(
                "{}\n  hint: set OUTPOST_WORKER_PATH or build the outpost-worker binary",
                self
            ),
            Error::WorkerExited(_) => format!(
                "{}\n  hint: run the worker with OUTPOST_LOG=debug to see why it stopped",
                self
            ),
            _ => self.to_string(),
        }
    }

    /// Whether the error came from the remote operation rather than the transport.
    pub fn is_operation(&self) -> bool {
        matches!(self, Error::Operation(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
