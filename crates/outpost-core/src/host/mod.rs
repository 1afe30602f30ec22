//! The host side: creating workers and calling into them.

mod captures;
mod lifecycle;
mod session;

use std::sync::Arc;

use crate::batched::BatchedWorker;
use crate::config::{ProcessConfig, ThreadConfig};
use crate::error::Result;
use crate::transport::{ProcessTransport, ThreadTransport, Transport};
use crate::worker::Registry;

pub use captures::Captures;
pub use lifecycle::WorkerId;
pub use session::{RemoteOperation, WorkerHandle};

use lifecycle::Lifecycle;
use session::Session;

/// Creates workers over one transport and keeps track of them.
///
/// Cloning is cheap; clones share the transport and the set of tracked
/// workers. Tracking is weak: a worker lives exactly as long as some
/// [`WorkerHandle`] to it.
#[derive(Clone)]
pub struct Host {
    transport: Arc<dyn Transport>,
    lifecycle: Arc<Lifecycle>,
}

impl Host {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
            lifecycle: Arc::default(),
        }
    }

    /// Workers on threads of this process, built from `registry`.
    pub fn threads(registry: Registry) -> Self {
        Self::new(ThreadTransport::new(registry))
    }

    pub fn threads_with_config(registry: Registry, config: ThreadConfig) -> Self {
        Self::new(ThreadTransport::with_config(registry, config))
    }

    /// Workers in child processes running the worker executable.
    pub fn processes(config: ProcessConfig) -> Self {
        Self::new(ProcessTransport::new(config))
    }

    /// Start a worker for `entry`.
    ///
    /// Captures are delivered before the factory runs. Resolves once the
    /// worker has reported its operations, so every name in
    /// [`WorkerHandle::names`] is callable.
    pub async fn create_worker(&self, entry: &str, captures: Captures) -> Result<WorkerHandle> {
        let session = Arc::new(Session::start(self.transport.as_ref(), entry, captures).await?);
        self.lifecycle.track(session.id(), Arc::downgrade(&session));
        Ok(WorkerHandle::new(session))
    }

    /// Start a worker whose operations are addressed by position.
    pub async fn create_batched(&self, entry: &str, captures: Captures) -> Result<BatchedWorker> {
        Ok(BatchedWorker::new(self.create_worker(entry, captures).await?))
    }

    /// Stop a worker created by this host.
    ///
    /// Returns `false` if the worker is unknown to this host or was already
    /// terminated.
    pub fn terminate(&self, handle: &WorkerHandle) -> bool {
        let Some(session) = self.lifecycle.get(handle.id()) else {
            return false;
        };
        self.lifecycle.forget(session.id());
        session.terminate()
    }

    /// Stop every live worker. Returns how many were still running.
    pub fn terminate_all(&self) -> usize {
        let sessions = self.lifecycle.drain();
        let stopped = sessions.iter().filter(|session| session.terminate()).count();
        if stopped > 0 {
            tracing::info!("Terminated {} worker(s)", stopped);
        }
        stopped
    }

    /// Workers created by this host that still accept calls.
    pub fn live_workers(&self) -> usize {
        self.lifecycle.live()
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("live_workers", &self.live_workers())
            .finish_non_exhaustive()
    }
}
