//! Workers on dedicated OS threads.
//!
//! Each worker owns a thread running a single-threaded tokio runtime. Values
//! still cross the boundary as JSON, so operations observe the same copy
//! semantics as process workers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use crate::config::ThreadConfig;
use crate::error::{Error, Result};
use crate::worker::{Dispatcher, Factory, Registry};

use super::{Link, Transport, WorkerResource};

/// Spawns thread workers from an in-memory registry.
pub struct ThreadTransport {
    registry: Registry,
    config: ThreadConfig,
    spawned: AtomicU64,
}

impl ThreadTransport {
    pub fn new(registry: Registry) -> Self {
        Self::with_config(registry, ThreadConfig::default())
    }

    pub fn with_config(registry: Registry, config: ThreadConfig) -> Self {
        Self {
            registry,
            config,
            spawned: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    async fn spawn(&self, factory: Factory) -> Result<Link> {
        let seq = self.spawned.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", self.config.name_prefix, seq);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (init_tx, init_rx) = oneshot::channel::<std::result::Result<(), String>>();
        let alive = Arc::new(AtomicBool::new(true));

        let mut builder = std::thread::Builder::new().name(name.clone());
        if let Some(size) = self.config.stack_size {
            builder = builder.stack_size(size);
        }

        let alive_flag = Arc::clone(&alive);
        builder
            .spawn(move || {
                let _alive = AliveGuard(alive_flag);

                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => {
                        let _ = init_tx.send(Ok(()));
                        runtime
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e.to_string()));
                        return;
                    }
                };

                runtime.block_on(Dispatcher::new(factory, inbound_tx).run(outbound_rx, async move {
                    // Resolves on an explicit terminate or when the resource is dropped.
                    let _ = shutdown_rx.await;
                }));
            })
            .map_err(|e| {
                Error::Spawn(format!("Failed to spawn worker thread '{}': {}", name, e))
            })?;

        match init_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(Error::Spawn(format!(
                    "Failed to build runtime for worker thread '{}': {}",
                    name, e
                )));
            }
            Err(_) => {
                return Err(Error::Spawn(format!(
                    "Worker thread '{}' exited during initialization",
                    name
                )));
            }
        }

        tracing::debug!("Spawned worker thread '{}'", name);
        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
            resource: Box::new(ThreadWorker {
                name,
                shutdown: Mutex::new(Some(shutdown_tx)),
                alive,
            }),
        })
    }
}

impl Transport for ThreadTransport {
    fn open<'a>(&'a self, entry: &'a str) -> BoxFuture<'a, Result<Link>> {
        async move {
            let factory = self
                .registry
                .get(entry)
                .ok_or_else(|| Error::UnknownEntry(entry.to_string()))?;
            self.spawn(factory).await
        }
        .boxed()
    }
}

/// Clears the liveness flag however the thread exits.
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to a worker thread.
///
/// A thread cannot be preempted: if it is inside a synchronous operation
/// when terminated, it stops once that operation returns.
struct ThreadWorker {
    name: String,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    alive: Arc<AtomicBool>,
}

impl WorkerResource for ThreadWorker {
    fn terminate(&self) {
        let sender = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            tracing::debug!("Terminating worker thread '{}'", self.name);
            let _ = sender.send(());
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn describe(&self) -> String {
        format!("thread {}", self.name)
    }
}
