//! One host-side channel to a worker.
//!
//! A session owns the worker resource, the outbound sender and a table of
//! pending calls keyed by request id. A reader task drains the inbound side:
//! it resolves pending calls, runs captured host callbacks and reports the
//! worker's operation names once the factory has run.

use std::sync::{Arc, Mutex, PoisonError};

use rustc_hash::FxHashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::{self, HostMessage, RequestId, WorkerMessage};
use crate::transport::{Link, Transport, WorkerResource};

use super::captures::{self, Captures, HostCallback};
use super::lifecycle::WorkerId;

struct PendingCall {
    name: String,
    responder: oneshot::Sender<Result<Value>>,
}

/// Calls awaiting a response. Never held across an `.await`.
#[derive(Default)]
struct PendingTable {
    next_id: RequestId,
    calls: FxHashMap<RequestId, PendingCall>,
    /// Set once the session stops accepting calls; the first reason wins.
    closed: Option<Error>,
}

impl PendingTable {
    fn close(&mut self, reason: Error) {
        if self.closed.is_none() {
            self.closed = Some(reason);
        }
        let Some(reason) = self.closed.clone() else {
            return;
        };
        for (id, call) in self.calls.drain() {
            tracing::debug!("Rejecting call {} to '{}': {}", id, call.name, reason);
            let _ = call.responder.send(Err(reason.clone()));
        }
    }
}

type Pending = Arc<Mutex<PendingTable>>;

fn lock(pending: &Pending) -> std::sync::MutexGuard<'_, PendingTable> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct Session {
    id: WorkerId,
    entry: String,
    names: Vec<String>,
    outbound: mpsc::UnboundedSender<Value>,
    pending: Pending,
    resource: Box<dyn WorkerResource>,
    reader: JoinHandle<()>,
}

impl Session {
    /// Open a worker, send its captures, run its factory and wait for its names.
    pub(crate) async fn start(
        transport: &dyn Transport,
        entry: &str,
        captures: Captures,
    ) -> Result<Self> {
        let Link {
            outbound,
            inbound,
            resource,
        } = transport.open(entry).await?;

        let (messages, callbacks) = captures.into_parts();
        let pending: Pending = Arc::default();
        let (ready_tx, ready_rx) = oneshot::channel();

        // The reader must be running before anything is sent.
        let reader = tokio::spawn(read_loop(
            inbound,
            Arc::clone(&pending),
            callbacks,
            ready_tx,
        ));

        let mut session = Self {
            id: WorkerId::new(),
            entry: entry.to_string(),
            names: Vec::new(),
            outbound,
            pending,
            resource,
            reader,
        };

        for message in messages.into_iter().chain([HostMessage::InvokeFactory]) {
            // A send failure means the worker is gone; the reader reports it below.
            let _ = session.outbound.send(protocol::encode(&message)?);
        }

        match ready_rx.await {
            Ok(names) => {
                session.names = names;
                tracing::debug!(
                    "Worker {} ({}) ready with operations {:?}",
                    session.id,
                    session.resource.describe(),
                    session.names
                );
                Ok(session)
            }
            Err(_) => Err(Error::WorkerExited(format!(
                "{} for entry '{}' closed before reporting its operations",
                session.resource.describe(),
                entry
            ))),
        }
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) fn entry(&self) -> &str {
        &self.entry
    }

    pub(crate) fn names(&self) -> &[String] {
        &self.names
    }

    pub(crate) async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let response = {
            let mut table = lock(&self.pending);
            if let Some(reason) = &table.closed {
                return Err(reason.clone());
            }

            let id = table.next_id;
            let message = protocol::encode(&HostMessage::Invoke {
                id,
                name: name.to_string(),
                args,
            })?;

            let (responder, response) = oneshot::channel();
            table.next_id += 1;
            table.calls.insert(
                id,
                PendingCall {
                    name: name.to_string(),
                    responder,
                },
            );

            if self.outbound.send(message).is_err() {
                table.calls.remove(&id);
                return Err(Error::WorkerExited(format!(
                    "{} is no longer reading messages",
                    self.resource.describe()
                )));
            }
            response
        };

        // The responder is only dropped unanswered if the table is gone.
        response.await.unwrap_or(Err(Error::Terminated))
    }

    /// Stop the worker and reject everything pending. Returns whether the
    /// session was still accepting calls.
    pub(crate) fn terminate(&self) -> bool {
        let was_open = {
            let mut table = lock(&self.pending);
            let was_open = table.closed.is_none();
            table.close(Error::Terminated);
            was_open
        };
        if was_open {
            tracing::debug!("Terminating worker {} ({})", self.id, self.resource.describe());
        }
        self.resource.terminate();
        was_open
    }

    /// Whether the session no longer accepts calls, through termination or exit.
    pub(crate) fn is_terminated(&self) -> bool {
        lock(&self.pending).closed.is_some()
    }

    pub(crate) fn is_alive(&self) -> bool {
        !self.is_terminated() && self.resource.is_alive()
    }

    pub(crate) fn pending_calls(&self) -> usize {
        lock(&self.pending).calls.len()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        lock(&self.pending).close(Error::Terminated);
        self.resource.terminate();
        self.reader.abort();
    }
}

async fn read_loop(
    mut inbound: mpsc::UnboundedReceiver<Value>,
    pending: Pending,
    callbacks: FxHashMap<String, HostCallback>,
    ready: oneshot::Sender<Vec<String>>,
) {
    let mut ready = Some(ready);

    while let Some(raw) = inbound.recv().await {
        let message = match protocol::decode::<WorkerMessage>(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Ignoring malformed message from worker: {}", e);
                continue;
            }
        };

        match message {
            WorkerMessage::Respond { id, value, error } => {
                let call = lock(&pending).calls.remove(&id);
                let Some(call) = call else {
                    tracing::debug!("Ignoring response for unknown request {}", id);
                    continue;
                };
                let outcome = match error {
                    Some(message) => Err(Error::Operation(message)),
                    None => Ok(value.unwrap_or(Value::Null)),
                };
                // The caller may have stopped waiting.
                let _ = call.responder.send(outcome);
            }
            WorkerMessage::InvokeFunction { name, args } => {
                let outcome = captures::invoke_callback(&callbacks, &name, args);
                tracing::trace!("Captured function '{}': {:?}", name, outcome);
            }
            WorkerMessage::ListFunctions { names } => match ready.take() {
                Some(ready) => {
                    let _ = ready.send(names);
                }
                None => tracing::warn!("Ignoring repeated operation list from worker"),
            },
        }
    }

    tracing::debug!("Worker channel closed");
    lock(&pending).close(Error::WorkerExited("worker channel closed".to_string()));
}

/// Handle to a running worker.
///
/// Clones share the same worker. When the last clone (and every
/// [`RemoteOperation`] taken from it) is dropped, the worker is terminated.
#[derive(Clone)]
pub struct WorkerHandle {
    session: Arc<Session>,
}

impl WorkerHandle {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn id(&self) -> WorkerId {
        self.session.id()
    }

    /// The registry entry this worker was built from.
    pub fn entry(&self) -> &str {
        self.session.entry()
    }

    /// Operation names reported by the worker, in factory order.
    pub fn names(&self) -> &[String] {
        self.session.names()
    }

    /// Call an operation by name.
    ///
    /// An error returned by the operation comes back as
    /// [`Error::Operation`] carrying only its message.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.session.call(name, args).await
    }

    /// Call with serializable arguments and deserialize the result.
    ///
    /// A JSON array is spread into positional arguments, `()` sends none and
    /// any other value is sent as the only argument.
    pub async fn call_as<R: DeserializeOwned>(
        &self,
        name: &str,
        args: impl Serialize,
    ) -> Result<R> {
        let args = into_args(&args)?;
        let value = self.session.call(name, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// A callable bound to one reported operation.
    pub fn operation(&self, name: &str) -> Option<RemoteOperation> {
        self.session.names().iter().any(|n| n == name).then(|| RemoteOperation {
            session: Arc::clone(&self.session),
            name: name.to_string(),
        })
    }

    /// Stop the worker. Pending and later calls fail with [`Error::Terminated`].
    pub fn terminate(&self) {
        self.session.terminate();
    }

    pub fn is_alive(&self) -> bool {
        self.session.is_alive()
    }

    pub fn is_terminated(&self) -> bool {
        self.session.is_terminated()
    }

    /// Calls sent and not yet answered.
    pub fn pending_calls(&self) -> usize {
        self.session.pending_calls()
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.session.id())
            .field("entry", &self.session.entry())
            .field("names", &self.session.names())
            .finish()
    }
}

/// One operation of a worker, callable on its own.
///
/// Keeps the worker alive like a [`WorkerHandle`] does.
#[derive(Clone)]
pub struct RemoteOperation {
    session: Arc<Session>,
    name: String,
}

impl RemoteOperation {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        self.session.call(&self.name, args).await
    }

    pub async fn call_as<R: DeserializeOwned>(&self, args: impl Serialize) -> Result<R> {
        let value = self.session.call(&self.name, into_args(&args)?).await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl std::fmt::Debug for RemoteOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RemoteOperation({} on {})", self.name, self.session.id())
    }
}

fn into_args<A: Serialize>(args: &A) -> Result<Vec<Value>> {
    Ok(match serde_json::to_value(args)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    })
}
