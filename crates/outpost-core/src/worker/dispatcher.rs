//! Worker-side message loop.
//!
//! The dispatcher owns the capture scope until the factory runs, then the
//! operation table. Synchronous operations run inline in arrival order;
//! asynchronous ones are polled next to the inbound channel so a slow call
//! does not block later messages.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::{self, HostMessage, RequestId, WorkerMessage};

use super::operation::{OpResult, Operation, OperationTable};
use super::registry::Factory;
use super::scope::Scope;

enum State {
    /// Channel open, captures accumulating.
    Uninitialized(Scope),
    /// Factory has run.
    Ready(OperationTable),
}

/// Interprets host control messages for one worker.
pub struct Dispatcher {
    factory: Factory,
    state: State,
    outbound: mpsc::UnboundedSender<Value>,
    in_flight: FuturesUnordered<BoxFuture<'static, (RequestId, OpResult)>>,
}

impl Dispatcher {
    pub fn new(factory: Factory, outbound: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            factory,
            state: State::Uninitialized(Scope::new()),
            outbound,
            in_flight: FuturesUnordered::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    /// Process messages until the inbound channel closes or `shutdown` resolves.
    ///
    /// Asynchronous operations still in flight at that point are dropped.
    pub async fn run<S>(mut self, mut inbound: mpsc::UnboundedReceiver<Value>, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::debug!(
                        "Worker shutting down with {} operation(s) in flight",
                        self.in_flight.len()
                    );
                    break;
                }

                Some((id, outcome)) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.send(WorkerMessage::respond(id, outcome));
                }

                message = inbound.recv() => match message {
                    Some(raw) => self.handle(raw),
                    None => {
                        tracing::debug!("Host channel closed; worker exiting");
                        break;
                    }
                },
            }
        }
    }

    /// Handle one raw control message.
    pub fn handle(&mut self, raw: Value) {
        let message: HostMessage = match protocol::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Ignoring unrecognized control message: {}", e);
                return;
            }
        };

        match message {
            HostMessage::CaptureValue { name, value } => match &mut self.state {
                State::Uninitialized(scope) => scope.insert_value(name, value),
                State::Ready(_) => {
                    tracing::warn!("Ignoring capture of '{}' received after the factory ran", name)
                }
            },
            HostMessage::CaptureFunction { name } => match &mut self.state {
                State::Uninitialized(scope) => scope.insert_function(name, self.outbound.clone()),
                State::Ready(_) => {
                    tracing::warn!("Ignoring capture of '{}' received after the factory ran", name)
                }
            },
            HostMessage::InvokeFactory => self.invoke_factory(),
            HostMessage::Invoke { id, name, args } => self.invoke(id, name, args),
        }
    }

    fn invoke_factory(&mut self) {
        let scope = match &mut self.state {
            State::Uninitialized(scope) => std::mem::take(scope),
            State::Ready(_) => {
                tracing::warn!(
                    "Ignoring repeated invoke-factory; the factory runs once per worker"
                );
                return;
            }
        };

        let factory = self.factory.clone();
        let table = match panic::catch_unwind(AssertUnwindSafe(|| factory(&scope))) {
            Ok(table) => table,
            Err(payload) => {
                tracing::error!(
                    "Worker factory panicked: {}; exposing no operations",
                    panic_message(&*payload)
                );
                OperationTable::new()
            }
        };

        let names = table.names().to_vec();
        tracing::debug!("Factory produced {} operation(s): {:?}", names.len(), names);
        self.state = State::Ready(table);
        self.send(WorkerMessage::ListFunctions { names });
    }

    fn invoke(&mut self, id: RequestId, name: String, args: Vec<Value>) {
        let State::Ready(table) = &self.state else {
            self.send(WorkerMessage::respond(
                id,
                Err("worker has not been initialized".to_string()),
            ));
            return;
        };

        let Some(operation) = table.get(&name).cloned() else {
            self.send(WorkerMessage::respond(
                id,
                Err(format!("unknown operation '{}'", name)),
            ));
            return;
        };

        match operation {
            Operation::Sync(f) => {
                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| f(args))) {
                    Ok(outcome) => outcome,
                    Err(payload) => Err(panicked(&name, &*payload)),
                };
                self.send(WorkerMessage::respond(id, outcome));
            }
            Operation::Async(f) => {
                let future = match panic::catch_unwind(AssertUnwindSafe(|| f(args))) {
                    Ok(future) => future,
                    Err(payload) => {
                        self.send(WorkerMessage::respond(id, Err(panicked(&name, &*payload))));
                        return;
                    }
                };
                self.in_flight.push(
                    async move {
                        let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                            Ok(outcome) => outcome,
                            Err(payload) => Err(panicked(&name, &*payload)),
                        };
                        (id, outcome)
                    }
                    .boxed(),
                );
            }
        }
    }

    fn send(&self, message: WorkerMessage) {
        let value = match protocol::encode(&message) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to encode worker message: {}", e);
                return;
            }
        };
        if self.outbound.send(value).is_err() {
            tracing::debug!("Host channel closed; dropping worker message");
        }
    }
}

fn panicked(name: &str, payload: &(dyn Any + Send)) -> String {
    format!("operation '{}' panicked: {}", name, panic_message(payload))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use crate::worker::operation::arg;

    fn math_factory() -> Factory {
        Arc::new(|scope: &Scope| {
            let offset = scope.value_as::<i64>("offset").unwrap_or(0);
            OperationTable::new()
                .with_sync("square", |args| {
                    let x: i64 = arg(&args, 0)?;
                    Ok(json!(x * x))
                })
                .with_sync("offset", move |_| Ok(json!(offset)))
                .with_sync("fail", |_| Err("boom".to_string()))
                .with_sync("explode", |_| panic!("kaboom"))
        })
    }

    fn dispatcher() -> (Dispatcher, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Dispatcher::new(math_factory(), tx), rx)
    }

    #[test]
    fn test_factory_reports_names_in_order() {
        let (mut d, mut rx) = dispatcher();
        d.handle(json!({"action": "invoke-factory"}));

        assert!(d.is_ready());
        assert_eq!(
            rx.try_recv().unwrap(),
            json!({"action": "list-functions", "names": ["square", "offset", "fail", "explode"]})
        );
    }

    #[test]
    fn test_invoke_success_and_failure() {
        let (mut d, mut rx) = dispatcher();
        d.handle(json!({"action": "invoke-factory"}));
        rx.try_recv().unwrap();

        d.handle(json!({"action": "invoke", "id": 0, "name": "square", "args": [5]}));
        assert_eq!(
            rx.try_recv().unwrap(),
            json!({"action": "respond", "id": 0, "value": 25})
        );

        d.handle(json!({"action": "invoke", "id": 1, "name": "fail", "args": []}));
        assert_eq!(
            rx.try_recv().unwrap(),
            json!({"action": "respond", "id": 1, "error": "boom"})
        );
    }

    #[test]
    fn test_unknown_operation_is_an_error_response() {
        let (mut d, mut rx) = dispatcher();
        d.handle(json!({"action": "invoke-factory"}));
        rx.try_recv().unwrap();

        d.handle(json!({"action": "invoke", "id": 4, "name": "cube", "args": [2]}));
        assert_eq!(
            rx.try_recv().unwrap(),
            json!({"action": "respond", "id": 4, "error": "unknown operation 'cube'"})
        );
    }

    #[test]
    fn test_invoke_before_factory_is_an_error_response() {
        let (mut d, mut rx) = dispatcher();
        d.handle(json!({"action": "invoke", "id": 0, "name": "square", "args": [5]}));
        assert_eq!(
            rx.try_recv().unwrap(),
            json!({"action": "respond", "id": 0, "error": "worker has not been initialized"})
        );
    }

    #[test]
    fn test_panicking_operation_reported_not_fatal() {
        let (mut d, mut rx) = dispatcher();
        d.handle(json!({"action": "invoke-factory"}));
        rx.try_recv().unwrap();

        d.handle(json!({"action": "invoke", "id": 0, "name": "explode"}));
        assert_eq!(
            rx.try_recv().unwrap(),
            json!({"action": "respond", "id": 0, "error": "operation 'explode' panicked: kaboom"})
        );

        // Still serving.
        d.handle(json!({"action": "invoke", "id": 1, "name": "square", "args": [3]}));
        assert_eq!(
            rx.try_recv().unwrap(),
            json!({"action": "respond", "id": 1, "value": 9})
        );
    }

    #[test]
    fn test_malformed_messages_ignored() {
        let (mut d, mut rx) = dispatcher();
        d.handle(json!({"action": "reboot"}));
        d.handle(json!("just a string"));
        d.handle(json!({"action": "invoke", "id": "not-a-number"}));
        assert!(rx.try_recv().is_err());

        d.handle(json!({"action": "invoke-factory"}));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_captures_visible_to_factory() {
        let (mut d, mut rx) = dispatcher();
        d.handle(json!({"action": "capture-value", "name": "offset", "value": 7}));
        d.handle(json!({"action": "invoke-factory"}));
        rx.try_recv().unwrap();

        d.handle(json!({"action": "invoke", "id": 0, "name": "offset"}));
        assert_eq!(
            rx.try_recv().unwrap(),
            json!({"action": "respond", "id": 0, "value": 7})
        );
    }

    #[test]
    fn test_capture_after_factory_ignored() {
        let (mut d, mut rx) = dispatcher();
        d.handle(json!({"action": "invoke-factory"}));
        rx.try_recv().unwrap();

        d.handle(json!({"action": "capture-value", "name": "offset", "value": 99}));
        d.handle(json!({"action": "capture-function", "name": "log"}));
        assert!(rx.try_recv().is_err());

        d.handle(json!({"action": "invoke", "id": 0, "name": "offset"}));
        assert_eq!(
            rx.try_recv().unwrap(),
            json!({"action": "respond", "id": 0, "value": 0})
        );
    }

    #[test]
    fn test_second_invoke_factory_ignored() {
        let (mut d, mut rx) = dispatcher();
        d.handle(json!({"action": "invoke-factory"}));
        rx.try_recv().unwrap();

        d.handle(json!({"action": "invoke-factory"}));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_panicking_factory_yields_empty_table() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let factory: Factory = Arc::new(|_: &Scope| -> OperationTable { panic!("bad factory") });
        let mut d = Dispatcher::new(factory, tx);

        d.handle(json!({"action": "invoke-factory"}));
        assert_eq!(
            rx.try_recv().unwrap(),
            json!({"action": "list-functions", "names": []})
        );
    }

    #[tokio::test]
    async fn test_async_operations_complete_out_of_order() {
        let factory: Factory = Arc::new(|_: &Scope| {
            OperationTable::new().with_async("sleep", |args| async move {
                let ms: u64 = arg(&args, 0)?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, String>(json!(ms))
            })
        });
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(factory, out_tx);
        let task = tokio::spawn(dispatcher.run(in_rx, std::future::pending()));

        in_tx.send(json!({"action": "invoke-factory"})).unwrap();
        out_rx.recv().await.unwrap();

        in_tx.send(json!({"action": "invoke", "id": 0, "name": "sleep", "args": [200]})).unwrap();
        in_tx.send(json!({"action": "invoke", "id": 1, "name": "sleep", "args": [10]})).unwrap();

        assert_eq!(
            out_rx.recv().await.unwrap(),
            json!({"action": "respond", "id": 1, "value": 10})
        );
        assert_eq!(
            out_rx.recv().await.unwrap(),
            json!({"action": "respond", "id": 0, "value": 200})
        );

        drop(in_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_drops_in_flight_operations() {
        let factory: Factory = Arc::new(|_: &Scope| {
            OperationTable::new().with_async("forever", |_| async {
                std::future::pending::<()>().await;
                Ok(Value::Null)
            })
        });
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(Dispatcher::new(factory, out_tx).run(in_rx, async move {
            let _ = stop_rx.await;
        }));

        in_tx.send(json!({"action": "invoke-factory"})).unwrap();
        out_rx.recv().await.unwrap();
        in_tx.send(json!({"action": "invoke", "id": 0, "name": "forever"})).unwrap();

        stop_tx.send(()).unwrap();
        task.await.unwrap();

        // The dispatcher dropped its sender without answering.
        assert_eq!(out_rx.recv().await, None);
    }
}
