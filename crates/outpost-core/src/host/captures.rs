//! Host state made visible to a worker's factory.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::protocol::HostMessage;

pub(crate) type HostCallback = Arc<dyn Fn(Vec<Value>) -> serde_json::Result<Value> + Send + Sync>;

#[derive(Clone)]
enum Capture {
    Value(Value),
    Function(HostCallback),
}

/// Named values and callbacks sent to a worker before its factory runs.
///
/// Callbacks are one-way: the worker's call returns immediately and never
/// sees a result. A callback that returns anything but `()`/`null` is
/// reported as a warning and its value discarded.
#[derive(Clone, Default)]
pub struct Captures {
    entries: Vec<(String, Capture)>,
}

impl Captures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture a JSON value verbatim.
    pub fn value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.push(name.into(), Capture::Value(value));
        self
    }

    /// Capture any serializable value.
    pub fn serialized<T: Serialize>(self, name: impl Into<String>, value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)?;
        Ok(self.value(name, value))
    }

    /// Capture a callback the worker can fire.
    ///
    /// Callbacks run on the session's reader task, which lives as long as the
    /// worker. A callback that owns a [`WorkerHandle`](crate::WorkerHandle) to
    /// its own worker therefore keeps that worker alive until it is
    /// terminated explicitly.
    pub fn function<F, R>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> R + Send + Sync + 'static,
        R: Serialize,
    {
        let callback: HostCallback = Arc::new(move |args| serde_json::to_value(f(args)));
        self.push(name.into(), Capture::Function(callback));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, name: String, capture: Capture) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = capture,
            None => self.entries.push((name, capture)),
        }
    }

    /// Split into the messages to send and the callbacks to keep on the host.
    pub(crate) fn into_parts(self) -> (Vec<HostMessage>, FxHashMap<String, HostCallback>) {
        let mut messages = Vec::with_capacity(self.entries.len());
        let mut callbacks = FxHashMap::default();

        for (name, capture) in self.entries {
            match capture {
                Capture::Value(value) => messages.push(HostMessage::CaptureValue { name, value }),
                Capture::Function(callback) => {
                    messages.push(HostMessage::CaptureFunction { name: name.clone() });
                    callbacks.insert(name, callback);
                }
            }
        }

        (messages, callbacks)
    }
}

impl std::fmt::Debug for Captures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for (name, capture) in &self.entries {
            match capture {
                Capture::Value(value) => list.entry(&format_args!("{} = {}", name, value)),
                Capture::Function(_) => list.entry(&format_args!("{}(..)", name)),
            };
        }
        list.finish()
    }
}

/// What happened to one `invoke-function` on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallbackOutcome {
    /// Ran and returned unit.
    Completed,
    /// Ran and returned something; the value was dropped with a warning.
    Discarded,
    Panicked,
    /// No function was captured under that name.
    Uncaptured,
}

/// Run the host callback for a worker's `invoke-function`.
pub(crate) fn invoke_callback(
    callbacks: &FxHashMap<String, HostCallback>,
    name: &str,
    args: Vec<Value>,
) -> CallbackOutcome {
    let Some(callback) = callbacks.get(name) else {
        tracing::debug!("Ignoring call to uncaptured function '{}'", name);
        return CallbackOutcome::Uncaptured;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| callback(args))) {
        Ok(Ok(Value::Null)) => CallbackOutcome::Completed,
        Ok(Ok(_)) => {
            tracing::warn!(
                "Workers can only capture functions that return unit. \
                 Value returned by function {} is discarded.",
                name
            );
            CallbackOutcome::Discarded
        }
        Ok(Err(e)) => {
            tracing::warn!(
                "Workers can only capture functions that return unit. \
                 Function {} returned a value that could not be serialized: {}",
                name,
                e
            );
            CallbackOutcome::Discarded
        }
        Err(_) => {
            tracing::error!("Captured function '{}' panicked on the host", name);
            CallbackOutcome::Panicked
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    #[test]
    fn test_into_parts_preserves_order_and_kinds() {
        let captures = Captures::new()
            .value("limit", json!(3))
            .function("log", |_| ())
            .value("name", json!("calc"));
        assert_eq!(captures.len(), 3);

        let (messages, callbacks) = captures.into_parts();
        assert_eq!(
            messages,
            vec![
                HostMessage::CaptureValue {
                    name: "limit".to_string(),
                    value: json!(3)
                },
                HostMessage::CaptureFunction {
                    name: "log".to_string()
                },
                HostMessage::CaptureValue {
                    name: "name".to_string(),
                    value: json!("calc")
                },
            ]
        );
        assert!(callbacks.contains_key("log"));
        assert_eq!(callbacks.len(), 1);
    }

    #[test]
    fn test_same_name_replaces_capture() {
        let captures = Captures::new()
            .value("x", json!(1))
            .function("x", |_| ());
        let (messages, callbacks) = captures.into_parts();
        assert_eq!(messages.len(), 1);
        assert!(callbacks.contains_key("x"));
    }

    #[test]
    fn test_serialized_capture() {
        #[derive(Serialize)]
        struct Limits {
            max: u32,
            tags: Vec<&'static str>,
        }

        let captures = Captures::new()
            .serialized("limits", &Limits { max: 4, tags: vec!["a"] })
            .unwrap();
        let (messages, _) = captures.into_parts();
        assert_eq!(
            messages,
            vec![HostMessage::CaptureValue {
                name: "limits".to_string(),
                value: json!({"max": 4, "tags": ["a"]})
            }]
        );
    }

    #[test]
    fn test_invoke_callback_outcomes() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let (_, callbacks) = Captures::new()
            .function("count", move |args: Vec<Value>| {
                counter.fetch_add(args.len(), Ordering::SeqCst);
            })
            .function("returns", |_| "ignored")
            .function("explode", |_| -> () { panic!("host side") })
            .into_parts();

        assert_eq!(
            invoke_callback(&callbacks, "count", vec![json!(1), json!(2)]),
            CallbackOutcome::Completed
        );
        assert_eq!(
            invoke_callback(&callbacks, "returns", vec![]),
            CallbackOutcome::Discarded
        );
        assert_eq!(
            invoke_callback(&callbacks, "explode", vec![]),
            CallbackOutcome::Panicked
        );
        assert_eq!(
            invoke_callback(&callbacks, "missing", vec![]),
            CallbackOutcome::Uncaptured
        );
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unserializable_result_is_discarded_not_unit() {
        // Maps with non-string keys cannot become JSON objects.
        let (_, callbacks) = Captures::new()
            .function("bad", |_| std::collections::HashMap::from([((1, 2), 3)]))
            .into_parts();

        assert_eq!(
            invoke_callback(&callbacks, "bad", vec![]),
            CallbackOutcome::Discarded
        );
    }
}
