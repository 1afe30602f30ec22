//! Control messages exchanged between a host and its worker.
//!
//! Every message is a JSON object tagged by `action`. Both directions travel
//! as `serde_json::Value` over the transport and are decoded on arrival, so a
//! malformed message is a recoverable decode error rather than a crash.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Correlation id for an `invoke`/`respond` pair.
pub type RequestId = u64;

/// Message sent from host to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum HostMessage {
    /// Call an operation from the worker's table.
    Invoke {
        id: RequestId,
        name: String,
        #[serde(default)]
        args: Vec<Value>,
    },

    /// Install a value into the worker's scope.
    CaptureValue { name: String, value: Value },

    /// Install a stub that forwards calls back to the host.
    CaptureFunction { name: String },

    /// Run the factory and report the operation names.
    InvokeFactory,
}

/// Message sent from worker to host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum WorkerMessage {
    /// Outcome of an `invoke`. Exactly one of `value`/`error` is meaningful;
    /// when both are absent the call resolved to `null`.
    Respond {
        id: RequestId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A captured function was called inside the worker.
    InvokeFunction {
        name: String,
        #[serde(default)]
        args: Vec<Value>,
    },

    /// The names produced by the factory.
    ListFunctions { names: Vec<String> },
}

impl WorkerMessage {
    /// Build a `respond` message from an operation outcome.
    pub fn respond(id: RequestId, outcome: std::result::Result<Value, String>) -> Self {
        match outcome {
            Ok(value) => WorkerMessage::Respond {
                id,
                value: Some(value),
                error: None,
            },
            Err(message) => WorkerMessage::Respond {
                id,
                value: None,
                error: Some(message),
            },
        }
    }
}

/// Encode a message into the value carried by the channel.
pub fn encode<M: Serialize>(message: &M) -> Result<Value> {
    serde_json::to_value(message)
        .map_err(|e| Error::Serialization(format!("Failed to encode control message: {}", e)))
}

/// Decode a channel value into a typed message.
pub fn decode<M: for<'de> Deserialize<'de>>(raw: Value) -> Result<M> {
    serde_json::from_value(raw)
        .map_err(|e| Error::Serialization(format!("Failed to decode control message: {}", e)))
}
