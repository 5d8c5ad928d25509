use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// One message exchanged with the peer. Each packet travels as a single
/// WebSocket text frame shaped like `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Packet {
    Connect {
        id: String,
    },
    Disconnect {
        reason: String,
    },
    Event {
        #[serde(rename = "event")]
        name: String,
        #[serde(default)]
        args: Vec<Value>,
        /// `0` when the sender does not expect a response.
        #[serde(rename = "ackId", default)]
        ack_id: u64,
    },
    Ack {
        id: u64,
        #[serde(default)]
        args: Vec<Value>,
    },
}

impl Packet {
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::Encode)
    }

    pub fn decode(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(Error::MalformedFrame)
    }

    /// Short name of the packet type, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Connect { .. } => "connect",
            Packet::Disconnect { .. } => "disconnect",
            Packet::Event { .. } => "event",
            Packet::Ack { .. } => "ack",
        }
    }
}

/// Converts caller arguments into the positional list carried by a packet.
///
/// Tuples and sequences serialize to JSON arrays and become the list as-is,
/// `()` becomes the empty list, and any other value is sent as the only
/// argument. A lone array argument therefore has to be wrapped in a
/// one-element tuple: `(vec![1, 2],)`.
pub fn into_args<A: Serialize>(args: A) -> Result<Vec<Value>> {
    match serde_json::to_value(args).map_err(Error::Encode)? {
        Value::Array(values) => Ok(values),
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![other]),
    }
}
