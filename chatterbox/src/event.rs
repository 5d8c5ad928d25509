use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    connection::Outbound,
    packet::{Packet, into_args},
};

/// A named event delivered to listeners, either received from the peer or
/// raised locally (`connect`, `disconnect`, `connect_error`).
#[derive(Debug, Clone)]
pub struct Event {
    name: String,
    args: Vec<Value>,
    responder: Option<Responder>,
}

impl Event {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
            responder: None,
        }
    }

    pub(crate) fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Deserializes the argument at `index`. Negative indices count from
    /// the end, so `-1` is the last argument.
    pub fn arg<T: DeserializeOwned>(&self, index: isize) -> Option<T> {
        let index = if index < 0 {
            self.args.len().checked_sub(index.unsigned_abs())?
        } else {
            index as usize
        };
        let value = self.args.get(index)?;
        T::deserialize(value).ok()
    }

    /// Present when the peer asked for an acknowledgment.
    pub fn responder(&self) -> Option<&Responder> {
        self.responder.as_ref()
    }

    /// Acknowledges the event if the peer asked for it. Returns `false` when
    /// no response was requested or the connection has gone away.
    pub fn ack<A: Serialize>(&self, args: A) -> bool {
        match &self.responder {
            Some(responder) => responder.respond(args),
            None => false,
        }
    }
}

/// Capability bound to one inbound correlation id. Responding sends an
/// `ack` packet with that id over the connection the event arrived on.
#[derive(Debug, Clone)]
pub struct Responder {
    ack_id: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Responder {
    pub(crate) fn new(ack_id: u64, outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { ack_id, outbound }
    }

    pub fn ack_id(&self) -> u64 {
        self.ack_id
    }

    pub fn respond<A: Serialize>(&self, args: A) -> bool {
        let encoded = into_args(args).and_then(|args| {
            Packet::Ack {
                id: self.ack_id,
                args,
            }
            .encode()
        });
        let frame = match encoded {
            Ok(frame) => frame,
            Err(error) => {
                warn!(ack_id = self.ack_id, %error, "failed to encode acknowledgment");
                return false;
            }
        };

        if self.outbound.send(Outbound::Frame(frame)).is_err() {
            debug!(ack_id = self.ack_id, "connection closed before acknowledgment was sent");
            return false;
        }
        true
    }
}
