//! Connection lifecycle.
//!
//! A [`Connection`] owns at most one live WebSocket at a time. Calling
//! [`Connection::connect`] spawns a driver task that performs the handshake
//! and then selects between inbound frames and the outbound queue. The driver
//! reports everything it sees back to the `Connection`, which decodes
//! frames, moves between [`ConnectionState`]s and fans out to the event bus
//! and the ack correlator.
//!
//! Every connect bumps a generation counter. Notifications tagged with an
//! older generation come from a transport that has already been replaced and
//! are dropped.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::{select, sync::mpsc};
use tracing::{debug, error, info, warn};

use crate::{
    ack::{AckCallback, AckCorrelator},
    event::{Event, Responder},
    event_bus::EventBus,
    packet::Packet,
    transport::{self, WsMessage},
};

pub const CONNECT_EVENT: &str = "connect";
pub const DISCONNECT_EVENT: &str = "disconnect";
pub const CONNECT_ERROR_EVENT: &str = "connect_error";

pub const SERVER_DISCONNECTED: &str = "socket server disconnected";
pub const CLIENT_DISCONNECTED: &str = "client disconnected";
pub const DRIVER_STOPPED: &str = "connection driver stopped";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Transport handshake in flight or waiting for the peer's `connect` packet.
    Connecting,
    Connected,
}

/// Work queued for the driver task.
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(String),
    Close,
}

pub(crate) struct Connection {
    url: String,
    bus: EventBus,
    acks: AckCorrelator,
    link: Mutex<Link>,
}

struct Link {
    state: ConnectionState,
    id: Option<String>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    generation: u64,
}

impl Connection {
    pub(crate) fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bus: EventBus::new(),
            acks: AckCorrelator::new(),
            link: Mutex::new(Link {
                state: ConnectionState::Disconnected,
                id: None,
                outbound: None,
                generation: 0,
            }),
        }
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub(crate) fn acks(&self) -> &AckCorrelator {
        &self.acks
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.link.lock().state
    }

    pub(crate) fn id(&self) -> Option<String> {
        self.link.lock().id.clone()
    }

    /// Starts a new transport unless one is already connecting or connected.
    pub(crate) fn connect(self: &Arc<Self>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                error!(url = %self.url, error = %err, "connect requires a running Tokio runtime");
                return;
            }
        };

        let Some((generation, outbound_rx)) = self.begin_connecting() else {
            debug!(url = %self.url, "connect ignored, connection already active");
            return;
        };

        debug!(url = %self.url, generation, "opening transport");
        runtime.spawn(drive(Arc::clone(self), generation, outbound_rx));
    }

    fn begin_connecting(&self) -> Option<(u64, mpsc::UnboundedReceiver<Outbound>)> {
        let mut link = self.link.lock();
        if link.state != ConnectionState::Disconnected {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        link.generation += 1;
        link.state = ConnectionState::Connecting;
        link.outbound = Some(tx);
        Some((link.generation, rx))
    }

    /// Asks the driver to close the transport. The state changes once the
    /// driver reports the close.
    pub(crate) fn disconnect(&self) {
        let link = self.link.lock();
        if link.state == ConnectionState::Disconnected {
            return;
        }
        if let Some(outbound) = &link.outbound {
            let _ = outbound.send(Outbound::Close);
        }
    }

    /// Queues an `event` packet. Returns `false` without sending anything
    /// unless the session is established.
    pub(crate) fn send_event(&self, name: &str, args: Vec<Value>, ack: Option<AckCallback>) -> bool {
        // Declared before the link guard so an unsent callback is dropped
        // after the lock is released.
        let unsent: Option<AckCallback>;
        // Hold the link so a concurrent teardown cannot clear the ack table
        // between registering the callback and queueing the frame.
        let link = self.link.lock();
        if link.state != ConnectionState::Connected {
            return false;
        }
        let Some(outbound) = &link.outbound else {
            return false;
        };

        let ack_id = ack.map_or(0, |callback| self.acks.register_pending(callback));
        let packet = Packet::Event {
            name: name.to_string(),
            args,
            ack_id,
        };
        let queued = match packet.encode() {
            Ok(frame) => outbound.send(Outbound::Frame(frame)).is_ok(),
            Err(error) => {
                warn!(event = name, %error, "failed to encode event");
                false
            }
        };
        if !queued && ack_id > 0 {
            unsent = self.acks.cancel(ack_id);
            debug!(event = name, ack_id, dropped = unsent.is_some(), "event not queued");
        }
        queued
    }

    fn is_current(&self, generation: u64) -> bool {
        let link = self.link.lock();
        link.generation == generation && link.state != ConnectionState::Disconnected
    }

    pub(crate) fn handle_open(&self, generation: u64) {
        debug!(url = %self.url, generation, "transport open, waiting for connect packet");
    }

    pub(crate) fn handle_frame(&self, generation: u64, frame: &str) {
        if !self.is_current(generation) {
            debug!(generation, "dropping frame from replaced transport");
            return;
        }

        let packet = match Packet::decode(frame) {
            Ok(packet) => packet,
            Err(error) => {
                warn!(%error, frame, "dropping malformed frame");
                return;
            }
        };
        debug!(kind = packet.kind(), "received packet");

        match packet {
            Packet::Connect { id } => self.handle_connect_packet(generation, id),
            Packet::Disconnect { reason } => self.teardown(generation, reason),
            Packet::Event { name, args, ack_id } => {
                self.handle_event_packet(generation, name, args, ack_id)
            }
            Packet::Ack { id, args } => {
                if self.state() != ConnectionState::Connected {
                    debug!(ack_id = id, "dropping ack received before connect");
                    return;
                }
                self.acks.resolve(id, args);
            }
        }
    }

    fn handle_connect_packet(&self, generation: u64, id: String) {
        {
            let mut link = self.link.lock();
            if link.generation != generation || link.state != ConnectionState::Connecting {
                debug!(id, state = ?link.state, "ignoring unexpected connect packet");
                return;
            }
            link.state = ConnectionState::Connected;
            link.id = Some(id.clone());
        }

        info!(url = %self.url, id, "connected");
        self.bus
            .dispatch(&Event::new(CONNECT_EVENT, vec![Value::String(id)]));
    }

    fn handle_event_packet(&self, generation: u64, name: String, args: Vec<Value>, ack_id: u64) {
        let responder = {
            let link = self.link.lock();
            if link.generation != generation || link.state != ConnectionState::Connected {
                debug!(event = name, "dropping event received before connect");
                return;
            }
            match (&link.outbound, ack_id) {
                (Some(outbound), id) if id > 0 => Some(Responder::new(id, outbound.clone())),
                _ => None,
            }
        };

        let mut event = Event::new(name, args);
        if let Some(responder) = responder {
            event = event.with_responder(responder);
        }
        self.bus.dispatch(&event);
    }

    /// The driver lost its transport, either by closing it or on error.
    pub(crate) fn handle_transport_closed(&self, generation: u64, reason: String) {
        self.teardown(generation, reason);
    }

    /// Resets identity and pending acks, then tells listeners. A session that
    /// never reached `Connected` reports `connect_error` instead of
    /// `disconnect`.
    fn teardown(&self, generation: u64, reason: String) {
        let (was_connected, dropped) = {
            let mut link = self.link.lock();
            if link.generation != generation || link.state == ConnectionState::Disconnected {
                return;
            }
            let was_connected = link.state == ConnectionState::Connected;
            link.state = ConnectionState::Disconnected;
            link.id = None;
            if let Some(outbound) = link.outbound.take() {
                let _ = outbound.send(Outbound::Close);
            }
            (was_connected, self.acks.clear())
        };

        // User callbacks may capture values whose drop touches this
        // connection, so they go only after the link is unlocked.
        if !dropped.is_empty() {
            debug!(dropped = dropped.len(), "discarded pending acknowledgments");
        }
        drop(dropped);

        if was_connected {
            info!(url = %self.url, reason, "disconnected");
            self.bus
                .dispatch(&Event::new(DISCONNECT_EVENT, vec![Value::String(reason)]));
        } else {
            warn!(url = %self.url, reason, "connection failed before the session was established");
            self.bus
                .dispatch(&Event::new(CONNECT_ERROR_EVENT, vec![Value::String(reason)]));
        }
    }

    #[cfg(test)]
    fn begin_for_test(&self) -> (u64, mpsc::UnboundedReceiver<Outbound>) {
        self.begin_connecting()
            .expect("connection should start disconnected")
    }
}

/// Tears the generation down if the driver stops without reporting a close,
/// either because a listener panicked on the driver task or because the
/// runtime dropped it.
struct DriverGuard {
    connection: Arc<Connection>,
    generation: u64,
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        if !self.connection.is_current(self.generation) {
            return;
        }
        if std::thread::panicking() {
            error!(generation = self.generation, "connection driver panicked");
        } else {
            warn!(generation = self.generation, "connection driver stopped early");
        }
        self.connection
            .handle_transport_closed(self.generation, DRIVER_STOPPED.to_string());
    }
}

/// Driver task for one transport generation.
async fn drive(
    connection: Arc<Connection>,
    generation: u64,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let _guard = DriverGuard {
        connection: Arc::clone(&connection),
        generation,
    };
    let (mut writer, mut reader) = match transport::connect(connection.url()).await {
        Ok(halves) => halves,
        Err(error) => {
            connection.handle_transport_closed(generation, error.to_string());
            return;
        }
    };
    connection.handle_open(generation);

    let reason = loop {
        select! {
            inbound = reader.recv() => match inbound {
                Some(Ok(WsMessage::Text(frame))) => connection.handle_frame(generation, &frame),
                Some(Ok(WsMessage::Binary(data))) => {
                    debug!(len = data.len(), "ignoring binary frame");
                }
                Some(Ok(WsMessage::Close { code, reason })) => {
                    debug!(code, reason, "peer closed the transport");
                    break SERVER_DISCONNECTED.to_string();
                }
                Some(Err(error)) if error.is_peer_gone() => {
                    debug!(%error, "peer dropped the transport");
                    break SERVER_DISCONNECTED.to_string();
                }
                Some(Err(error)) => break error.to_string(),
                None => break SERVER_DISCONNECTED.to_string(),
            },
            queued = outbound.recv() => match queued {
                Some(Outbound::Frame(frame)) => {
                    if let Err(error) = writer.send_text(frame).await {
                        if error.is_peer_gone() {
                            break SERVER_DISCONNECTED.to_string();
                        }
                        break error.to_string();
                    }
                }
                Some(Outbound::Close) | None => {
                    if let Err(error) = writer.close().await {
                        debug!(%error, "failed to close transport cleanly");
                    }
                    break CLIENT_DISCONNECTED.to_string();
                }
            },
        }
    };

    connection.handle_transport_closed(generation, reason);
}
