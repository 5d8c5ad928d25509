//! Real-time messaging client that multiplexes named events and
//! request/acknowledgment exchanges over a single WebSocket.
//!
//! Each module focuses on a concrete responsibility:
//!
//! - [`packet`] is the JSON wire format: one tagged packet per text frame.
//! - [`ack`] hands out correlation ids and runs response callbacks when the
//!   matching `ack` packet arrives.
//! - [`event_bus`] keeps ordered listeners per event name and dispatches
//!   against a snapshot.
//! - [`transport`] wraps `tokio-tungstenite` into writer and reader halves.
//! - [`connection`] drives the transport from a background task and moves
//!   between disconnected, connecting and connected.
//! - [`socket`] is the public [`Socket`] handle composing all of the above.
//! - [`cli`] and [`client`] implement the terminal chat front end shipped as
//!   the `chatterbox` binary.
//!
//! Unit tests drive the connection state machine with hand-built frames;
//! integration tests in `tests/` run against an in-process WebSocket peer.

pub mod ack;
pub mod cli;
pub mod client;
pub mod connection;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod packet;
pub mod socket;
pub mod transport;

pub use connection::ConnectionState;
pub use error::{Error, Result};
pub use event::{Event, Responder};
pub use event_bus::Listener;
pub use packet::Packet;
pub use socket::{Socket, connect};
