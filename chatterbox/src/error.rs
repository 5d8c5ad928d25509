use std::io;

use thiserror::Error;
use tokio_tungstenite::tungstenite::{self, error::ProtocolError};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// An inbound frame was not JSON or did not carry a known packet type.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    /// Outbound arguments could not be serialized to JSON.
    #[error("failed to encode packet: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("socket is not connected")]
    NotConnected,

    /// The connection was torn down before the peer acknowledged the event.
    #[error("acknowledgment dropped before a response arrived")]
    AckDropped,
}

impl Error {
    /// True when the peer went away: a reset or truncated stream, or a
    /// transport that was already closed. Protocol violations and codec
    /// failures are not.
    pub fn is_peer_gone(&self) -> bool {
        match self {
            Error::Transport(tungstenite::Error::ConnectionClosed)
            | Error::Transport(tungstenite::Error::AlreadyClosed)
            | Error::Transport(tungstenite::Error::Protocol(
                ProtocolError::ResetWithoutClosingHandshake,
            )) => true,
            Error::Transport(tungstenite::Error::Io(error)) => matches!(
                error.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
