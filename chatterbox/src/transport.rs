//! WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` that hands the connection driver
//! a writer half and a reader half it can poll from one `tokio::select!`
//! loop. Nothing else in the crate touches `tokio-tungstenite` directly.

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};

use crate::error::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frames the connection driver cares about. Ping/pong are answered by
/// tungstenite itself and never surface here.
#[derive(Debug, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
    Close { code: u16, reason: String },
}

pub struct WsWriter {
    sink: SplitSink<WsStream, Message>,
}

impl WsWriter {
    pub async fn send_text(&mut self, text: String) -> Result<()> {
        self.sink.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Sends a close frame and shuts the sink down.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await?;
        Ok(())
    }
}

pub struct WsReader {
    stream: SplitStream<WsStream>,
}

impl WsReader {
    /// Next frame from the peer, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(error) => return Some(Err(error.into())),
            };
            match message {
                Message::Text(text) => return Some(Ok(WsMessage::Text(text))),
                Message::Binary(data) => return Some(Ok(WsMessage::Binary(data))),
                Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|frame| (frame.code.into(), frame.reason.into_owned()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}

/// Performs the WebSocket handshake against `url` and splits the stream.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
    let (sink, stream) = stream.split();
    Ok((WsWriter { sink }, WsReader { stream }))
}
