//! In-process WebSocket peer speaking the chat wire protocol.
#![allow(dead_code)]

use std::time::Duration;

use anyhow::{Context, Result, bail};
use chatterbox::{Event, Packet, Socket};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::timeout,
};
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};

pub const STEP_TIMEOUT: Duration = Duration::from_secs(3);

pub struct MockPeer {
    listener: TcpListener,
    pub url: String,
}

impl MockPeer {
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        Ok(Self {
            listener,
            url: format!("ws://{addr}/chat"),
        })
    }

    pub async fn accept(&self) -> Result<PeerConnection> {
        let (stream, _) = timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .context("timed out waiting for the client to connect")??;
        let ws = accept_async(stream)
            .await
            .context("websocket handshake failed")?;
        Ok(PeerConnection { ws })
    }

    /// Accepts a client and greets it with a `connect` packet carrying `id`.
    pub async fn accept_session(&self, id: &str) -> Result<PeerConnection> {
        let mut connection = self.accept().await?;
        connection
            .send(&Packet::Connect { id: id.to_string() })
            .await?;
        Ok(connection)
    }

    pub async fn expect_no_client(&self, wait: Duration) -> Result<()> {
        if timeout(wait, self.listener.accept()).await.is_ok() {
            bail!("unexpected second connection");
        }
        Ok(())
    }
}

pub struct PeerConnection {
    ws: WebSocketStream<TcpStream>,
}

impl PeerConnection {
    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        self.send_raw(&packet.encode()?).await
    }

    pub async fn send_raw(&mut self, frame: &str) -> Result<()> {
        self.ws.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Packet> {
        loop {
            let message = timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .context("timed out waiting for a client frame")?;
            match message {
                Some(Ok(Message::Text(frame))) => return Ok(Packet::decode(&frame)?),
                Some(Ok(Message::Close(_))) | None => bail!("client closed the connection"),
                Some(Ok(_)) => continue,
                Some(Err(error)) => return Err(error.into()),
            }
        }
    }

    /// Waits until the client closes its side of the transport.
    pub async fn expect_closed(&mut self) -> Result<()> {
        loop {
            let message = timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .context("timed out waiting for the client to close")?;
            match message {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return Ok(()),
                Some(Ok(Message::Text(frame))) => bail!("unexpected frame before close: {frame}"),
                Some(Ok(_)) => continue,
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}

/// Forwards every `name` event the socket sees into a channel.
pub fn record(socket: &Socket, name: &str) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    socket.on(name, move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Result<Event> {
    timeout(STEP_TIMEOUT, events.recv())
        .await
        .context("timed out waiting for a socket event")?
        .context("event channel closed")
}
