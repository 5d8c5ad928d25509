use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;

use crate::{
    connection::{Connection, ConnectionState},
    error::{Error, Result},
    event::Event,
    event_bus::Listener,
    packet::into_args,
};

/// Client handle for one logical socket.
///
/// Cloning is cheap and every clone drives the same connection, so listeners
/// can capture a clone to emit from inside a callback. Subscriptions survive
/// disconnects; identity and pending acknowledgments do not.
///
/// ```no_run
/// # async fn demo() {
/// let socket = chatterbox::connect("ws://127.0.0.1:10000/chat");
/// socket.on("message", |event| {
///     let sender: Option<String> = event.arg(0);
///     let text: Option<String> = event.arg(1);
///     println!("{sender:?}: {text:?}");
/// });
/// socket.on("connect", {
///     let socket = socket.clone();
///     move |_| {
///         socket.emit_with_ack("join", ("lobby",), |_| println!("joined"));
///     }
/// });
/// # }
/// ```
#[derive(Clone)]
pub struct Socket {
    connection: Arc<Connection>,
}

impl Socket {
    /// Creates a disconnected socket for `url`. Call [`Socket::connect`] to
    /// open it.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            connection: Arc::new(Connection::new(url)),
        }
    }

    pub fn url(&self) -> &str {
        self.connection.url()
    }

    /// Opens the transport on the current Tokio runtime. Does nothing while
    /// already connecting or connected.
    pub fn connect(&self) -> &Self {
        self.connection.connect();
        self
    }

    /// Requests a close. Listeners see `disconnect` once the transport has
    /// actually gone away.
    pub fn disconnect(&self) -> &Self {
        self.connection.disconnect();
        self
    }

    /// Peer-assigned identifier of the current session.
    pub fn id(&self) -> Option<String> {
        self.connection.id()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn disconnected(&self) -> bool {
        !self.connected()
    }

    /// Sends an event that expects no response. Returns `false` and sends
    /// nothing unless connected.
    pub fn emit<A: Serialize>(&self, event: &str, args: A) -> bool {
        match encode_args(event, args) {
            Some(args) => self.connection.send_event(event, args, None),
            None => false,
        }
    }

    /// Sends an event and calls `callback` with the peer's acknowledgment
    /// arguments. The callback is dropped uninvoked if the connection goes
    /// away first.
    pub fn emit_with_ack<A, F>(&self, event: &str, args: A, callback: F) -> bool
    where
        A: Serialize,
        F: FnOnce(Vec<Value>) + Send + 'static,
    {
        match encode_args(event, args) {
            Some(args) => self
                .connection
                .send_event(event, args, Some(Box::new(callback))),
            None => false,
        }
    }

    /// Future-based [`Socket::emit_with_ack`]. Wrap in
    /// `tokio::time::timeout` for a deadline; an unanswered request otherwise
    /// waits until the connection is torn down.
    pub async fn request<A: Serialize>(&self, event: &str, args: A) -> Result<Vec<Value>> {
        let args = into_args(args)?;
        let (tx, rx) = oneshot::channel();
        let sent = self.connection.send_event(
            event,
            args,
            Some(Box::new(move |response| {
                let _ = tx.send(response);
            })),
        );
        if !sent {
            return Err(Error::NotConnected);
        }
        rx.await.map_err(|_| Error::AckDropped)
    }

    /// Subscribes `callback` to `event` and returns the handle needed to
    /// remove it again.
    pub fn on<F>(&self, event: &str, callback: F) -> Listener
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(callback);
        self.connection.bus().subscribe(event, Arc::clone(&listener));
        listener
    }

    pub fn off(&self, event: &str, listener: &Listener) -> bool {
        self.connection.bus().unsubscribe(event, listener)
    }

    /// Removes every listener for `event`.
    pub fn off_event(&self, event: &str) -> &Self {
        self.connection.bus().unsubscribe_event(event);
        self
    }

    pub fn off_all(&self) -> &Self {
        self.connection.bus().clear();
        self
    }

    pub fn pending_acks(&self) -> usize {
        self.connection.acks().pending_len()
    }
}

fn encode_args<A: Serialize>(event: &str, args: A) -> Option<Vec<Value>> {
    match into_args(args) {
        Ok(args) => Some(args),
        Err(error) => {
            warn!(event, %error, "dropping event with unserializable arguments");
            None
        }
    }
}

/// Creates a socket for `url` and starts connecting it. Must be called from
/// within a Tokio runtime.
pub fn connect(url: impl Into<String>) -> Socket {
    let socket = Socket::new(url);
    socket.connect();
    socket
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn emit_while_disconnected_is_silent_noop() {
        let socket = Socket::new("ws://127.0.0.1:1/chat");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        assert!(!socket.emit("message", ("hi",)));
        assert!(!socket.emit_with_ack("join", ("lobby",), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(socket.pending_acks(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(socket.disconnected());
        assert_eq!(socket.id(), None);
    }

    #[tokio::test]
    async fn request_while_disconnected_fails_fast() {
        let socket = Socket::new("ws://127.0.0.1:1/chat");
        let result = socket.request("ping", ()).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[test]
    fn disconnect_while_disconnected_is_noop() {
        let socket = Socket::new("ws://127.0.0.1:1/chat");
        socket.disconnect().disconnect();
        assert_eq!(socket.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn off_removes_only_the_given_listener() {
        let socket = Socket::new("ws://127.0.0.1:1/chat");
        let first = socket.on("message", |_| {});
        let _second = socket.on("message", |_| {});

        assert!(socket.off("message", &first));
        assert!(!socket.off("message", &first));
        assert_eq!(socket.connection.bus().listener_count("message"), 1);

        socket.on("connect", |_| {});
        socket.off_event("message");
        assert_eq!(socket.connection.bus().listener_count("message"), 0);
        assert_eq!(socket.connection.bus().listener_count("connect"), 1);

        socket.off_all();
        assert_eq!(socket.connection.bus().listener_count("connect"), 0);
    }
}
