use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    select,
    sync::mpsc,
    time::{self, Interval},
};
use tracing::{info, warn};

use crate::{
    cli::Cli,
    connection::{CONNECT_ERROR_EVENT, CONNECT_EVENT, DISCONNECT_EVENT},
    event::Event,
    socket::Socket,
};

const HELP: &str = "commands: /join <room>, /leave, /ping, /quit, /help; anything else is sent to the room";

/// A line typed by the user.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Join(String),
    Leave,
    Ping,
    Quit,
    Help,
    Message(String),
    Empty,
}

impl Input {
    pub fn parse(line: &str) -> Result<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Input::Empty);
        }
        let Some(command) = trimmed.strip_prefix('/') else {
            return Ok(Input::Message(trimmed.to_string()));
        };

        let (name, rest) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(name, rest)| (name, rest.trim()));
        match name.to_ascii_lowercase().as_str() {
            "join" if rest.is_empty() => bail!("usage: /join <room>"),
            "join" => Ok(Input::Join(rest.to_string())),
            "leave" => Ok(Input::Leave),
            "ping" => Ok(Input::Ping),
            "quit" => Ok(Input::Quit),
            "help" => Ok(Input::Help),
            other => Err(anyhow!("unknown command /{other}; try /help")),
        }
    }
}

/// Socket callbacks forwarded into the terminal loop.
#[derive(Debug)]
enum SessionEvent {
    Connected(String),
    Disconnected(String),
    ConnectFailed(String),
    Joined(String),
    Message { sender: String, text: String },
    Latency(Duration),
}

struct Session {
    socket: Socket,
    events: mpsc::UnboundedSender<SessionEvent>,
    room: Option<String>,
    auto_join: Option<String>,
    quitting: bool,
}

pub async fn run(cli: Cli) -> Result<()> {
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let socket = Socket::new(cli.url.clone());
    forward_socket_events(&socket, &events_tx);

    info!(url = %cli.url, "connecting");
    socket.connect();

    let mut session = Session {
        socket,
        events: events_tx,
        room: None,
        auto_join: cli.room,
        quitting: false,
    };
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut ping = cli
        .ping_interval
        .map(|period| time::interval_at(time::Instant::now() + period, period));

    loop {
        select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if !session.handle_event(event, &cli.url).await? {
                    break;
                }
            }
            line = lines.next_line(), if !session.quitting => {
                match line? {
                    Some(line) => session.handle_input(&line).await?,
                    None => session.quit().await?,
                }
            }
            _ = next_tick(&mut ping) => {
                session.ping();
            }
            ctrl_c = tokio::signal::ctrl_c(), if !session.quitting => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                session.quit().await?;
            }
        }
    }

    Ok(())
}

fn forward_socket_events(socket: &Socket, events: &mpsc::UnboundedSender<SessionEvent>) {
    let forward = |name: &str, build: fn(&Event) -> SessionEvent| {
        let events = events.clone();
        socket.on(name, move |event| {
            let _ = events.send(build(event));
        });
    };

    forward(CONNECT_EVENT, |event| {
        SessionEvent::Connected(event.arg(0).unwrap_or_default())
    });
    forward(DISCONNECT_EVENT, |event| {
        SessionEvent::Disconnected(event.arg(0).unwrap_or_default())
    });
    forward(CONNECT_ERROR_EVENT, |event| {
        SessionEvent::ConnectFailed(event.arg(0).unwrap_or_default())
    });
    forward("message", |event| SessionEvent::Message {
        sender: event.arg(0).unwrap_or_else(|| "unknown".to_string()),
        text: event.arg(1).unwrap_or_default(),
    });
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl Session {
    /// Returns `false` once the session is over.
    async fn handle_event(&mut self, event: SessionEvent, url: &str) -> Result<bool> {
        match event {
            SessionEvent::Connected(id) => {
                write_stdout(&format!("*** connected using socket ID {id}")).await?;
                if let Some(room) = self.auto_join.take() {
                    self.join(room).await?;
                }
            }
            SessionEvent::Joined(room) => {
                write_stdout(&format!("*** joined room {room}")).await?;
                self.room = Some(room);
            }
            SessionEvent::Message { sender, text } => {
                write_stdout(&format!("<{sender}> {text}")).await?;
            }
            SessionEvent::Latency(elapsed) => {
                write_stdout(&format!(
                    "*** latency between the client and server is {}ms",
                    elapsed.as_millis()
                ))
                .await?;
            }
            SessionEvent::Disconnected(reason) => {
                write_stdout(&format!("*** disconnected: {reason}")).await?;
                return Ok(false);
            }
            SessionEvent::ConnectFailed(reason) => {
                write_stderr(&format!("!!! failed to connect: {reason}")).await?;
                bail!("failed to connect to {url}: {reason}");
            }
        }
        Ok(true)
    }

    async fn handle_input(&mut self, line: &str) -> Result<()> {
        let input = match Input::parse(line) {
            Ok(input) => input,
            Err(error) => return write_stderr(&format!("!!! {error}")).await.map_err(Into::into),
        };

        match input {
            Input::Empty => {}
            Input::Join(room) => self.join(room).await?,
            Input::Leave => self.leave().await?,
            Input::Ping => {
                if !self.ping() {
                    write_stderr("!!! not connected").await?;
                }
            }
            Input::Quit => self.quit().await?,
            Input::Help => write_stdout(HELP).await?,
            Input::Message(text) => self.send_message(text).await?,
        }
        Ok(())
    }

    async fn join(&mut self, room: String) -> Result<()> {
        if room.trim().is_empty() {
            write_stderr("!!! please enter a non-empty room name").await?;
            return Ok(());
        }

        let events = self.events.clone();
        let joined = room.clone();
        let sent = self.socket.emit_with_ack("join", (room,), move |_| {
            let _ = events.send(SessionEvent::Joined(joined));
        });
        if !sent {
            write_stderr("!!! not connected").await?;
        }
        Ok(())
    }

    async fn leave(&mut self) -> Result<()> {
        let Some(room) = self.room.take() else {
            write_stderr("!!! not in a room").await?;
            return Ok(());
        };
        self.socket.emit("leave", (room.as_str(),));
        write_stdout(&format!("*** left room {room}")).await?;
        Ok(())
    }

    async fn send_message(&mut self, text: String) -> Result<()> {
        if self.room.is_none() {
            write_stderr("!!! join a room before sending messages").await?;
            return Ok(());
        }
        if !self.socket.emit("message", (text,)) {
            write_stderr("!!! not connected").await?;
        }
        Ok(())
    }

    fn ping(&self) -> bool {
        let events = self.events.clone();
        let started = Instant::now();
        self.socket.emit_with_ack("ping", (), move |_| {
            let _ = events.send(SessionEvent::Latency(started.elapsed()));
        })
    }

    async fn quit(&mut self) -> Result<()> {
        if self.quitting {
            return Ok(());
        }
        self.quitting = true;
        write_stdout("*** leaving chat").await?;
        self.socket.disconnect();
        Ok(())
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_case_insensitively() {
        assert_eq!(
            Input::parse("/JOIN lobby").expect("join"),
            Input::Join("lobby".into())
        );
        assert_eq!(
            Input::parse("  /join  the lounge ").expect("join with spaces"),
            Input::Join("the lounge".into())
        );
        assert_eq!(Input::parse("/leave").expect("leave"), Input::Leave);
        assert_eq!(Input::parse("/Ping").expect("ping"), Input::Ping);
        assert_eq!(Input::parse("/quit").expect("quit"), Input::Quit);
        assert_eq!(Input::parse("/help").expect("help"), Input::Help);
    }

    #[test]
    fn plain_text_becomes_message() {
        assert_eq!(
            Input::parse("  hello there \n").expect("message"),
            Input::Message("hello there".into())
        );
        assert_eq!(Input::parse("   ").expect("empty"), Input::Empty);
    }

    #[test]
    fn rejects_bad_commands() {
        assert!(Input::parse("/join").is_err());
        assert!(Input::parse("/join   ").is_err());
        let error = Input::parse("/dance").expect_err("unknown command");
        assert!(error.to_string().contains("/dance"));
    }
}
