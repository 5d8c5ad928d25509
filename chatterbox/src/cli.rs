use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// WebSocket endpoint of the chat server.
    #[arg(long, default_value = "ws://127.0.0.1:10000/chat")]
    pub url: String,

    /// Room to join as soon as the connection is established.
    #[arg(long)]
    pub room: Option<String>,

    /// Measure round-trip latency every N seconds while connected.
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    pub ping_interval: Option<Duration>,
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: u64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a whole number of seconds"))?;
    if secs == 0 {
        return Err("ping interval must be at least one second".to_string());
    }
    Ok(Duration::from_secs(secs))
}
