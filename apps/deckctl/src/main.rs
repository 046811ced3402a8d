use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use client_core::{ClientConfig, ConnectionManager, ConnectionState};
use shared::{domain::TrackInfo, protocol::Acknowledgement};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "deckctl", about = "Send one command to a deck-server and print the acknowledgement")]
struct Args {
    /// Server address, `host` or `host:port`.
    #[arg(long, default_value = "127.0.0.1")]
    server: String,
    /// How long to wait for the connection, in milliseconds.
    #[arg(long, default_value_t = 2_000)]
    connect_timeout_ms: u64,
    /// How long to wait for the acknowledgement, in milliseconds.
    #[arg(long, default_value_t = 3_000)]
    ack_timeout_ms: u64,
    /// Command identifier, e.g. OPEN_CHROME or GET_TRACK_INFO.
    command: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let connect_timeout = Duration::from_millis(args.connect_timeout_ms.max(1));
    let manager = ConnectionManager::new(ClientConfig {
        connect_timeout,
        ack_timeout: Duration::from_millis(args.ack_timeout_ms.max(1)),
        heartbeat_interval: None,
        ..ClientConfig::new(args.server)
    });

    manager.start().await;
    if !manager
        .wait_for_state(ConnectionState::Connected, connect_timeout)
        .await
    {
        let reason = manager
            .status()
            .last_error
            .unwrap_or_else(|| "timed out".to_string());
        warn!(server = %manager.config().server_addr, %reason, "connection not established");
        manager.stop().await;
        bail!(
            "server {} unreachable: {reason}",
            manager.config().server_addr
        );
    }

    let result = manager.send(&args.command).await;
    manager.stop().await;
    debug!(command = %args.command, ?result, "command finished");

    match result? {
        Acknowledgement::Ok { detail } => {
            match detail.as_deref().and_then(TrackInfo::parse) {
                Some(track) => println!(
                    "{} - {} ({}) [{}s / {}s] {}",
                    track.name,
                    track.artist,
                    track.album,
                    track.position_secs,
                    track.duration_ms / 1000,
                    if track.is_playing { "playing" } else { "paused" }
                ),
                None => match detail {
                    Some(detail) => println!("OK: {detail}"),
                    None => println!("OK"),
                },
            }
            Ok(())
        }
        Acknowledgement::Error { reason } => bail!("server rejected {}: {reason}", args.command),
    }
}
