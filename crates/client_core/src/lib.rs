use std::{sync::Arc, time::Duration};

use shared::{
    domain::CommandId,
    protocol::{Acknowledgement, DEFAULT_PORT},
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch, Mutex},
    task::JoinHandle,
};
use tracing::warn;

mod backoff;
mod connection;
pub mod error;

pub use backoff::Backoff;
pub use error::ChannelError;

use connection::{CommandRequest, IoTask};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_millis(500);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(10);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const REQUEST_QUEUE_DEPTH: usize = 16;
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the deck server.
    pub server_addr: String,
    pub connect_timeout: Duration,
    pub ack_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Idle-time `PING` period; `None` disables heartbeats.
    pub heartbeat_interval: Option<Duration>,
}

impl ClientConfig {
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: with_default_port(server_addr.into()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
            backoff_max: DEFAULT_BACKOFF_MAX,
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
        }
    }
}

/// Appends the default port when `addr` names only a host.
pub fn with_default_port(addr: String) -> String {
    let addr = addr.trim().to_string();
    let has_port = match addr.rsplit_once(':') {
        Some((host, port)) => {
            port.parse::<u16>().is_ok() && (!host.contains(':') || host.ends_with(']'))
        }
        None => false,
    };
    if has_port {
        addr
    } else if addr.contains(':') && !addr.starts_with('[') {
        format!("[{addr}]:{DEFAULT_PORT}")
    } else {
        format!("{addr}:{DEFAULT_PORT}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Consecutive failed attempts since the last successful connect.
    pub attempt: u32,
    pub retry_in: Option<Duration>,
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    fn idle() -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
            retry_in: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged(ConnectionStatus),
    Acknowledged {
        command: CommandId,
        ack: Acknowledgement,
    },
}

struct Running {
    requests: mpsc::Sender<CommandRequest>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Client-side connection manager and command channel.
///
/// `start` spawns the I/O task that owns the socket and keeps reconnecting
/// with capped exponential backoff until `stop`. `send` is half-duplex: the
/// I/O task writes one command and waits for its acknowledgement (or the ack
/// timeout) before taking the next one.
pub struct ConnectionManager {
    config: ClientConfig,
    status: Arc<watch::Sender<ConnectionStatus>>,
    events: broadcast::Sender<ClientEvent>,
    running: Mutex<Option<Running>>,
}

impl ConnectionManager {
    pub fn new(config: ClientConfig) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::idle());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            status: Arc::new(status),
            events,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Leaves `Idle` and begins connecting. No-op while already running.
    pub async fn start(&self) {
        let mut guard = self.running.lock().await;
        if guard.as_ref().is_some_and(|running| !running.task.is_finished()) {
            return;
        }
        let (requests, requests_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = IoTask::new(
            self.config.clone(),
            Arc::clone(&self.status),
            self.events.clone(),
            requests_rx,
            shutdown_rx,
        );
        *guard = Some(Running {
            requests,
            shutdown,
            task: tokio::spawn(task.run()),
        });
    }

    /// User-initiated disconnect: halts the retry loop, closes the socket,
    /// fails in-flight sends with `Cancelled`, and returns to `Idle`.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        drop(running.requests);
        if let Err(err) = running.task.await {
            warn!(%err, "connection task ended abnormally");
            self.status.send_replace(ConnectionStatus::idle());
        }
    }

    /// Sends one command and waits for its acknowledgement.
    ///
    /// Fails fast with `NotConnected` (no network traffic) unless the
    /// connection is currently `Connected`.
    pub async fn send(&self, command: &str) -> Result<Acknowledgement, ChannelError> {
        let command = CommandId::new(command)?;
        if self.state() != ConnectionState::Connected {
            return Err(ChannelError::NotConnected);
        }
        let requests = self
            .running
            .lock()
            .await
            .as_ref()
            .map(|running| running.requests.clone())
            .ok_or(ChannelError::NotConnected)?;

        let (reply, reply_rx) = oneshot::channel();
        requests
            .send(CommandRequest { command, reply })
            .await
            .map_err(|_| ChannelError::NotConnected)?;
        reply_rx.await.map_err(|_| ChannelError::Cancelled)?
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Waits until the connection reaches `state` or `timeout` elapses.
    pub async fn wait_for_state(&self, state: ConnectionState, timeout: Duration) -> bool {
        let mut status = self.status.subscribe();
        tokio::time::timeout(timeout, async {
            loop {
                if status.borrow_and_update().state == state {
                    return true;
                }
                if status.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await
        .unwrap_or(false)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
