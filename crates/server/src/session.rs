//! Server-side connection manager: accept loop with a single active session.

use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use dispatch::DispatchEngine;
use shared::protocol::{parse_command_frame, read_frame, write_acknowledgement, InboundFrame};
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Close a session after this long without an inbound frame.
    pub idle_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSession {
    pub id: u64,
    pub peer: SocketAddr,
}

struct SessionHandle {
    info: ActiveSession,
    task: JoinHandle<()>,
}

pub struct CommandServer {
    listener: TcpListener,
    engine: DispatchEngine,
    options: ServerOptions,
    active: Arc<watch::Sender<Option<ActiveSession>>>,
}

impl CommandServer {
    pub async fn bind(
        addr: SocketAddr,
        engine: DispatchEngine,
        options: ServerOptions,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, engine, options))
    }

    pub fn from_listener(
        listener: TcpListener,
        engine: DispatchEngine,
        options: ServerOptions,
    ) -> Self {
        let (active, _) = watch::channel(None);
        Self {
            listener,
            engine,
            options,
            active: Arc::new(active),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Observes the active-session handle; `None` while no client is attached.
    pub fn active_session(&self) -> watch::Receiver<Option<ActiveSession>> {
        self.active.subscribe()
    }

    /// Accepts clients until `shutdown` resolves. A new connection replaces
    /// (and closes) the previous one.
    pub async fn run<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut current: Option<SessionHandle> = None;
        let mut next_id = 0_u64;

        loop {
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(%err, "accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                },
            };

            if let Some(previous) = current.take() {
                info!(
                    session = previous.info.id,
                    old_peer = %previous.info.peer,
                    new_peer = %peer,
                    "replacing active session"
                );
                previous.task.abort();
            }

            next_id += 1;
            let info = ActiveSession { id: next_id, peer };
            self.active.send_replace(Some(info));
            info!(session = info.id, %peer, "client connected");

            let engine = self.engine.clone();
            let idle_timeout = self.options.idle_timeout;
            let active = Arc::clone(&self.active);
            let task = tokio::spawn(async move {
                match serve_session(stream, info, &engine, idle_timeout).await {
                    Ok(()) => info!(session = info.id, %peer, "connection closed"),
                    Err(err) => warn!(session = info.id, %peer, %err, "connection lost"),
                }
                active.send_if_modified(|current| {
                    if current.map(|session| session.id) == Some(info.id) {
                        *current = None;
                        true
                    } else {
                        false
                    }
                });
            });
            current = Some(SessionHandle { info, task });
        }

        if let Some(session) = current.take() {
            session.task.abort();
        }
        self.active.send_replace(None);
        info!("command server stopped");
        Ok(())
    }
}

/// Strict request/response loop: one acknowledgement per parsed command,
/// in arrival order. Malformed frames are dropped without a reply.
async fn serve_session(
    stream: TcpStream,
    session: ActiveSession,
    engine: &DispatchEngine,
    idle_timeout: Option<Duration>,
) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let frame = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, read_frame(&mut reader)).await {
                Ok(frame) => frame?,
                Err(_) => {
                    info!(session = session.id, ?limit, "closing idle session");
                    return Ok(());
                }
            },
            None => read_frame(&mut reader).await?,
        };

        let line = match frame {
            InboundFrame::Line(line) => line,
            InboundFrame::Closed => return Ok(()),
            InboundFrame::Oversized => {
                warn!(session = session.id, "dropping oversized frame");
                continue;
            }
            InboundFrame::InvalidUtf8 => {
                warn!(session = session.id, "dropping non-UTF-8 frame");
                continue;
            }
        };

        let command = match parse_command_frame(&line) {
            Ok(command) => command,
            Err(err) => {
                warn!(session = session.id, %err, frame = %line.escape_debug(), "dropping malformed frame");
                continue;
            }
        };

        debug!(session = session.id, %command, "received command");
        let ack = engine.dispatch(command.as_str()).await;
        write_acknowledgement(&mut write_half, &ack).await?;
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
