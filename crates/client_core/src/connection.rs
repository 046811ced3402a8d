//! The background I/O task. It exclusively owns the socket; everything else
//! talks to it through channels.

use std::{future::Future, sync::Arc, time::Duration};

use shared::{
    domain::CommandId,
    protocol::{read_frame, write_line, Acknowledgement, InboundFrame, PING},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{broadcast, mpsc, oneshot, watch},
    time::{Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    backoff::Backoff, error::ChannelError, ClientConfig, ClientEvent, ConnectionState,
    ConnectionStatus,
};

pub(crate) struct CommandRequest {
    pub(crate) command: CommandId,
    pub(crate) reply: oneshot::Sender<Result<Acknowledgement, ChannelError>>,
}

enum SessionEnd {
    Lost(String),
    Shutdown,
}

enum ExchangeError {
    Failed(ChannelError),
    Shutdown,
}

pub(crate) struct IoTask {
    config: ClientConfig,
    status: Arc<watch::Sender<ConnectionStatus>>,
    events: broadcast::Sender<ClientEvent>,
    requests: mpsc::Receiver<CommandRequest>,
    shutdown: watch::Receiver<bool>,
    backoff: Backoff,
    attempt: u32,
}

impl IoTask {
    pub(crate) fn new(
        config: ClientConfig,
        status: Arc<watch::Sender<ConnectionStatus>>,
        events: broadcast::Sender<ClientEvent>,
        requests: mpsc::Receiver<CommandRequest>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let backoff = Backoff::new(config.backoff_initial, config.backoff_max);
        Self {
            config,
            status,
            events,
            requests,
            shutdown,
            backoff,
            attempt: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        self.publish(ConnectionState::Connecting, None, None);

        loop {
            let addr = self.config.server_addr.clone();
            let connect_timeout = self.config.connect_timeout;
            let attempt = self
                .reject_requests_while(async move {
                    match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
                        Ok(Ok(stream)) => Ok(stream),
                        Ok(Err(err)) => Err(format!("connect to {addr} failed: {err}")),
                        Err(_) => Err(format!(
                            "connect to {addr} timed out after {connect_timeout:?}"
                        )),
                    }
                })
                .await;

            let reason = match attempt {
                None => break,
                Some(Ok(stream)) => {
                    self.attempt = 0;
                    self.backoff.reset();
                    self.publish(ConnectionState::Connected, None, None);
                    match self.run_session(stream).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(reason) => reason,
                    }
                }
                Some(Err(reason)) => reason,
            };

            self.attempt = self.attempt.saturating_add(1);
            let delay = self.backoff.next_delay();
            warn!(attempt = self.attempt, retry_in = ?delay, %reason, "connection unavailable");
            self.publish(ConnectionState::Reconnecting, Some(delay), Some(reason));
            if self
                .reject_requests_while(tokio::time::sleep(delay))
                .await
                .is_none()
            {
                break;
            }
        }

        self.attempt = 0;
        self.publish(ConnectionState::Idle, None, None);
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            let _ = request.reply.send(Err(ChannelError::Cancelled));
        }
    }

    fn publish(
        &self,
        state: ConnectionState,
        retry_in: Option<Duration>,
        last_error: Option<String>,
    ) {
        let status = ConnectionStatus {
            state,
            attempt: self.attempt,
            retry_in,
            last_error,
        };
        info!(?state, attempt = self.attempt, server = %self.config.server_addr, "connection state changed");
        self.status.send_replace(status.clone());
        let _ = self.events.send(ClientEvent::StateChanged(status));
    }

    /// Drives `fut` while the connection is unusable. Commands arriving in
    /// the meantime are dropped with `NotConnected`; nothing is queued.
    /// Returns `None` if shutdown was requested first.
    async fn reject_requests_while<F>(&mut self, fut: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                output = &mut fut => return Some(output),
                _ = shutdown_requested(&mut self.shutdown) => return None,
                request = self.requests.recv() => match request {
                    Some(request) => {
                        debug!(command = %request.command, "dropping command while disconnected");
                        let _ = request.reply.send(Err(ChannelError::NotConnected));
                    }
                    None => return None,
                },
            }
        }
    }

    async fn run_session(&mut self, stream: TcpStream) -> SessionEnd {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%err, "failed to set TCP_NODELAY");
        }
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut heartbeat = self.config.heartbeat_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => return SessionEnd::Shutdown,
                request = self.requests.recv() => {
                    let Some(request) = request else {
                        return SessionEnd::Shutdown;
                    };
                    let result = self.exchange(&mut reader, &mut writer, request.command.as_str()).await;
                    if let Some(interval) = heartbeat.as_mut() {
                        interval.reset();
                    }
                    match result {
                        Ok(ack) => {
                            let _ = self.events.send(ClientEvent::Acknowledged {
                                command: request.command,
                                ack: ack.clone(),
                            });
                            let _ = request.reply.send(Ok(ack));
                        }
                        Err(ExchangeError::Shutdown) => {
                            let _ = request.reply.send(Err(ChannelError::Cancelled));
                            return SessionEnd::Shutdown;
                        }
                        Err(ExchangeError::Failed(err)) => {
                            let reason = err.to_string();
                            let _ = request.reply.send(Err(err));
                            return SessionEnd::Lost(reason);
                        }
                    }
                }
                _ = next_tick(&mut heartbeat) => {
                    match self.exchange(&mut reader, &mut writer, PING).await {
                        Ok(_) => debug!("heartbeat acknowledged"),
                        Err(ExchangeError::Shutdown) => return SessionEnd::Shutdown,
                        Err(ExchangeError::Failed(err)) => {
                            return SessionEnd::Lost(format!("heartbeat failed: {err}"));
                        }
                    }
                }
                readable = reader.fill_buf() => match readable {
                    Ok([]) => return SessionEnd::Lost("server closed the connection".to_string()),
                    Ok(unsolicited) => {
                        let len = unsolicited.len();
                        warn!(bytes = len, "discarding unsolicited data from server");
                        reader.consume(len);
                    }
                    Err(err) => return SessionEnd::Lost(format!("read failed: {err}")),
                },
            }
        }
    }

    /// One request/response pair. Any failure leaves the stream in an
    /// unknown position, so callers treat it as a lost connection.
    async fn exchange(
        &mut self,
        reader: &mut BufReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
        command: &str,
    ) -> Result<Acknowledgement, ExchangeError> {
        let ack_timeout = self.config.ack_timeout;
        let round_trip = async {
            write_line(&mut *writer, command)
                .await
                .map_err(|err| ChannelError::ConnectionLost(format!("write failed: {err}")))?;
            match read_frame(&mut *reader).await {
                Ok(InboundFrame::Line(line)) => Acknowledgement::parse(&line)
                    .map_err(|err| ChannelError::Protocol(err.to_string())),
                Ok(InboundFrame::Closed) => Err(ChannelError::ConnectionLost(
                    "server closed the connection".to_string(),
                )),
                Ok(InboundFrame::Oversized) => Err(ChannelError::Protocol(
                    "oversized acknowledgement".to_string(),
                )),
                Ok(InboundFrame::InvalidUtf8) => Err(ChannelError::Protocol(
                    "acknowledgement is not UTF-8".to_string(),
                )),
                Err(err) => Err(ChannelError::ConnectionLost(format!("read failed: {err}"))),
            }
        };

        tokio::select! {
            _ = shutdown_requested(&mut self.shutdown) => Err(ExchangeError::Shutdown),
            outcome = tokio::time::timeout(ack_timeout, round_trip) => match outcome {
                Ok(Ok(ack)) => {
                    debug!(command, %ack, "acknowledged");
                    Ok(ack)
                }
                Ok(Err(err)) => Err(ExchangeError::Failed(err)),
                Err(_) => Err(ExchangeError::Failed(ChannelError::Timeout(ack_timeout))),
            },
        }
    }
}

/// Resolves once shutdown is flagged or the controlling handle is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
