//! Runtime bridge between UI command queue and backend event intake.

use std::{sync::Arc, thread, time::Duration};

use client_core::{ClientConfig, ClientEvent, ConnectionManager};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::backend_bridge::commands::BackendCommand;
use crate::controller::events::{UiError, UiErrorContext, UiEvent};

const RESYNC_INTERVAL: Duration = Duration::from_millis(100);

/// Spawns the backend worker thread. It owns the tokio runtime and the
/// connection manager; the UI only ever talks to it through the two queues.
pub fn launch(
    config: ClientConfig,
    cmd_rx: Receiver<BackendCommand>,
    ui_tx: Sender<UiEvent>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("deck-backend".to_string())
        .spawn(move || run_backend(config, cmd_rx, ui_tx))
}

fn run_backend(config: ClientConfig, cmd_rx: Receiver<BackendCommand>, ui_tx: Sender<UiEvent>) {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = ui_tx.try_send(UiEvent::Error(UiError::from_message(
                UiErrorContext::BackendStartup,
                format!("backend worker startup failure: failed to build runtime: {err}"),
            )));
            tracing::error!("failed to build backend runtime: {err}");
            return;
        }
    };

    runtime.block_on(async move {
        let manager = Arc::new(ConnectionManager::new(config));
        let forwarder = tokio::spawn(forward_connection_events(
            Arc::clone(&manager),
            manager.subscribe_events(),
            ui_tx.clone(),
        ));
        let _ = ui_tx.try_send(UiEvent::Info(format!(
            "Target: {}",
            manager.config().server_addr
        )));

        // Blocking receive is fine here: `block_on` runs outside the worker pool.
        while let Ok(cmd) = cmd_rx.recv() {
            match cmd {
                BackendCommand::Connect => manager.start().await,
                BackendCommand::Disconnect => manager.stop().await,
                BackendCommand::SendCommand { command } => {
                    let manager = Arc::clone(&manager);
                    let ui_tx = ui_tx.clone();
                    tokio::spawn(async move {
                        let event = match manager.send(command.as_str()).await {
                            Ok(ack) => UiEvent::Acknowledged { command, ack },
                            Err(err) => UiEvent::SendFailed {
                                error: UiError::from_channel(UiErrorContext::SendCommand, &err),
                                command,
                            },
                        };
                        forward(&ui_tx, event);
                    });
                }
                BackendCommand::Shutdown => break,
            }
        }

        manager.stop().await;
        forwarder.abort();
        tracing::info!("backend worker stopped");
    });
}

async fn forward_connection_events(
    manager: Arc<ConnectionManager>,
    mut events: broadcast::Receiver<ClientEvent>,
    ui_tx: Sender<UiEvent>,
) {
    // Set once a state change could not be delivered; the next forward
    // carries the manager's current status instead.
    let mut stale = false;
    loop {
        let received = if stale {
            tokio::time::timeout(RESYNC_INTERVAL, events.recv()).await.ok()
        } else {
            Some(events.recv().await)
        };
        let status = match received {
            None => manager.status(),
            Some(Ok(ClientEvent::StateChanged(status))) if !stale => status,
            Some(Ok(ClientEvent::StateChanged(_))) => manager.status(),
            // Acknowledgements reach the UI through the send that requested them.
            Some(Ok(ClientEvent::Acknowledged { .. })) => continue,
            Some(Err(RecvError::Lagged(skipped))) => {
                tracing::warn!(skipped, "connection events lagged; resyncing status");
                manager.status()
            }
            Some(Err(RecvError::Closed)) => break,
        };
        match forward(&ui_tx, UiEvent::Connection(status)) {
            Forwarded::Sent => stale = false,
            Forwarded::Dropped => stale = true,
            Forwarded::Closed => break,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Forwarded {
    Sent,
    Dropped,
    Closed,
}

fn forward(ui_tx: &Sender<UiEvent>, event: UiEvent) -> Forwarded {
    match ui_tx.try_send(event) {
        Ok(()) => Forwarded::Sent,
        Err(TrySendError::Full(UiEvent::Acknowledged { command, .. }))
        | Err(TrySendError::Full(UiEvent::SendFailed { command, .. })) => {
            tracing::warn!(%command, "ui event queue is full; dropping command result");
            Forwarded::Dropped
        }
        Err(TrySendError::Full(_)) => {
            tracing::warn!("ui event queue is full; connection status will be resent");
            Forwarded::Dropped
        }
        Err(TrySendError::Disconnected(_)) => Forwarded::Closed,
    }
}
