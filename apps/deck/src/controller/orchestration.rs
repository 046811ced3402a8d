//! Command orchestration helpers from UI actions to backend command queue.

use crossbeam_channel::{Sender, TrySendError};

use crate::backend_bridge::commands::BackendCommand;

/// Queues `cmd` without blocking the UI; failures land in `status`.
pub fn dispatch_backend_command(
    cmd_tx: &Sender<BackendCommand>,
    cmd: BackendCommand,
    status: &mut String,
) -> bool {
    let cmd_name = cmd.name();
    match cmd_tx.try_send(cmd) {
        Ok(()) => {
            tracing::debug!(command = cmd_name, "queued ui->backend command");
            true
        }
        Err(TrySendError::Full(_)) => {
            *status = "UI command queue is full; please retry".to_string();
            false
        }
        Err(TrySendError::Disconnected(_)) => {
            *status = "Backend worker disconnected (possible startup/runtime failure); restart the deck"
                .to_string();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn queues_command_when_capacity_available() {
        let (tx, rx) = bounded(1);
        let mut status = String::new();

        assert!(dispatch_backend_command(&tx, BackendCommand::Connect, &mut status));

        assert_eq!(rx.try_recv(), Ok(BackendCommand::Connect));
        assert!(status.is_empty());
    }

    #[test]
    fn reports_full_queue_in_status() {
        let (tx, _rx) = bounded(1);
        let mut status = String::new();
        assert!(dispatch_backend_command(&tx, BackendCommand::Connect, &mut status));

        assert!(!dispatch_backend_command(&tx, BackendCommand::Disconnect, &mut status));
        assert!(status.contains("full"));
    }

    #[test]
    fn reports_disconnected_backend_in_status() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let mut status = String::new();

        assert!(!dispatch_backend_command(&tx, BackendCommand::Shutdown, &mut status));
        assert!(status.contains("disconnected"));
    }
}
