//! The deck's presentation state machine.
//!
//! `DeckState` mirrors the connection manager one-to-one, except that the
//! splash screen precedes the first connect and a user stop lands in
//! `Disconnected` rather than `Idle`. Taps only turn into backend commands
//! in `Ready`; anything tapped in another state is discarded, never queued.

use client_core::{ConnectionState, ConnectionStatus};
use shared::{
    domain::{CommandId, TrackInfo},
    protocol::Acknowledgement,
};
use tracing::{debug, info, warn};

use crate::{
    backend_bridge::commands::BackendCommand,
    config::DeckButton,
    controller::events::{UiError, UiEvent},
};

pub const NOW_PLAYING_COMMAND: &str = "GET_TRACK_INFO";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeckState {
    Splash,
    Connecting,
    Ready,
    /// Connection lost; the backend keeps retrying.
    Error {
        reason: String,
        attempt: u32,
    },
    Disconnected,
}

impl DeckState {
    pub fn accepts_taps(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    Success {
        command: CommandId,
        detail: Option<String>,
    },
    Failure {
        command: Option<CommandId>,
        reason: String,
    },
}

pub struct DeckController {
    state: DeckState,
    buttons: Vec<DeckButton>,
    feedback: Option<Feedback>,
    now_playing: Option<TrackInfo>,
    discarded_taps: u64,
    user_stopped: bool,
    status: String,
}

impl DeckController {
    pub fn new(buttons: Vec<DeckButton>) -> Self {
        Self {
            state: DeckState::Splash,
            buttons,
            feedback: None,
            now_playing: None,
            discarded_taps: 0,
            user_stopped: false,
            status: "System initializing".to_string(),
        }
    }

    pub fn state(&self) -> &DeckState {
        &self.state
    }

    pub fn buttons(&self) -> &[DeckButton] {
        &self.buttons
    }

    pub fn feedback(&self) -> Option<&Feedback> {
        self.feedback.as_ref()
    }

    pub fn now_playing(&self) -> Option<&TrackInfo> {
        self.now_playing.as_ref()
    }

    pub fn discarded_taps(&self) -> u64 {
        self.discarded_taps
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut String {
        &mut self.status
    }

    /// Leaves the splash screen and asks the backend to connect.
    pub fn finish_splash(&mut self) -> Option<BackendCommand> {
        if self.state != DeckState::Splash {
            return None;
        }
        self.transition(DeckState::Connecting);
        Some(BackendCommand::Connect)
    }

    /// Turns a command tap into a backend send, but only while `Ready`.
    pub fn tap(&mut self, command: &str) -> Option<BackendCommand> {
        if !self.state.accepts_taps() {
            self.discarded_taps += 1;
            debug!(command, state = ?self.state, "discarding tap while not ready");
            return None;
        }
        match CommandId::new(command) {
            Ok(command) => Some(BackendCommand::SendCommand { command }),
            Err(err) => {
                self.feedback = Some(Feedback::Failure {
                    command: None,
                    reason: format!("invalid command '{command}': {err}"),
                });
                None
            }
        }
    }

    pub fn tap_button(&mut self, index: usize) -> Option<BackendCommand> {
        let command = self.buttons.get(index)?.command.clone();
        self.tap(&command)
    }

    pub fn request_now_playing(&mut self) -> Option<BackendCommand> {
        self.tap(NOW_PLAYING_COMMAND)
    }

    /// User-initiated stop. The deck stays `Disconnected` until `request_connect`.
    pub fn request_disconnect(&mut self) -> Option<BackendCommand> {
        if matches!(self.state, DeckState::Splash | DeckState::Disconnected) {
            return None;
        }
        self.user_stopped = true;
        self.transition(DeckState::Disconnected);
        Some(BackendCommand::Disconnect)
    }

    pub fn request_connect(&mut self) -> Option<BackendCommand> {
        match self.state {
            DeckState::Disconnected => {
                self.user_stopped = false;
                self.transition(DeckState::Connecting);
                Some(BackendCommand::Connect)
            }
            DeckState::Splash => self.finish_splash(),
            _ => None,
        }
    }

    pub fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::Info(message) => self.status = message,
            UiEvent::Error(error) => {
                warn!(context = ?error.context(), category = ?error.category(), message = error.message(), "backend error");
                self.status = error.message().to_string();
            }
            UiEvent::Connection(status) => self.apply_connection(status),
            UiEvent::Acknowledged { command, ack } => self.apply_acknowledgement(command, ack),
            UiEvent::SendFailed { command, error } => self.apply_send_failure(command, error),
        }
    }

    fn apply_connection(&mut self, status: ConnectionStatus) {
        // Only a user stop reaches `Idle`; while it is in effect, late
        // events from the stopped connection are ignored.
        let next = match status.state {
            ConnectionState::Idle if self.user_stopped => DeckState::Disconnected,
            ConnectionState::Idle => return,
            _ if self.user_stopped => return,
            ConnectionState::Connecting => DeckState::Connecting,
            ConnectionState::Connected => DeckState::Ready,
            ConnectionState::Reconnecting => DeckState::Error {
                reason: status
                    .last_error
                    .unwrap_or_else(|| "connection lost".to_string()),
                attempt: status.attempt,
            },
        };
        self.status = match (&next, status.retry_in) {
            (DeckState::Error { .. }, Some(delay)) => {
                format!("Reconnecting in {:.1}s", delay.as_secs_f32())
            }
            (DeckState::Ready, _) => "Online".to_string(),
            (DeckState::Connecting, _) => "Searching for host".to_string(),
            (DeckState::Disconnected, _) => "Disconnected".to_string(),
            _ => self.status.clone(),
        };
        self.transition(next);
    }

    fn apply_acknowledgement(&mut self, command: CommandId, ack: Acknowledgement) {
        match ack {
            Acknowledgement::Ok { detail } => {
                if command.as_str() == NOW_PLAYING_COMMAND {
                    self.now_playing = detail.as_deref().and_then(TrackInfo::parse);
                }
                info!(%command, "command acknowledged");
                self.feedback = Some(Feedback::Success { command, detail });
            }
            Acknowledgement::Error { reason } => {
                warn!(%command, %reason, "command rejected");
                self.feedback = Some(Feedback::Failure {
                    command: Some(command),
                    reason,
                });
            }
        }
    }

    fn apply_send_failure(&mut self, command: CommandId, error: UiError) {
        warn!(%command, category = ?error.category(), message = error.message(), "command not delivered");
        self.feedback = Some(Feedback::Failure {
            command: Some(command),
            reason: error.message().to_string(),
        });
    }

    fn transition(&mut self, next: DeckState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "deck state changed");
            self.state = next;
        }
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
