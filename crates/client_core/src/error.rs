use std::time::Duration;

use shared::domain::InvalidIdentifier;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("not connected to the server")]
    NotConnected,
    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("command cancelled by disconnect")]
    Cancelled,
    #[error("invalid command identifier: {0}")]
    InvalidCommand(#[from] InvalidIdentifier),
}

impl ChannelError {
    /// Whether the failure says something about the connection rather than the command.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Timeout(_) | Self::ConnectionLost(_) | Self::Protocol(_)
        )
    }
}
