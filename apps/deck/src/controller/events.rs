//! Backend-to-UI events and error modeling for the deck controller.

use client_core::{ChannelError, ConnectionStatus};
use shared::{domain::CommandId, protocol::Acknowledgement};

#[derive(Debug, Clone)]
pub enum UiEvent {
    Info(String),
    Error(UiError),
    Connection(ConnectionStatus),
    Acknowledged {
        command: CommandId,
        ack: Acknowledgement,
    },
    SendFailed {
        command: CommandId,
        error: UiError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorCategory {
    Transport,
    Validation,
    Cancelled,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorContext {
    BackendStartup,
    SendCommand,
}

#[derive(Debug, Clone)]
pub struct UiError {
    category: UiErrorCategory,
    context: UiErrorContext,
    message: String,
}

impl UiError {
    pub fn from_message(context: UiErrorContext, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        let category = if lower.contains("cancel") {
            UiErrorCategory::Cancelled
        } else if lower.contains("invalid") || lower.contains("malformed") {
            UiErrorCategory::Validation
        } else if lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("connect")
            || lower.contains("connection")
            || lower.contains("protocol")
            || lower.contains("disconnect")
        {
            UiErrorCategory::Transport
        } else {
            UiErrorCategory::Unknown
        };

        Self {
            category,
            context,
            message,
        }
    }

    pub fn from_channel(context: UiErrorContext, err: &ChannelError) -> Self {
        let category = match err {
            ChannelError::Cancelled => UiErrorCategory::Cancelled,
            ChannelError::InvalidCommand(_) => UiErrorCategory::Validation,
            err if err.is_transport() => UiErrorCategory::Transport,
            _ => UiErrorCategory::Unknown,
        };
        Self {
            category,
            context,
            message: err.to_string(),
        }
    }

    pub fn category(&self) -> UiErrorCategory {
        self.category
    }

    pub fn context(&self) -> UiErrorContext {
        self.context
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
