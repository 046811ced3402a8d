use thiserror::Error;

use crate::protocol::Acknowledgement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    UnknownCommand,
    ExecutionFailed,
}

/// Semantic failure of one dispatched command. Always reported to the
/// client as an `ERROR` acknowledgement, never fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("unknown command")]
    UnknownCommand { identifier: String },
    #[error("execution failed: {cause}")]
    ExecutionFailed { cause: String },
}

impl DispatchError {
    pub fn unknown(identifier: impl Into<String>) -> Self {
        Self::UnknownCommand {
            identifier: identifier.into(),
        }
    }

    pub fn execution(cause: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            cause: cause.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownCommand { .. } => ErrorCode::UnknownCommand,
            Self::ExecutionFailed { .. } => ErrorCode::ExecutionFailed,
        }
    }
}

impl From<DispatchError> for Acknowledgement {
    fn from(value: DispatchError) -> Self {
        Acknowledgement::error(value.to_string())
    }
}
