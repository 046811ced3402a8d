use std::{sync::Arc, time::Duration};

use shared::{
    error::DispatchError,
    protocol::{Acknowledgement, PING, PONG},
    vocabulary::Vocabulary,
};
use tracing::{info, warn};

pub mod executor;

pub use executor::{ActionExecutor, ActionOutput, ExecutionError, ShellExecutor};

pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Turns inbound command identifiers into external actions.
///
/// Cheap to clone; the vocabulary and executor are shared read-only.
#[derive(Clone)]
pub struct DispatchEngine {
    vocabulary: Arc<Vocabulary>,
    executor: Arc<dyn ActionExecutor>,
    action_timeout: Duration,
}

impl DispatchEngine {
    pub fn new(vocabulary: Arc<Vocabulary>, executor: Arc<dyn ActionExecutor>) -> Self {
        Self {
            vocabulary,
            executor,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }

    pub fn with_action_timeout(mut self, action_timeout: Duration) -> Self {
        self.action_timeout = action_timeout;
        self
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Resolves and runs one command, always producing exactly one acknowledgement.
    pub async fn dispatch(&self, identifier: &str) -> Acknowledgement {
        if identifier == PING {
            return Acknowledgement::ok_with(PONG);
        }
        match self.run(identifier).await {
            Ok(ack) => {
                info!(command = identifier, "dispatched");
                ack
            }
            Err(err) => {
                warn!(command = identifier, code = ?err.code(), %err, "dispatch failed");
                err.into()
            }
        }
    }

    async fn run(&self, identifier: &str) -> Result<Acknowledgement, DispatchError> {
        let action = self
            .vocabulary
            .resolve(identifier)
            .map_err(|err| DispatchError::unknown(err.identifier))?;

        let output = tokio::time::timeout(self.action_timeout, self.executor.execute(action))
            .await
            .map_err(|_| {
                DispatchError::execution(format!("timed out after {:?}", self.action_timeout))
            })?
            .map_err(|err| DispatchError::execution(err.to_string()))?;

        Ok(match output.detail {
            Some(detail) => Acknowledgement::ok_with(detail),
            None => Acknowledgement::ok(),
        })
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
