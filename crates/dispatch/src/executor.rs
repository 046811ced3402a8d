//! Action executor seam and the process-spawning implementation.

use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use shared::domain::{ActionDescriptor, Invocation};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

const STDERR_EXCERPT_LEN: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutput {
    /// Text returned to the client in the acknowledgement detail.
    pub detail: Option<String>,
}

impl ActionOutput {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_detail(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} exited with {status}{}", stderr_suffix(.stderr))]
    NonZeroExit {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Performs the real-world effect of a resolved command.
///
/// Implementations must return within a bounded time; the dispatch engine
/// additionally enforces its own deadline around every call.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &ActionDescriptor) -> Result<ActionOutput, ExecutionError>;
}

/// Runs vocabulary invocations as child processes.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    timeout: Duration,
}

impl ShellExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn command(invocation: &Invocation) -> Command {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args).stdin(Stdio::null());
        command
    }

    fn launch(&self, invocation: &Invocation) -> Result<ActionOutput, ExecutionError> {
        let child = Self::command(invocation)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;
        debug!(program = %invocation.program, pid = ?child.id(), "launched detached process");
        Ok(ActionOutput::none())
    }

    async fn run_to_completion(&self, invocation: &Invocation) -> Result<String, ExecutionError> {
        let child = Self::command(invocation)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecutionError::TimedOut {
                program: invocation.program.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| ExecutionError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutionError::NonZeroExit {
                program: invocation.program.clone(),
                status: output.status.to_string(),
                stderr: excerpt(stderr.trim()),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ActionExecutor for ShellExecutor {
    async fn execute(&self, action: &ActionDescriptor) -> Result<ActionOutput, ExecutionError> {
        match action {
            ActionDescriptor::Launch(invocation) => self.launch(invocation),
            ActionDescriptor::Media { invocation, .. } => {
                self.run_to_completion(invocation).await?;
                Ok(ActionOutput::none())
            }
            ActionDescriptor::Query(invocation) => {
                let stdout = self.run_to_completion(invocation).await?;
                Ok(ActionOutput {
                    detail: (!stdout.is_empty()).then_some(stdout),
                })
            }
        }
    }
}

fn excerpt(text: &str) -> String {
    if text.len() <= STDERR_EXCERPT_LEN {
        return text.to_string();
    }
    let mut end = STDERR_EXCERPT_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
#[path = "tests/executor_tests.rs"]
mod tests;
