//! Backend commands queued from UI to backend worker.

use shared::domain::CommandId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCommand {
    Connect,
    Disconnect,
    SendCommand { command: CommandId },
    Shutdown,
}

impl BackendCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::SendCommand { .. } => "send_command",
            Self::Shutdown => "shutdown",
        }
    }
}
