//! Error taxonomy for command execution

use std::time::Duration;
use thiserror::Error;

use crate::CommandId;

/// Errors recorded on a command or returned by session and queue operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Transport could not be established within the retry budget, or the
    /// link dropped while a response was outstanding
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out after {after:?} waiting for prompt")]
    Timeout { after: Duration },

    /// Remote side answered with an error indication
    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Command not found: {0}")]
    NotFound(CommandId),

    /// Queue was shut down before the command could run
    #[error("Command queue closed")]
    QueueClosed,
}

impl CommandError {
    /// Short lowercase tag used in archives and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::Connection(_) => "connection",
            CommandError::Timeout { .. } => "timeout",
            CommandError::Execution(_) => "execution",
            CommandError::NotFound(_) => "not_found",
            CommandError::QueueClosed => "queue_closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CommandError::Timeout {
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "Timed out after 1.5s waiting for prompt");

        let err = CommandError::NotFound(CommandId(42));
        assert_eq!(err.to_string(), "Command not found: #42");
        assert_eq!(err.kind(), "not_found");
    }
}
