//! Command model and lifecycle
//!
//! A command is created `Pending`, moved to `Processing` by the queue worker,
//! and ends in exactly one of the terminal states `Completed` or `Failed`.
//! Terminal commands never change again.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CommandError, TokenRef};

/// Queue-assigned command identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(pub u64);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle status of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Processing => "processing",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command owned by a queue until reclaimed
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: CommandId,
    pub text: String,
    pub token_ref: Option<TokenRef>,
    pub status: CommandStatus,
    pub submitted_at: Option<u64>,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub result: Option<String>,
    pub error: Option<CommandError>,
}

impl Command {
    /// Create a pending command stamped with its submission time
    pub fn new(id: CommandId, text: impl Into<String>, token_ref: Option<TokenRef>, now_ms: u64) -> Self {
        Self {
            id,
            text: text.into(),
            token_ref,
            status: CommandStatus::Pending,
            submitted_at: Some(now_ms),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move `Pending -> Processing`. Returns false if the command was not pending.
    pub fn begin(&mut self, now_ms: u64) -> bool {
        if self.status != CommandStatus::Pending {
            return false;
        }
        self.status = CommandStatus::Processing;
        self.started_at = Some(now_ms);
        true
    }

    /// Record the outcome and enter the matching terminal state.
    ///
    /// Returns false, leaving the command untouched, if it is already terminal.
    pub fn finish(&mut self, outcome: Result<String, CommandError>, now_ms: u64) -> bool {
        if self.is_terminal() {
            return false;
        }
        match outcome {
            Ok(response) => {
                self.status = CommandStatus::Completed;
                self.result = Some(response);
            }
            Err(e) => {
                self.status = CommandStatus::Failed;
                self.error = Some(e);
            }
        }
        self.completed_at = Some(now_ms);
        true
    }

    /// Time spent executing, once both timestamps exist
    pub fn elapsed_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_completed() {
        let mut cmd = Command::new(CommandId(1), "read 162", None, 100);
        assert_eq!(cmd.status, CommandStatus::Pending);
        assert_eq!(cmd.submitted_at, Some(100));

        assert!(cmd.begin(110));
        assert_eq!(cmd.status, CommandStatus::Processing);

        assert!(cmd.finish(Ok("ok".into()), 150));
        assert_eq!(cmd.status, CommandStatus::Completed);
        assert_eq!(cmd.result.as_deref(), Some("ok"));
        assert!(cmd.error.is_none());
        assert_eq!(cmd.elapsed_ms(), Some(40));
    }

    #[test]
    fn test_terminal_state_is_immutable() {
        let mut cmd = Command::new(CommandId(2), "read 163", None, 0);
        cmd.begin(1);
        assert!(cmd.finish(Err(CommandError::Execution("bad index".into())), 2));
        assert_eq!(cmd.status, CommandStatus::Failed);

        assert!(!cmd.finish(Ok("late".into()), 3));
        assert!(!cmd.begin(4));
        assert_eq!(cmd.status, CommandStatus::Failed);
        assert!(cmd.result.is_none());
        assert_eq!(cmd.completed_at, Some(2));
    }

    #[test]
    fn test_begin_requires_pending() {
        let mut cmd = Command::new(CommandId(3), "read 164", None, 0);
        assert!(cmd.begin(1));
        assert!(!cmd.begin(2));
        assert_eq!(cmd.started_at, Some(1));
    }
}
