//! Node Console Shared Types
//!
//! This crate provides the command model, error taxonomy, node inventory types
//! and the telnet codec shared by the console's session and queue layers.

pub mod codec;
pub mod command;
pub mod error;
pub mod node;
pub mod state_machine;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use command::{Command, CommandId, CommandStatus};
pub use error::CommandError;
pub use node::{Node, NodeToken, TokenRef, TokenType};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Default operating parameters for remote sessions and command queues
pub mod defaults {
    /// Telnet port used when a node entry does not name one
    pub const TELNET_PORT: u16 = 23;

    /// Connect timeout per attempt in milliseconds
    pub const CONNECT_TIMEOUT_MS: u64 = 5000;

    /// Per-command response timeout in milliseconds
    pub const COMMAND_TIMEOUT_MS: u64 = 10000;

    /// Connection attempts before a session gives up
    pub const CONNECT_MAX_ATTEMPTS: u32 = 3;

    /// Delay before the first reconnect attempt in milliseconds
    pub const RECONNECT_DELAY_MS: u64 = 500;

    /// Upper bound for the reconnect delay in milliseconds
    pub const MAX_RECONNECT_DELAY_MS: u64 = 8000;

    /// Commands admitted per rate-limit interval
    pub const RATE_LIMIT_BURST: u32 = 10;

    /// Rate-limit refill interval in milliseconds
    pub const RATE_LIMIT_INTERVAL_MS: u64 = 1000;

    /// Shell prompt of a node (`AP01m>` or `AP01m#`); only matches at the end
    /// of the received text, so prompt-shaped lines inside a response do not
    /// end the read
    pub const PROMPT_PATTERN: &str = r"(?m)^[\w.\-]+[>#$][ \t]*\z";

    /// Login prompt sent by nodes that require authentication
    pub const LOGIN_PATTERN: &str = r"(?i)(login|username)\s*:\s*$";

    /// Password prompt sent after the user name
    pub const PASSWORD_PATTERN: &str = r"(?i)password\s*:\s*$";

    /// Capacity of the queue event broadcast channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
}
