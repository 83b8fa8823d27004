//! Remote sessions to nodes
//!
//! This module handles:
//! - Connecting over a pluggable transport with bounded, configurable retry
//! - Telnet option refusal and optional login
//! - Sending a command line and collecting the response up to the prompt

mod remote;
mod retry;

pub use remote::{RemoteSession, SessionConfig};
pub use retry::{Backoff, RetryPolicy};
