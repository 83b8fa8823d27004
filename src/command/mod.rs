//! Command execution infrastructure for the console
//!
//! This module handles:
//! - Queueing commands in strict FIFO order behind a single worker
//! - Executing each command against a node session
//! - Pacing execution with a token-bucket rate limiter
//! - Running generated batches and reclaiming completed work

mod executor;
mod generator;
mod processor;
mod queue;
mod rate_limit;

pub use executor::{CommandExecutor, FnExecutor};
pub use generator::{build_batch, CommandGenerator, TemplateGenerator};
pub use processor::{BatchItem, BatchOutcome, BatchReport, SequentialCommandProcessor};
pub use queue::{CommandQueue, Completion, QueueConfig, QueueEvent};
pub use rate_limit::{RateLimitConfig, RateLimiter};
