//! Operator console core: ordered command execution against remote node sessions

pub mod archive;
pub mod command;
pub mod config;
pub mod session;
pub mod transport;
