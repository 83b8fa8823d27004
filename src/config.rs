//! Console configuration
//!
//! Every section has a `Default`, so a config file only needs the fields it
//! overrides. Durations are written in milliseconds.

use crate::command::QueueConfig;
use crate::session::SessionConfig;
use anyhow::{Context, Result};
use node_console_shared::Node;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Serde adapter for `Duration` fields stored as whole milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// A node in the inventory plus where to reach it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    #[serde(flatten)]
    pub node: Node,
    /// Host or IP; falls back to the IP of the node's first token
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl NodeEntry {
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref().or_else(|| {
            self.node
                .tokens
                .values()
                .next()
                .map(|token| token.ip_address.as_str())
        })
    }
}

/// Top-level configuration for the console binary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub nodes: Vec<NodeEntry>,
    pub session: SessionConfig,
    pub queue: QueueConfig,
    /// Directory receiving one `<node>.jsonl` response archive per node
    pub archive_dir: Option<PathBuf>,
}

impl ConsoleConfig {
    /// Load a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn node(&self, name: &str) -> Option<&NodeEntry> {
        self.nodes.iter().find(|entry| entry.node.name == name)
    }
}
