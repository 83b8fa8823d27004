//! JSON-lines archive of batch responses, one file per node

use crate::command::BatchReport;
use anyhow::{Context, Result};
use node_console_shared::{now_ms, CommandStatus, TokenType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// One archived command outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub recorded_at: u64,
    pub node: String,
    pub command_id: u64,
    pub token_id: String,
    pub token_type: TokenType,
    pub text: String,
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

/// Appends batch outcomes to `<dir>/<node>.jsonl`
#[derive(Debug, Clone)]
pub struct ResponseArchive {
    dir: PathBuf,
}

impl ResponseArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, node: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", node))
    }

    /// Append every outcome of `report`; returns the file written
    pub async fn append(&self, node: &str, report: &BatchReport) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create archive dir {}", self.dir.display()))?;

        let recorded_at = now_ms();
        let mut lines = String::new();
        for outcome in &report.outcomes {
            let record = ArchiveRecord {
                recorded_at,
                node: node.to_string(),
                command_id: outcome.command_id.0,
                token_id: outcome.token_ref.token_id.clone(),
                token_type: outcome.token_ref.token_type,
                text: outcome.text.clone(),
                status: outcome.status,
                result: outcome.result.clone(),
                error: outcome.error.as_ref().map(|e| e.to_string()),
                error_kind: outcome.error.as_ref().map(|e| e.kind().to_string()),
            };
            lines.push_str(&serde_json::to_string(&record)?);
            lines.push('\n');
        }

        let path = self.path_for(node);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open archive {}", path.display()))?;
        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;
        Ok(path)
    }
}

/// Read an archive file back
pub async fn read_records(path: &Path) -> Result<Vec<ArchiveRecord>> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read archive {}", path.display()))?;
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).context("Corrupt archive line"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::BatchOutcome;
    use node_console_shared::{CommandError, CommandId, TokenRef};

    fn report() -> BatchReport {
        BatchReport {
            outcomes: vec![
                BatchOutcome {
                    token_ref: TokenRef::new("AP01m", "162", TokenType::Fbc),
                    command_id: CommandId(1),
                    text: "read 162".into(),
                    status: CommandStatus::Completed,
                    result: Some("state: up".into()),
                    error: None,
                },
                BatchOutcome {
                    token_ref: TokenRef::new("AP01m", "163", TokenType::Fbc),
                    command_id: CommandId(2),
                    text: "read 163".into(),
                    status: CommandStatus::Failed,
                    result: None,
                    error: Some(CommandError::Execution("ERROR: bad index".into())),
                },
            ],
            reclaimed: 1,
        }
    }

    #[tokio::test]
    async fn test_append_accumulates_lines() {
        let dir = tempfile::tempdir().expect("temp dir");
        let archive = ResponseArchive::new(dir.path().join("responses"));

        let path = archive.append("AP01m", &report()).await.expect("append");
        archive.append("AP01m", &report()).await.expect("append");
        assert_eq!(path, archive.path_for("AP01m"));

        let records = read_records(&path).await.expect("read back");
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].text, "read 162");
        assert_eq!(records[0].result.as_deref(), Some("state: up"));
        assert_eq!(records[1].status, CommandStatus::Failed);
        assert_eq!(records[1].error.as_deref(), Some("Execution error: ERROR: bad index"));
    }

    #[tokio::test]
    async fn test_failed_record_omits_result() {
        let dir = tempfile::tempdir().expect("temp dir");
        let archive = ResponseArchive::new(dir.path());
        let path = archive.append("AP01m", &report()).await.expect("append");

        let raw = std::fs::read_to_string(path).expect("read");
        let second = raw.lines().nth(1).expect("two lines");
        assert!(!second.contains("\"result\""));
        assert!(second.contains("\"token_type\":\"FBC\""));
        assert!(second.contains("\"error_kind\":\"execution\""));
    }
}
