//! Append-only JSONL log of sync runs

use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::{Result, SyncError};
use crate::report::SyncRun;

/// Log file name inside the archive root
pub const SYNC_LOG_FILE: &str = "sync_log.jsonl";

/// One JSON record per line, never rewritten
#[derive(Debug, Clone)]
pub struct SyncLog {
    path: PathBuf,
}

impl SyncLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_archive(root: &Path) -> Self {
        Self::new(root.join(SYNC_LOG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one run as a single line
    pub async fn append(&self, run: &SyncRun) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                SyncError::sync_log_error(&self.path, format!("Failed to create directory: {}", e))
            })?;
        }

        let mut line = serde_json::to_string(run)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SyncError::sync_log_error(&self.path, format!("Failed to open log: {}", e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| SyncError::sync_log_error(&self.path, format!("Failed to append: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| SyncError::sync_log_error(&self.path, format!("Failed to flush: {}", e)))?;

        Ok(())
    }

    /// The most recent `limit` runs, newest first; unreadable lines are skipped
    pub async fn recent(&self, limit: usize) -> Result<Vec<SyncRun>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SyncError::sync_log_error(
                    &self.path,
                    format!("Failed to read log: {}", e),
                ))
            }
        };

        let lines: Vec<&str> = content.lines().collect();
        let mut runs = Vec::new();
        for (number, line) in lines.iter().enumerate().rev() {
            if runs.len() >= limit {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SyncRun>(line) {
                Ok(run) => runs.push(run),
                Err(e) => warn!(path = %self.path.display(), line = number + 1, error = %e, "Skipping malformed sync log line"),
            }
        }

        Ok(runs)
    }
}
