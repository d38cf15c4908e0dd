//! Human-readable progress lines.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Where a table's progress lines go.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogDestination {
    /// The tracing subscriber only.
    #[default]
    Console,
    /// The tracing subscriber, plus one appended line per message in this file.
    File(PathBuf),
}

/// Records progress lines. Failures to record are not reported to the caller.
#[async_trait]
pub trait ProgressLog: Send + Sync {
    async fn log(&self, message: &str, destination: &LogDestination);
}

/// Progress log writing through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgressLog;

#[async_trait]
impl ProgressLog for TracingProgressLog {
    async fn log(&self, message: &str, destination: &LogDestination) {
        info!("{}", message);

        if let LogDestination::File(path) = destination {
            if let Err(e) = append_line(path, message).await {
                warn!("Failed to write progress to {:?}: {}", path, e);
            }
        }
    }
}

async fn append_line(path: &Path, message: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    let line = format!("{} {}\n", Utc::now().to_rfc3339(), message);
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
