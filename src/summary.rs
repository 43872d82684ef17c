//! Run summary and sidecar metadata
//!
//! Built by the orchestrator at the end of a run, rendered to the
//! terminal (Display or JSON) and to a plain-text sidecar file that
//! travels with the optional archive.

use crate::endpoint::{ConnectionAttempt, Endpoint};
use crate::error::Result;
use crate::package::ArchiveInfo;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// How the run ended. Cancellation is a status, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("Completed"),
            Self::Cancelled => f.write_str("Cancelled"),
        }
    }
}

/// Per-folder outcome counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FolderStats {
    pub downloaded: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// A task that was still failing when the run ended.
#[derive(Debug, Clone, Serialize)]
pub struct FailedTask {
    pub folder: String,
    pub uid: u32,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub account: String,
    pub endpoint: Endpoint,
    /// Candidates that failed before the endpoint was pinned.
    pub connection_attempts: Vec<ConnectionAttempt>,
    /// Total tasks enqueued by the scanner.
    pub total: u64,
    pub downloaded: u64,
    pub skipped: u64,
    pub failed: Vec<FailedTask>,
    /// Tasks never consumed because the run was cancelled.
    pub remaining: u64,
    pub duration_secs: u64,
    /// Messages per hour over the whole run.
    pub speed_per_hour: f64,
    /// `(folder, stats)` in scan order.
    pub folders: Vec<(String, FolderStats)>,
    /// Folders the scanner had to skip.
    pub failed_folders: Vec<String>,
}

impl RunSummary {
    /// Write the plain-text sidecar, including archive integrity
    /// data when the run was packaged.
    pub async fn write_sidecar(&self, path: &Path, archive: Option<&ArchiveInfo>) -> Result<()> {
        let mut text = String::new();
        if let Some(info) = archive {
            text.push_str(&format!(
                "File: {}\nSize: {} bytes\nSHA1: {}\n",
                info.zip_path
                    .file_name()
                    .map_or_else(|| info.zip_path.display().to_string(), |n| n
                        .to_string_lossy()
                        .into_owned()),
                info.size,
                info.sha1,
            ));
        }
        text.push_str(&format!("{self}"));
        tokio::fs::write(path, text).await?;
        Ok(())
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Status: {}", self.status)?;
        writeln!(f, "Account: {}", self.account)?;
        writeln!(
            f,
            "Server: {}:{}{}",
            self.endpoint.host,
            self.endpoint.port,
            if self.endpoint.ssl { "" } else { " (no TLS)" }
        )?;
        for attempt in &self.connection_attempts {
            writeln!(f, "Rejected candidate: {} ({})", attempt.host, attempt.error)?;
        }
        writeln!(f, "Total messages: {}", self.total)?;
        writeln!(f, "Downloaded: {}", self.downloaded)?;
        writeln!(f, "Skipped duplicates: {}", self.skipped)?;
        writeln!(f, "Failed: {}", self.failed.len())?;
        if self.remaining > 0 {
            writeln!(f, "Remaining: {}", self.remaining)?;
        }
        writeln!(f, "Duration: {}s", self.duration_secs)?;
        writeln!(f, "Speed: {:.2} messages/hour", self.speed_per_hour)?;
        for (folder, stats) in &self.folders {
            writeln!(
                f,
                "  {folder}: {} downloaded, {} skipped, {} failed",
                stats.downloaded, stats.skipped, stats.failed
            )?;
        }
        for folder in &self.failed_folders {
            writeln!(f, "  {folder}: scan failed, folder skipped")?;
        }
        for task in &self.failed {
            writeln!(
                f,
                "  failed: {} uid {} ({})",
                task.folder, task.uid, task.reason
            )?;
        }
        Ok(())
    }
}
