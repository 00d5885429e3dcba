// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Job types for background video downloading.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a download job.
///
/// Transitions follow `starting -> downloading -> {merging -> complete} | failed`.
/// `merging` is reported before `complete` even though the external tool
/// fetches and muxes in one step; it gives subscribers a progress heuristic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Reserved, background task not yet running
    Starting,
    /// External tool is fetching
    Downloading,
    /// Post-fetch mux step
    Merging,
    /// Output file is on disk and retrievable
    Complete,
    /// Tool failed; no further transitions
    Failed,
}

impl JobStatus {
    /// Returns true if no further transitions occur after this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Starting => "starting",
            JobStatus::Downloading => "downloading",
            JobStatus::Merging => "merging",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One tracked download job.
///
/// Mutated only by the background task that owns it; everything else reads
/// cloned snapshots out of the store.
#[derive(Debug, Clone)]
pub struct Job {
    /// 128-bit random identifier, hex-encoded
    pub id: String,
    /// Current status
    pub status: JobStatus,
    /// Percentage, 0-100, non-decreasing on the happy path
    pub progress: u8,
    /// Reserved output location, namespaced by the job id
    pub output_path: PathBuf,
    /// Sanitized display name, used for the downloaded file name
    pub title: String,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the status was last updated
    pub updated_at: DateTime<Utc>,
}

/// An immutable notification pushed to subscribers.
///
/// Delivered at-most-once per currently-connected subscriber, best-effort.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    /// Retrieval path, present only once the job completes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl JobEvent {
    /// Create an event for a state transition.
    pub fn new(status: JobStatus, progress: u8, message: impl Into<String>) -> Self {
        Self {
            status,
            progress,
            message: message.into(),
            file: None,
        }
    }

    /// Attach the file reference delivered with the `complete` event.
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Synthesize a current-state snapshot for a reconnecting subscriber.
    pub fn snapshot_of(job: &Job) -> Self {
        Self::new(
            job.status,
            job.progress,
            format!("Reconnected. Current status: {}", job.status),
        )
    }
}
