// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download orchestrator.
//!
//! Drives each job from creation through execution to a terminal state:
//! `starting -> downloading -> {merging -> complete} | failed`. Exactly one
//! background task exists per job; it is the only writer of that job's
//! store entry, and every transition it makes is also published through
//! the notification hub in transition order.
//!
//! There is no cancellation: a subscriber that disconnects stops receiving
//! events, but the download runs to completion or failure regardless. The
//! task handles are retained so cancellation can be added later without
//! touching the state-machine contract.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::ApiError;
use crate::locks::{resilient_read, resilient_write};
use crate::utils::sanitize_title;
use crate::ytdlp::YtDlp;

use super::hub::{NotificationHub, SubscriberId};
use super::store::JobStore;
use super::types::{JobEvent, JobStatus};

/// Failure message delivered to subscribers. The real error is logged, not
/// leaked.
const GENERIC_FAILURE: &str = "An error occurred during download.";

/// Orchestrates background download jobs.
pub struct DownloadOrchestrator {
    store: Arc<JobStore>,
    hub: Arc<NotificationHub>,
    fetcher: YtDlp,
    download_dir: PathBuf,
    /// Handles of running background tasks, keyed by job ID. Finished
    /// handles are pruned on the next `start`.
    tasks: RwLock<HashMap<String, JoinHandle<()>>>,
}

impl DownloadOrchestrator {
    /// Create an orchestrator writing into `download_dir`.
    pub fn new(
        store: Arc<JobStore>,
        hub: Arc<NotificationHub>,
        fetcher: YtDlp,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            hub,
            fetcher,
            download_dir,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Validate the request, reserve a job, and launch its background task.
    ///
    /// Returns the new job ID synchronously; the download proceeds on its
    /// own and is observable via [`DownloadOrchestrator::subscribe`].
    pub fn start(
        &self,
        url: &str,
        format: &str,
        title: Option<&str>,
    ) -> Result<String, ApiError> {
        if url.trim().is_empty() || format.trim().is_empty() {
            return Err(ApiError::invalid_request("URL and format are required"));
        }

        let title = sanitize_title(title);
        let job = self.store.create(&title, &self.download_dir);
        let job_id = job.id.clone();

        tracing::info!(job_id = %job_id, title = %title, "Download job created");

        let store = Arc::clone(&self.store);
        let hub = Arc::clone(&self.hub);
        let fetcher = self.fetcher.clone();
        let url = url.to_string();
        let format = format.to_string();
        let task_id = job_id.clone();
        let handle = tokio::spawn(async move {
            Self::run_job(store, hub, fetcher, &task_id, &url, &format).await;
        });

        let mut tasks = resilient_write(&self.tasks);
        tasks.retain(|_, h| !h.is_finished());
        tasks.insert(job_id.clone(), handle);

        Ok(job_id)
    }

    /// Register an observer for a job's events.
    ///
    /// If the job exists, a synthetic current-state snapshot is delivered
    /// first so a reconnecting client catches up; missed transitions are
    /// not replayed. Subscribing to an unknown ID is allowed and simply
    /// yields whatever is published for it later.
    pub fn subscribe(&self, job_id: &str) -> (SubscriberId, mpsc::UnboundedReceiver<JobEvent>) {
        let snapshot = self.store.get(job_id).map(|job| JobEvent::snapshot_of(&job));
        self.hub.subscribe(job_id, snapshot)
    }

    /// Number of background tasks that have not reached a terminal state.
    pub fn running_jobs(&self) -> usize {
        resilient_read(&self.tasks)
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// The single background unit of work for one job.
    async fn run_job(
        store: Arc<JobStore>,
        hub: Arc<NotificationHub>,
        fetcher: YtDlp,
        job_id: &str,
        url: &str,
        format: &str,
    ) {
        let Some(job) = store.get(job_id) else {
            tracing::error!(job_id = %job_id, "Job vanished before its task ran");
            return;
        };

        Self::transition(
            &store,
            &hub,
            job_id,
            JobStatus::Downloading,
            0,
            JobEvent::new(JobStatus::Downloading, 0, "Starting download..."),
        );
        tracing::info!(job_id = %job_id, url = %url, format = %format, "Download started");

        match fetcher.fetch_to_file(url, format, &job.output_path).await {
            Ok(()) => {
                // The tool merges as part of the fetch; report the phase
                // anyway as a progress heuristic for subscribers.
                Self::transition(
                    &store,
                    &hub,
                    job_id,
                    JobStatus::Merging,
                    50,
                    JobEvent::new(JobStatus::Merging, 50, "Merging formats..."),
                );

                Self::transition(
                    &store,
                    &hub,
                    job_id,
                    JobStatus::Complete,
                    100,
                    JobEvent::new(JobStatus::Complete, 100, "Download complete!")
                        .with_file(format!("/download-file/{}", job_id)),
                );
                tracing::info!(
                    job_id = %job_id,
                    path = %job.output_path.display(),
                    "Download complete"
                );
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Download job failed");
                let progress = store.get(job_id).map(|j| j.progress).unwrap_or(0);
                Self::transition(
                    &store,
                    &hub,
                    job_id,
                    JobStatus::Failed,
                    progress,
                    JobEvent::new(JobStatus::Failed, progress, GENERIC_FAILURE),
                );
            }
        }
    }

    /// Apply one state-machine transition: store first, then publish.
    fn transition(
        store: &JobStore,
        hub: &NotificationHub,
        job_id: &str,
        status: JobStatus,
        progress: u8,
        event: JobEvent,
    ) {
        store.update(job_id, |job| {
            job.status = status;
            job.progress = progress;
        });
        hub.publish(job_id, &event);
    }
}
