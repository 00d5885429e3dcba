// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory job store.
//!
//! The authoritative state of every background download job. Jobs live for
//! the process lifetime; there is no deletion and no on-disk persistence.
//!
//! Write access follows a single-writer discipline: only the background
//! task that owns a job calls [`JobStore::update`] for it. Handlers read
//! cloned snapshots.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use chrono::Utc;
use rand::Rng;

use crate::locks::{resilient_read, resilient_write};

use super::types::{Job, JobStatus};

/// Concurrency-safe mapping from job ID to job state.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

/// Generate a fresh 128-bit job identifier, hex-encoded.
fn generate_job_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

impl JobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a new job in `starting` state with progress 0.
    ///
    /// The output path is derived here, `<download_dir>/<id>_<title>.mp4`,
    /// so the path is namespaced by the job ID before the download begins
    /// and concurrent jobs can never collide even when titles do.
    /// Returns a snapshot of the created job.
    pub fn create(&self, title: &str, download_dir: &Path) -> Job {
        let mut jobs = resilient_write(&self.jobs);

        // 128 bits of randomness makes a collision negligible, but an
        // existing entry must never be overwritten, so re-roll if one hits.
        let mut id = generate_job_id();
        while jobs.contains_key(&id) {
            id = generate_job_id();
        }

        let now = Utc::now();
        let job = Job {
            output_path: download_dir.join(format!("{}_{}.mp4", id, title)),
            id: id.clone(),
            status: JobStatus::Starting,
            progress: 0,
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        jobs.insert(id, job.clone());
        job
    }

    /// Get a snapshot of a job's current state.
    pub fn get(&self, id: &str) -> Option<Job> {
        resilient_read(&self.jobs).get(id).cloned()
    }

    /// Atomically mutate a job's status/progress fields.
    ///
    /// Returns false if the job does not exist.
    pub fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = resilient_write(&self.jobs);
        match jobs.get_mut(id) {
            Some(job) => {
                f(job);
                job.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Number of jobs tracked this process lifetime.
    pub fn len(&self) -> usize {
        resilient_read(&self.jobs).len()
    }

    /// True when no job has been created yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_create_inserts_starting_job() {
        let store = JobStore::new();
        let job = store.create("My_Video", Path::new("downloads"));

        assert_eq!(job.status, JobStatus::Starting);
        assert_eq!(job.progress, 0);
        assert_eq!(job.title, "My_Video");

        let fetched = store.get(&job.id).expect("job should exist");
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.status, JobStatus::Starting);
    }

    #[test]
    fn test_job_id_shape() {
        let store = JobStore::new();
        let job = store.create("video", Path::new("downloads"));

        // 16 random bytes, hex-encoded
        assert_eq!(job.id.len(), 32);
        assert!(job.id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_output_path_is_namespaced_by_id() {
        let store = JobStore::new();
        let a = store.create("clip", Path::new("downloads"));
        let b = store.create("clip", Path::new("downloads"));

        let a_name = a.output_path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(a_name, format!("{}_clip.mp4", a.id));
        // Same title, different jobs, different paths
        assert_ne!(a.output_path, b.output_path);
    }

    #[test]
    fn test_ids_unique_across_creations() {
        let store = JobStore::new();
        let mut seen = HashSet::new();
        for _ in 0..256 {
            let job = store.create("video", Path::new("downloads"));
            assert!(seen.insert(job.id), "duplicate job id");
        }
        assert_eq!(store.len(), 256);
    }

    #[test]
    fn test_ids_unique_under_concurrent_creation() {
        let store = Arc::new(JobStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                (0..64)
                    .map(|_| store.create("video", Path::new("downloads")).id)
                    .collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("creator thread panicked") {
                assert!(seen.insert(id), "duplicate job id");
            }
        }
        assert_eq!(store.len(), 8 * 64);
    }

    #[test]
    fn test_update_transitions_and_timestamps() {
        let store = JobStore::new();
        let job = store.create("video", Path::new("downloads"));

        let updated = store.update(&job.id, |j| {
            j.status = JobStatus::Downloading;
            j.progress = 0;
        });
        assert!(updated);

        let fetched = store.get(&job.id).unwrap();
        assert_eq!(fetched.status, JobStatus::Downloading);
        assert!(fetched.updated_at >= job.updated_at);

        store.update(&job.id, |j| {
            j.status = JobStatus::Complete;
            j.progress = 100;
        });
        let fetched = store.get(&job.id).unwrap();
        assert_eq!(fetched.status, JobStatus::Complete);
        assert_eq!(fetched.progress, 100);
    }

    #[test]
    fn test_update_missing_job_is_noop() {
        let store = JobStore::new();
        assert!(!store.update("ffffffffffffffffffffffffffffffff", |j| {
            j.status = JobStatus::Failed;
        }));
    }

    #[test]
    fn test_get_missing_job() {
        let store = JobStore::new();
        assert!(store.get("00000000000000000000000000000000").is_none());
    }
}
