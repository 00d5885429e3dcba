// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-job publish/subscribe fan-out.
//!
//! The hub holds one channel sender per live subscriber, keyed by job ID.
//! Publishing clones the event to every sender; the connection-serving code
//! owns the receiver and forwards events to the remote peer until it
//! disconnects.
//!
//! Delivery is best-effort and at-most-once: a failed send means the
//! receiver is gone, and the sink is pruned on the spot rather than
//! retried. Channels are unbounded; per-job event volume is a handful of
//! state transitions, so the publisher never blocks on a slow peer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tokio::sync::mpsc;

use crate::locks::{resilient_read, resilient_write};

use super::types::JobEvent;

/// Opaque handle identifying one subscriber within a job's sink set.
pub type SubscriberId = u64;

struct Sink {
    id: SubscriberId,
    tx: mpsc::UnboundedSender<JobEvent>,
}

/// Registry of live subscribers, keyed by job ID.
///
/// Mutated concurrently by handlers (subscribe/unsubscribe) and by the
/// orchestrator tasks (publish), so every path goes through the lock.
#[derive(Default)]
pub struct NotificationHub {
    sinks: RwLock<HashMap<String, Vec<Sink>>>,
    next_id: AtomicU64,
}

impl NotificationHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber for `job_id`.
    ///
    /// If `snapshot` is given (the job already exists in the store), it is
    /// delivered to this subscriber only, ahead of any subsequent events.
    /// Reconnect-and-catch-up is state replay, not an event log.
    ///
    /// Returns the handle used to unsubscribe plus the receiving end of the
    /// subscriber's channel.
    pub fn subscribe(
        &self,
        job_id: &str,
        snapshot: Option<JobEvent>,
    ) -> (SubscriberId, mpsc::UnboundedReceiver<JobEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if let Some(event) = snapshot {
            // The receiver cannot be gone yet; ignore the impossible error.
            let _ = tx.send(event);
        }

        let mut sinks = resilient_write(&self.sinks);
        sinks
            .entry(job_id.to_string())
            .or_default()
            .push(Sink { id, tx });

        tracing::debug!(job_id = %job_id, subscriber = id, "Subscriber registered");
        (id, rx)
    }

    /// Deliver `event` to every currently registered sink for `job_id`.
    ///
    /// A failed send never blocks the other sinks; the dead sink is removed.
    pub fn publish(&self, job_id: &str, event: &JobEvent) {
        let mut sinks = resilient_write(&self.sinks);
        let Some(entry) = sinks.get_mut(job_id) else {
            return;
        };

        entry.retain(|sink| {
            let delivered = sink.tx.send(event.clone()).is_ok();
            if !delivered {
                tracing::debug!(
                    job_id = %job_id,
                    subscriber = sink.id,
                    "Dropping disconnected subscriber"
                );
            }
            delivered
        });

        if entry.is_empty() {
            sinks.remove(job_id);
        }
    }

    /// Remove one subscriber. Idempotent.
    ///
    /// Once the last subscriber for a job leaves, the per-job entry is
    /// dropped entirely; sinks are not retained speculatively.
    pub fn unsubscribe(&self, job_id: &str, id: SubscriberId) {
        let mut sinks = resilient_write(&self.sinks);
        if let Some(entry) = sinks.get_mut(job_id) {
            entry.retain(|sink| sink.id != id);
            if entry.is_empty() {
                sinks.remove(job_id);
            }
        }
        tracing::debug!(job_id = %job_id, subscriber = id, "Subscriber removed");
    }

    /// Number of live subscribers for a job.
    pub fn subscriber_count(&self, job_id: &str) -> usize {
        resilient_read(&self.sinks)
            .get(job_id)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }
}
