// SPDX-License-Identifier: GPL-3.0-or-later
//! Bulk enrichment: one run at a time, enqueue low-priority enrichment jobs
//! for every monitored movie in id order, stop the whole run on the first
//! provider rate limit. Outcome counters are aggregated in-process and
//! published through the broadcaster; nothing is persisted.

use curarr_domain::{ChainContext, JobPayload, JobPriority, JobSpec, MovieId};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::deps::Deps;
use crate::errors::{WorkflowError, WorkflowResult};
use crate::events;

const PROGRESS_INTERVAL: u64 = 100;

#[derive(Debug, Clone, Default)]
pub struct BulkRunStats {
    pub total: u64,
    pub processed: u64,
    pub updated: u64,
    pub failed: u64,
    pub skipped: u64,
    pub stopped: bool,
    pub stop_reason: Option<String>,
}

/// Shared between the scheduler-facing run starter and the enrichment job
/// handler, which reports per-job outcomes back.
#[derive(Default)]
pub struct BulkController {
    running: AtomicBool,
    total: AtomicU64,
    processed: AtomicU64,
    updated: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    stopped: AtomicBool,
    stop_reason: Mutex<Option<String>>,
}

impl BulkController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> BulkRunStats {
        BulkRunStats {
            total: self.total.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::SeqCst),
            updated: self.updated.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            stopped: self.stopped.load(Ordering::SeqCst),
            stop_reason: self.stop_reason.lock().expect("bulk lock").clone(),
        }
    }

    /// Start a run: enqueue one enrichment job per monitored movie. Enforced
    /// single-flight by the in-process flag plus the storage-backed lock.
    pub async fn start_run(&self, deps: &Deps) -> WorkflowResult<u64> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(WorkflowError::validation("bulk enrichment already running"));
        }
        if !deps.settings.try_acquire_bulk_lock("bulk-enrichment").await? {
            self.running.store(false, Ordering::SeqCst);
            return Err(WorkflowError::validation(
                "bulk enrichment lock held elsewhere",
            ));
        }

        self.total.store(0, Ordering::SeqCst);
        self.processed.store(0, Ordering::SeqCst);
        self.updated.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.skipped.store(0, Ordering::SeqCst);
        self.stopped.store(false, Ordering::SeqCst);
        *self.stop_reason.lock().expect("bulk lock") = None;

        let ids = deps.movies.list_monitored_ids().await?;
        self.total.store(ids.len() as u64, Ordering::SeqCst);
        info!(target: "bulk", movies = ids.len(), "bulk enrichment starting");

        let mut enqueued = 0u64;
        for (index, movie_id) in ids.iter().enumerate() {
            let spec = JobSpec::new(JobPayload::EnrichMetadata {
                movie_id: *movie_id,
                manual: false,
                force_refresh: false,
                require_complete: true,
                chain: ChainContext::new("bulk"),
            })
            .with_priority(JobPriority::LOW);

            match deps.jobs.insert_unless_active(spec).await? {
                Some(_) => enqueued += 1,
                None => {
                    // An active enrichment for this movie already covers it.
                    self.skipped.fetch_add(1, Ordering::SeqCst);
                }
            }

            if (index as u64 + 1) % PROGRESS_INTERVAL == 0 {
                info!(target: "bulk", enqueued = index + 1, total = ids.len(), "bulk enqueue progress");
                deps.hub
                    .publish(events::bulk_progress(index as u64 + 1, ids.len() as u64));
            }
        }

        if ids.is_empty() {
            self.finish(deps).await;
        }
        Ok(enqueued)
    }

    /// Called by the enrichment handler for every bulk job that finishes.
    pub async fn record_outcome(&self, deps: &Deps, _movie_id: MovieId, succeeded: bool) {
        if !self.is_running() {
            return;
        }
        self.processed.fetch_add(1, Ordering::SeqCst);
        if succeeded {
            self.updated.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }

        let stats = self.stats();
        if stats.processed % PROGRESS_INTERVAL == 0 {
            deps.hub
                .publish(events::bulk_progress(stats.processed, stats.total));
        }
        if stats.processed + stats.skipped >= stats.total {
            self.finish(deps).await;
        }
    }

    /// A rate-limited provider short-circuits the whole run: pending bulk
    /// jobs are cancelled and the run is marked stopped.
    pub async fn signal_rate_limit(&self, deps: &Deps, reason: &str) {
        if !self.is_running() || self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.stop_reason.lock().expect("bulk lock") = Some(format!("rate_limit: {reason}"));

        match deps.jobs_cancel_pending_bulk().await {
            Ok(cancelled) => {
                warn!(target: "bulk", cancelled, reason, "bulk run stopped on rate limit");
            }
            Err(err) => {
                warn!(target: "bulk", error = %err, "failed to cancel pending bulk jobs");
            }
        }

        let stats = self.stats();
        deps.hub
            .publish(events::bulk_rate_limit(stats.processed, reason));
        self.finish(deps).await;
    }

    async fn finish(&self, deps: &Deps) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = deps.settings.release_bulk_lock().await {
            warn!(target: "bulk", error = %err, "failed to release bulk lock");
        }
        let stats = self.stats();
        info!(
            target: "bulk",
            total = stats.total,
            processed = stats.processed,
            updated = stats.updated,
            failed = stats.failed,
            skipped = stats.skipped,
            stopped = stats.stopped,
            "bulk enrichment finished"
        );
        deps.hub.publish(events::bulk_complete(&stats));
    }
}

impl Deps {
    /// Cancel every still-pending bulk enrichment job.
    pub(crate) async fn jobs_cancel_pending_bulk(&self) -> anyhow::Result<u64> {
        self.jobs.cancel_pending_bulk_enrichment().await
    }
}
