// SPDX-License-Identifier: GPL-3.0-or-later
//! Periodic triggers. Each configured cadence spawns an interval task that
//! enqueues its scheduled job type; a tick is skipped while a prior instance
//! is still pending or processing, so slow runs never pile up.

use curarr_application::Deps;
use curarr_domain::{JobPayload, JobPriority, JobSpec};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct Scheduler {
    deps: Arc<Deps>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(deps: Arc<Deps>) -> Self {
        Self {
            deps,
            handles: Vec::new(),
        }
    }

    pub fn start(&mut self) {
        let schedule = self.deps.config.schedule.clone();
        info!(
            target: "scheduler",
            file_scan = schedule.file_scan_interval_secs,
            provider_update = schedule.provider_update_interval_secs,
            cleanup = schedule.cleanup_interval_secs,
            bulk = schedule.bulk_enrichment_interval_secs,
            "starting scheduler"
        );

        self.spawn_trigger(schedule.file_scan_interval_secs, || {
            JobPayload::ScheduledFileScan {}
        });
        self.spawn_trigger(schedule.provider_update_interval_secs, || {
            JobPayload::ScheduledProviderUpdate {}
        });
        self.spawn_trigger(schedule.cleanup_interval_secs, || {
            JobPayload::ScheduledCleanup {}
        });
        self.spawn_bulk_trigger(schedule.bulk_enrichment_interval_secs);
    }

    pub fn stop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        info!(target: "scheduler", "scheduler stopped");
    }

    fn spawn_trigger(
        &mut self,
        interval_secs: u64,
        payload: impl Fn() -> JobPayload + Send + 'static,
    ) {
        if interval_secs == 0 {
            return;
        }
        let deps = self.deps.clone();
        self.handles.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; scheduled work should wait a
            // full period after startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let payload = payload();
                let job_type = payload.job_type();
                match deps
                    .jobs
                    .insert_unless_active(
                        JobSpec::new(payload).with_priority(JobPriority::SCHEDULED),
                    )
                    .await
                {
                    Ok(Some(job)) => {
                        debug!(target: "scheduler", job_type = %job_type, job_id = %job.id, "scheduled job enqueued");
                    }
                    Ok(None) => {
                        debug!(target: "scheduler", job_type = %job_type, "previous instance still active, tick skipped");
                    }
                    Err(err) => {
                        warn!(target: "scheduler", job_type = %job_type, error = %err, "scheduled enqueue failed");
                    }
                }
            }
        }));
    }

    fn spawn_bulk_trigger(&mut self, interval_secs: u64) {
        if interval_secs == 0 {
            return;
        }
        let deps = self.deps.clone();
        self.handles.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if deps.bulk.is_running() {
                    debug!(target: "scheduler", "bulk run still active, tick skipped");
                    continue;
                }
                match deps.bulk.start_run(&deps).await {
                    Ok(enqueued) => {
                        info!(target: "scheduler", enqueued, "bulk enrichment run started");
                    }
                    Err(err) => {
                        warn!(target: "scheduler", error = %err, "bulk run not started");
                    }
                }
            }
        }));
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
