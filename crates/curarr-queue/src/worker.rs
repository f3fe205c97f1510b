// SPDX-License-Identifier: GPL-3.0-or-later
//! The worker pool: a bounded set of cooperative workers pulling claimable
//! jobs, decoding payloads, and dispatching to handlers. Workers wait on the
//! store's insert notification and fall back to a jittered poll. Shutdown
//! drains: no new claims, in-flight handlers get a deadline, leftovers are
//! requeued.

use curarr_application::{events, Deps};
use curarr_domain::{Job, JobId, JobState};
use futures_util::FutureExt;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::handlers::{dispatch, JobContext};

pub struct WorkerPool {
    deps: Arc<Deps>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    in_flight: Arc<Mutex<HashMap<String, JobId>>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(deps: Arc<Deps>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            deps,
            shutdown_tx,
            shutdown_rx,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            handles: Vec::new(),
        }
    }

    /// Spawn the configured number of workers.
    pub fn start(&mut self) {
        let count = self.deps.config.queue.workers.max(1);
        info!(target: "workers", count, "starting worker pool");
        for index in 0..count {
            let worker_id = format!("worker-{index}");
            let deps = self.deps.clone();
            let shutdown = self.shutdown_rx.clone();
            let in_flight = self.in_flight.clone();
            self.handles.push(tokio::spawn(async move {
                worker_loop(deps, worker_id, shutdown, in_flight).await;
            }));
        }
    }

    /// Drain cleanly: refuse new claims, wait up to the configured deadline
    /// for in-flight handlers, requeue whatever exceeded it.
    pub async fn shutdown(mut self) {
        info!(target: "workers", "draining worker pool");
        let _ = self.shutdown_tx.send(true);

        let deadline = Duration::from_secs(self.deps.config.queue.drain_timeout_secs);
        let drain = async {
            for handle in self.handles.drain(..) {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(deadline, drain).await.is_err() {
            warn!(target: "workers", "drain deadline exceeded, requeueing in-flight jobs");
            let stuck: Vec<JobId> = self
                .in_flight
                .lock()
                .expect("in-flight lock")
                .values()
                .copied()
                .collect();
            for job_id in stuck {
                if let Err(err) = self.deps.jobs.requeue(job_id).await {
                    error!(target: "workers", job_id = %job_id, error = %err, "requeue failed");
                }
            }
        }
        info!(target: "workers", "worker pool stopped");
    }
}

async fn worker_loop(
    deps: Arc<Deps>,
    worker_id: String,
    mut shutdown: watch::Receiver<bool>,
    in_flight: Arc<Mutex<HashMap<String, JobId>>>,
) {
    debug!(target: "workers", worker_id, "worker started");
    let notify = deps.jobs.notifier();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let claimed = match deps.jobs.claim(&worker_id, 1).await {
            Ok(claimed) => claimed,
            Err(err) => {
                error!(target: "workers", worker_id, error = %err, "claim failed");
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
        };

        let Some(job) = claimed.into_iter().next() else {
            // Nothing ready: wait for an insert or poll again after a
            // jittered interval.
            let wait = poll_interval(&deps);
            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {}
            }
            continue;
        };

        in_flight
            .lock()
            .expect("in-flight lock")
            .insert(worker_id.clone(), job.id);
        process_job(&deps, &worker_id, job, shutdown.clone()).await;
        in_flight.lock().expect("in-flight lock").remove(&worker_id);
    }
    debug!(target: "workers", worker_id, "worker stopped");
}

fn poll_interval(deps: &Deps) -> Duration {
    let min = deps.config.queue.poll_interval_min_ms;
    let max = deps.config.queue.poll_interval_max_ms.max(min + 1);
    Duration::from_millis(rand::thread_rng().gen_range(min..max))
}

async fn process_job(deps: &Arc<Deps>, worker_id: &str, job: Job, shutdown: watch::Receiver<bool>) {
    let job_id = job.id;
    if let Err(err) = deps.jobs.mark_processing(job_id, worker_id).await {
        error!(target: "workers", job_id = %job_id, error = %err, "processing transition failed");
        return;
    }

    // Bad payloads fail as validation errors before the handler runs.
    let payload = match job.decode_payload() {
        Ok(payload) => payload,
        Err(err) => {
            warn!(target: "workers", job_id = %job_id, error = %err, "payload decode failed");
            finish_failure(deps, job_id, &format!("invalid payload: {err}"), false, None).await;
            return;
        }
    };

    let ctx = JobContext {
        job_id,
        worker_id: worker_id.to_string(),
        execution_time: chrono::Utc::now(),
        shutdown,
    };

    debug!(target: "workers", job_id = %job_id, job_type = %job.job_type, worker_id, "executing job");
    let outcome = std::panic::AssertUnwindSafe(dispatch(deps, &ctx, payload))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => {
            if let Err(err) = deps.jobs.complete(job_id).await {
                error!(target: "workers", job_id = %job_id, error = %err, "complete failed");
                return;
            }
            deps.hub
                .publish(events::job_status(job_id, JobState::Completed, None));
            publish_queue_stats(deps).await;
        }
        Ok(Err(workflow_err)) => {
            warn!(
                target: "workers",
                job_id = %job_id,
                job_type = %job.job_type,
                error = %workflow_err,
                "handler failed"
            );
            // Rate-limited jobs come back after the provider-supplied delay.
            let retry_delay = workflow_err
                .retry_after
                .map(|secs| chrono::Duration::seconds(secs as i64));
            finish_failure(
                deps,
                job_id,
                &workflow_err.to_string(),
                workflow_err.is_transient(),
                retry_delay,
            )
            .await;
        }
        Err(panic) => {
            // A panicking handler is a transient failure unless retries are
            // already exhausted.
            let message = panic_message(panic);
            error!(target: "workers", job_id = %job_id, message, "handler panicked");
            finish_failure(deps, job_id, &format!("panic: {message}"), true, None).await;
        }
    }
}

async fn finish_failure(
    deps: &Arc<Deps>,
    job_id: JobId,
    error: &str,
    transient: bool,
    retry_delay: Option<chrono::Duration>,
) {
    match deps.jobs.fail(job_id, error, transient, retry_delay).await {
        Ok(job) => {
            if job.state == JobState::Failed {
                deps.hub
                    .publish(events::job_status(job_id, JobState::Failed, Some(error)));
            }
            publish_queue_stats(deps).await;
        }
        Err(err) => {
            error!(target: "workers", job_id = %job_id, error = %err, "fail transition failed");
        }
    }
}

async fn publish_queue_stats(deps: &Arc<Deps>) {
    if let Ok(stats) = deps.jobs.stats().await {
        deps.hub.publish(events::job_queue_stats(&stats));
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
