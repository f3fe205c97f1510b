// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use curarr_domain::{Job, JobId, JobPriority, JobQueueStats, JobSpec, JobState, JobType};
use rand::Rng;
use sqlx::Row;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::repositories::JobStore;
use crate::sqlite_adapters::{parse_dt, parse_dt_opt};

/// Exponential backoff with jitter: base 2 s, doubling per attempt, capped at
/// 5 minutes, then scaled by a random factor in [0.75, 1.25].
pub fn retry_backoff(retry_count: u32) -> Duration {
    let base_secs = 2u64.saturating_mul(1u64 << retry_count.min(16)).min(300);
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::milliseconds((base_secs as f64 * 1000.0 * jitter) as i64)
}

pub struct SqliteJobStore {
    pool: SqlitePool,
    notify: Arc<Notify>,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    async fn insert_row(&self, spec: &JobSpec) -> Result<Job> {
        let job_type = spec.payload.job_type();
        let payload = serde_json::to_value(&spec.payload)?;
        let now = Utc::now();
        let scheduled_at = spec.scheduled_at.unwrap_or(now);

        let q = r#"
            INSERT INTO jobs (
                job_type, priority, payload, state, retry_count, max_retries,
                scheduled_at, parent_job_id, created_at
            ) VALUES (?, ?, ?, 'pending', 0, ?, ?, ?, ?)
        "#;
        let result = sqlx::query(q)
            .bind(job_type.as_str())
            .bind(spec.priority.0 as i64)
            .bind(payload.to_string())
            .bind(spec.max_retries as i64)
            .bind(scheduled_at.to_rfc3339())
            .bind(spec.parent_job_id.map(|p| p.0))
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;

        let id = JobId(result.last_insert_rowid());
        debug!(target: "jobs", job_id = %id, job_type = %job_type, priority = %spec.priority, "job enqueued");
        self.notify.notify_waiters();

        self.get(id)
            .await?
            .ok_or_else(|| anyhow!("job vanished after insert: {}", id))
    }
}

#[async_trait::async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, spec: JobSpec) -> Result<Job> {
        self.insert_row(&spec).await
    }

    async fn insert_unless_active(&self, spec: JobSpec) -> Result<Option<Job>> {
        let job_type = spec.payload.job_type();
        let movie_id = spec.payload.movie_id();

        let active: i64 = match movie_id {
            Some(movie_id) => {
                let q = r#"
                    SELECT COUNT(*) AS n FROM jobs
                    WHERE job_type = ?
                      AND state IN ('pending', 'claimed', 'processing', 'retrying')
                      AND json_extract(payload, '$.movie_id') = ?
                "#;
                sqlx::query(q)
                    .bind(job_type.as_str())
                    .bind(movie_id.0)
                    .fetch_one(&self.pool)
                    .await?
                    .try_get("n")?
            }
            None => {
                let q = r#"
                    SELECT COUNT(*) AS n FROM jobs
                    WHERE job_type = ?
                      AND state IN ('pending', 'claimed', 'processing', 'retrying')
                "#;
                sqlx::query(q)
                    .bind(job_type.as_str())
                    .fetch_one(&self.pool)
                    .await?
                    .try_get("n")?
            }
        };

        if active > 0 {
            debug!(target: "jobs", job_type = %job_type, "suppressing duplicate active job");
            return Ok(None);
        }
        Ok(Some(self.insert_row(&spec).await?))
    }

    async fn claim(&self, worker_id: &str, max: u32) -> Result<Vec<Job>> {
        let now = Utc::now();
        // Ready rows in claim order. `retrying` is pending-with-delay; it
        // becomes claimable once its backoff window has passed.
        let candidates = sqlx::query(
            r#"
            SELECT id FROM jobs
            WHERE state IN ('pending', 'retrying') AND scheduled_at <= ?
            ORDER BY priority ASC, scheduled_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(now.to_rfc3339())
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for row in candidates {
            let id: i64 = row.try_get("id")?;
            // Conditional update; a concurrent worker that won the row leaves
            // rows_affected at zero and we move on.
            let result = sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'claimed', claimed_at = ?, claimed_by = ?
                WHERE id = ? AND state IN ('pending', 'retrying') AND scheduled_at <= ?
                "#,
            )
            .bind(now.to_rfc3339())
            .bind(worker_id)
            .bind(id)
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                if let Some(job) = self.get(JobId(id)).await? {
                    claimed.push(job);
                }
            }
        }

        if !claimed.is_empty() {
            debug!(target: "jobs", worker_id, count = claimed.len(), "claimed jobs");
        }
        Ok(claimed)
    }

    async fn mark_processing(&self, id: JobId, worker_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'processing' WHERE id = ? AND state = 'claimed' AND claimed_by = ?",
        )
        .bind(id.0)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("job {} is not claimed by {}", id, worker_id));
        }
        Ok(())
    }

    async fn complete(&self, id: JobId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'completed', completed_at = ? WHERE id = ? AND state = 'processing'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("job {} is not processing", id));
        }
        debug!(target: "jobs", job_id = %id, "job completed");
        Ok(())
    }

    async fn fail(
        &self,
        id: JobId,
        error: &str,
        transient: bool,
        retry_delay: Option<Duration>,
    ) -> Result<Job> {
        let job = self
            .get(id)
            .await?
            .ok_or_else(|| anyhow!("job not found: {}", id))?;

        if transient && job.retry_count < job.max_retries {
            let delay = retry_delay.unwrap_or_else(|| retry_backoff(job.retry_count));
            let next = Utc::now() + delay;
            sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'retrying', retry_count = retry_count + 1,
                    scheduled_at = ?, claimed_at = NULL, claimed_by = NULL,
                    last_error = ?
                WHERE id = ?
                "#,
            )
            .bind(next.to_rfc3339())
            .bind(error)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
            warn!(
                target: "jobs",
                job_id = %id,
                retry = job.retry_count + 1,
                max_retries = job.max_retries,
                next_attempt = %next,
                error,
                "job failed, retrying"
            );
            self.notify.notify_waiters();
        } else {
            sqlx::query(
                "UPDATE jobs SET state = 'failed', completed_at = ?, last_error = ? WHERE id = ?",
            )
            .bind(Utc::now().to_rfc3339())
            .bind(error)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
            warn!(target: "jobs", job_id = %id, error, "job failed permanently");
        }

        self.get(id)
            .await?
            .ok_or_else(|| anyhow!("job vanished after fail: {}", id))
    }

    async fn cancel(&self, id: JobId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'cancelled', completed_at = ? WHERE id = ? AND state IN ('pending', 'retrying')",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("job {} cannot be cancelled", id));
        }
        Ok(())
    }

    async fn cancel_pending_bulk_enrichment(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'cancelled', completed_at = ?
            WHERE job_type = 'enrich-metadata'
              AND state IN ('pending', 'retrying')
              AND json_extract(payload, '$.require_complete') = 1
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn requeue(&self, id: JobId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending', claimed_at = NULL, claimed_by = NULL, scheduled_at = ?
            WHERE id = ? AND state IN ('claimed', 'processing')
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("job {} is not in flight", id));
        }
        warn!(target: "jobs", job_id = %id, "job requeued");
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ? LIMIT 1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_job(&r)).transpose()
    }

    async fn has_active(&self, job_type: JobType) -> Result<bool> {
        let n: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM jobs
            WHERE job_type = ? AND state IN ('pending', 'claimed', 'processing', 'retrying')
            "#,
        )
        .bind(job_type.as_str())
        .fetch_one(&self.pool)
        .await?
        .try_get("n")?;
        Ok(n > 0)
    }

    async fn cleanup(
        &self,
        completed_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
    ) -> Result<u64> {
        let completed = sqlx::query(
            "DELETE FROM jobs WHERE state IN ('completed', 'cancelled') AND completed_at < ?",
        )
        .bind(completed_before.to_rfc3339())
        .execute(&self.pool)
        .await?
        .rows_affected();

        let failed = sqlx::query("DELETE FROM jobs WHERE state = 'failed' AND completed_at < ?")
            .bind(failed_before.to_rfc3339())
            .execute(&self.pool)
            .await?
            .rows_affected();

        let total = completed + failed;
        if total > 0 {
            debug!(target: "jobs", purged = total, "job history cleaned up");
        }
        Ok(total)
    }

    async fn stats(&self) -> Result<JobQueueStats> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await?;
        let mut stats = JobQueueStats::default();
        for row in rows {
            let state: String = row.try_get("state")?;
            let n: i64 = row.try_get("n")?;
            let n = n as u64;
            match state.parse::<JobState>().map_err(|e| anyhow!(e))? {
                JobState::Pending => stats.pending = n,
                JobState::Claimed => stats.claimed = n,
                JobState::Processing => stats.processing = n,
                JobState::Completed => stats.completed = n,
                JobState::Failed => stats.failed = n,
                JobState::Retrying => stats.retrying = n,
                JobState::Cancelled => stats.cancelled = n,
            }
        }
        Ok(stats)
    }

    fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
    let job_type: String = row.try_get("job_type")?;
    let state: String = row.try_get("state")?;
    let payload: String = row.try_get("payload")?;
    let priority: i64 = row.try_get("priority")?;
    let retry_count: i64 = row.try_get("retry_count")?;
    let max_retries: i64 = row.try_get("max_retries")?;
    Ok(Job {
        id: JobId(row.try_get("id")?),
        job_type: job_type.parse::<JobType>().map_err(|e| anyhow!(e))?,
        priority: JobPriority(priority as u8),
        payload: serde_json::from_str(&payload)?,
        state: state.parse::<JobState>().map_err(|e| anyhow!(e))?,
        retry_count: retry_count as u32,
        max_retries: max_retries as u32,
        scheduled_at: parse_dt(row.try_get("scheduled_at")?)?,
        claimed_at: parse_dt_opt(row.try_get("claimed_at")?)?,
        claimed_by: row.try_get("claimed_by")?,
        completed_at: parse_dt_opt(row.try_get("completed_at")?)?,
        last_error: row.try_get("last_error")?,
        parent_job_id: row
            .try_get::<Option<i64>, _>("parent_job_id")?
            .map(JobId),
        created_at: parse_dt(row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pool;
    use curarr_domain::{ChainContext, JobPayload, LibraryId, MovieId};

    fn enrich_spec(movie_id: i64) -> JobSpec {
        JobSpec::new(JobPayload::EnrichMetadata {
            movie_id: MovieId(movie_id),
            manual: false,
            force_refresh: false,
            require_complete: false,
            chain: ChainContext::new("test"),
        })
    }

    fn scan_spec(priority: JobPriority) -> JobSpec {
        JobSpec::new(JobPayload::LibraryScan {
            library_id: LibraryId(1),
        })
        .with_priority(priority)
    }

    #[tokio::test]
    async fn claim_order_is_priority_then_id() {
        let pool = test_pool().await;
        let store = SqliteJobStore::new(pool);

        let low = store.insert(scan_spec(JobPriority::LOW)).await.unwrap();
        let first_normal = store.insert(enrich_spec(1)).await.unwrap();
        let second_normal = store.insert(enrich_spec(2)).await.unwrap();
        let high = store.insert(scan_spec(JobPriority::HIGH)).await.unwrap();

        let claimed = store.claim("worker-1", 10).await.unwrap();
        let ids: Vec<JobId> = claimed.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![high.id, first_normal.id, second_normal.id, low.id]);
        assert!(claimed.iter().all(|j| j.state == JobState::Claimed));
        assert!(claimed
            .iter()
            .all(|j| j.claimed_by.as_deref() == Some("worker-1")));
    }

    #[tokio::test]
    async fn delayed_jobs_are_not_claimable() {
        let pool = test_pool().await;
        let store = SqliteJobStore::new(pool);

        store
            .insert(enrich_spec(1).delayed_until(Utc::now() + Duration::hours(1)))
            .await
            .unwrap();

        let claimed = store.claim("worker-1", 10).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn a_job_is_claimed_at_most_once() {
        let pool = test_pool().await;
        let store = SqliteJobStore::new(pool);
        store.insert(enrich_spec(1)).await.unwrap();

        let first = store.claim("worker-1", 10).await.unwrap();
        let second = store.claim("worker-2", 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn lifecycle_claim_process_complete() {
        let pool = test_pool().await;
        let store = SqliteJobStore::new(pool);
        let job = store.insert(enrich_spec(1)).await.unwrap();

        let claimed = store.claim("worker-1", 1).await.unwrap();
        assert_eq!(claimed[0].id, job.id);

        // Another worker cannot stamp the processing transition.
        assert!(store.mark_processing(job.id, "worker-2").await.is_err());
        store.mark_processing(job.id, "worker-1").await.unwrap();
        store.complete(job.id).await.unwrap();

        let done = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert!(done.completed_at.is_some());

        // Terminal states stay terminal.
        assert!(store.complete(job.id).await.is_err());
    }

    #[tokio::test]
    async fn transient_failures_retry_with_backoff_then_fail() {
        let pool = test_pool().await;
        let store = SqliteJobStore::new(pool);
        let job = store
            .insert(enrich_spec(1).with_max_retries(2))
            .await
            .unwrap();

        store.claim("worker-1", 1).await.unwrap();
        store.mark_processing(job.id, "worker-1").await.unwrap();
        let after_first = store.fail(job.id, "timeout", true, None).await.unwrap();
        assert_eq!(after_first.state, JobState::Retrying);
        assert_eq!(after_first.retry_count, 1);
        assert!(after_first.scheduled_at > Utc::now());
        assert!(after_first.claimed_by.is_none());

        // Force the retry window open and exhaust remaining attempts.
        sqlx::query("UPDATE jobs SET scheduled_at = ? WHERE id = ?")
            .bind((Utc::now() - Duration::seconds(1)).to_rfc3339())
            .bind(job.id.0)
            .execute(&store.pool)
            .await
            .unwrap();
        store.claim("worker-1", 1).await.unwrap();
        store.mark_processing(job.id, "worker-1").await.unwrap();
        let after_second = store.fail(job.id, "timeout", true, None).await.unwrap();
        assert_eq!(after_second.retry_count, 2);

        sqlx::query("UPDATE jobs SET scheduled_at = ? WHERE id = ?")
            .bind((Utc::now() - Duration::seconds(1)).to_rfc3339())
            .bind(job.id.0)
            .execute(&store.pool)
            .await
            .unwrap();
        store.claim("worker-1", 1).await.unwrap();
        store.mark_processing(job.id, "worker-1").await.unwrap();
        let terminal = store.fail(job.id, "timeout", true, None).await.unwrap();
        assert_eq!(terminal.state, JobState::Failed);
        assert_eq!(terminal.retry_count, 2);
    }

    #[tokio::test]
    async fn permanent_failure_skips_retry() {
        let pool = test_pool().await;
        let store = SqliteJobStore::new(pool);
        let job = store.insert(enrich_spec(1)).await.unwrap();
        store.claim("worker-1", 1).await.unwrap();
        store.mark_processing(job.id, "worker-1").await.unwrap();

        let failed = store.fail(job.id, "bad payload", false, None).await.unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("bad payload"));
    }

    #[tokio::test]
    async fn cancel_only_from_pending_or_retrying() {
        let pool = test_pool().await;
        let store = SqliteJobStore::new(pool);
        let job = store.insert(enrich_spec(1)).await.unwrap();
        store.cancel(job.id).await.unwrap();
        assert_eq!(
            store.get(job.id).await.unwrap().unwrap().state,
            JobState::Cancelled
        );

        let other = store.insert(enrich_spec(2)).await.unwrap();
        store.claim("worker-1", 1).await.unwrap();
        assert!(store.cancel(other.id).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_enrichment_is_suppressed() {
        let pool = test_pool().await;
        let store = SqliteJobStore::new(pool);

        let first = store.insert_unless_active(enrich_spec(1)).await.unwrap();
        assert!(first.is_some());
        let duplicate = store.insert_unless_active(enrich_spec(1)).await.unwrap();
        assert!(duplicate.is_none());
        // A different movie is not affected.
        let other = store.insert_unless_active(enrich_spec(2)).await.unwrap();
        assert!(other.is_some());
    }

    #[tokio::test]
    async fn cleanup_purges_old_terminal_rows() {
        let pool = test_pool().await;
        let store = SqliteJobStore::new(pool);
        let job = store.insert(enrich_spec(1)).await.unwrap();
        store.claim("worker-1", 1).await.unwrap();
        store.mark_processing(job.id, "worker-1").await.unwrap();
        store.complete(job.id).await.unwrap();

        // Nothing is younger than the cutoffs yet.
        let purged = store
            .cleanup(Utc::now() - Duration::days(30), Utc::now() - Duration::days(90))
            .await
            .unwrap();
        assert_eq!(purged, 0);

        let purged = store
            .cleanup(Utc::now() + Duration::seconds(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(purged, 1);
    }

    #[tokio::test]
    async fn stats_track_states() {
        let pool = test_pool().await;
        let store = SqliteJobStore::new(pool);
        store.insert(enrich_spec(1)).await.unwrap();
        store.insert(enrich_spec(2)).await.unwrap();
        let claimed = store.claim("worker-1", 1).await.unwrap();
        store
            .mark_processing(claimed[0].id, "worker-1")
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.processing, 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let first = retry_backoff(0);
        assert!(first >= Duration::milliseconds(1500) && first <= Duration::milliseconds(2500));
        let capped = retry_backoff(20);
        assert!(capped <= Duration::milliseconds(375_000));
        assert!(capped >= Duration::milliseconds(225_000));
    }
}
