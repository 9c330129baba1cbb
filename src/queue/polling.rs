use {
    super::{QueueBackend, QueueError, STALL_ERROR, StallReport, terminal_only},
    crate::domain::{
        error::JobError,
        job::{
            JobKind, JobOptions, JobRecord, JobResult, JobStatus, NewJob, QueueCounts, QueueName,
        },
    },
    crate::infra::postgres::job_repo,
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    std::time::Duration,
    uuid::Uuid,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Database-backed queue: the `jobs` table is scanned on a timer by the
/// worker pools. State survives restarts.
#[derive(Clone)]
pub struct PollingQueue {
    pool: PgPool,
}

impl PollingQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Claim up to `limit` due jobs in one statement.
    pub async fn claim_batch(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, QueueError> {
        let mut tx = self.pool.begin().await?;
        let jobs = job_repo::claim(&mut tx, queue, now, limit as i64).await?;
        tx.commit().await?;
        Ok(jobs)
    }

    /// Tell "not found" apart from "wrong state" after an UPDATE hit no row.
    async fn missed(&self, id: Uuid, to: JobStatus) -> QueueError {
        match job_repo::get(&self.pool, id).await {
            Ok(Some(job)) => QueueError::InvalidTransition {
                id,
                from: job.status,
                to,
            },
            Ok(None) => QueueError::NotFound(id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl QueueBackend for PollingQueue {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn enqueue(
        &self,
        queue: QueueName,
        kind: JobKind,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<JobRecord, QueueError> {
        let new = NewJob::build(queue, kind, payload, &options, Utc::now())
            .map_err(|e| QueueError::InvalidJob(e.to_string()))?;
        job_repo::enqueue(&self.pool, &new).await
    }

    async fn dequeue_next(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, QueueError> {
        Ok(self.claim_batch(queue, now, 1).await?.into_iter().next())
    }

    async fn mark_active(&self, id: Uuid) -> Result<(), QueueError> {
        self.heartbeat(id).await
    }

    async fn heartbeat(&self, id: Uuid) -> Result<(), QueueError> {
        if job_repo::touch(&self.pool, id, None).await? {
            Ok(())
        } else {
            Err(self.missed(id, JobStatus::Active).await)
        }
    }

    async fn report_progress(&self, id: Uuid, percent: i32) -> Result<(), QueueError> {
        if job_repo::touch(&self.pool, id, Some(percent.clamp(0, 100))).await? {
            Ok(())
        } else {
            Err(self.missed(id, JobStatus::Active).await)
        }
    }

    async fn mark_completed(&self, id: Uuid, result: &JobResult) -> Result<(), QueueError> {
        let value = serde_json::to_value(result)?;
        if job_repo::complete(&self.pool, id, &value).await? {
            Ok(())
        } else {
            Err(self.missed(id, JobStatus::Completed).await)
        }
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &JobError,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), QueueError> {
        if job_repo::fail(&self.pool, id, &error.to_string(), retry_at).await? {
            Ok(())
        } else {
            Err(self.missed(id, JobStatus::Failed).await)
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, QueueError> {
        job_repo::get(&self.pool, id).await
    }

    async fn list_by_status(
        &self,
        queue: QueueName,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<JobRecord>, QueueError> {
        job_repo::list_by_status(&self.pool, queue, status, limit as i64).await
    }

    async fn count_by_status(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<QueueCounts, QueueError> {
        job_repo::counts(&self.pool, queue, now).await
    }

    async fn clean(
        &self,
        queue: QueueName,
        older_than: Duration,
        statuses: &[JobStatus],
        limit: usize,
    ) -> Result<u64, QueueError> {
        let statuses = terminal_only(statuses);
        if statuses.is_empty() || limit == 0 {
            return Ok(0);
        }
        let older_than = chrono::Duration::from_std(older_than)
            .map_err(|_| QueueError::InvalidJob(format!("retention out of range: {older_than:?}")))?;
        job_repo::clean(&self.pool, queue, Utc::now() - older_than, &statuses, limit as i64).await
    }

    async fn pause(&self, queue: QueueName) -> Result<(), QueueError> {
        job_repo::pause(&self.pool, queue).await
    }

    async fn resume(&self, queue: QueueName) -> Result<(), QueueError> {
        job_repo::resume(&self.pool, queue).await
    }

    async fn is_paused(&self, queue: QueueName) -> Result<bool, QueueError> {
        job_repo::is_paused(&self.pool, queue).await
    }

    async fn recover_stalled(
        &self,
        now: DateTime<Utc>,
        stall_interval: Duration,
        max_stalled_count: i32,
    ) -> Result<StallReport, QueueError> {
        let rows = job_repo::reap_stale(
            &self.pool,
            now,
            stall_interval.as_secs_f64(),
            max_stalled_count,
            STALL_ERROR,
        )
        .await?;

        let mut report = StallReport::default();
        for (id, status) in rows {
            if status == JobStatus::Failed.as_str() {
                report.failed.push(id);
            } else {
                report.requeued.push(id);
            }
        }
        Ok(report)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        job_repo::ping(&self.pool).await
    }
}
