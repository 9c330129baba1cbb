//! Queue backend contract. [`redis_broker`] and [`polling`] are the two
//! production backends; [`broker`] keeps the same contract in process memory
//! for tests and single-process runs.
//!
//! Workers and processors only ever see `dyn QueueBackend`; the concrete
//! backend is chosen once at composition time (see [`crate::app`]).

pub mod broker;
pub mod polling;
pub mod redis_broker;

use {
    crate::domain::{
        error::JobError,
        job::{JobKind, JobOptions, JobRecord, JobResult, JobStatus, QueueCounts, QueueName},
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    serde::Serialize,
    std::time::Duration,
    thiserror::Error,
    uuid::Uuid,
};

pub const DEFAULT_STALL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_STALLED_COUNT: i32 = 1;
/// Upper bound of rows removed by one `clean` call.
pub const DEFAULT_CLEAN_LIMIT: usize = 1000;
pub const STALL_ERROR: &str = "job stalled more than allowable limit";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("corrupt job row {id}: {reason}")]
    Corrupt { id: Uuid, reason: String },
}

impl From<QueueError> for JobError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::InvalidJob(msg) => JobError::validation(msg),
            other => JobError::unknown(other.to_string()),
        }
    }
}

/// Outcome of one stall sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StallReport {
    /// Returned to pending; the stalled attempt is not counted.
    pub requeued: Vec<Uuid>,
    /// Exceeded the stall budget and failed with [`STALL_ERROR`].
    pub failed: Vec<Uuid>,
}

impl StallReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

/// Contract shared by the broker and polling backends. Both order due jobs
/// by priority descending, then creation order.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Short identifier for logs and health output.
    fn name(&self) -> &'static str;

    /// Never blocks on downstream processing.
    async fn enqueue(
        &self,
        queue: QueueName,
        kind: JobKind,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<JobRecord, QueueError>;

    /// Atomically reserve the next due job: it comes back `active` with
    /// `attempts` already incremented, so no other caller can receive it.
    /// Returns `None` when nothing is due or the queue is paused.
    async fn dequeue_next(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, QueueError>;

    /// Record the start of execution (first heartbeat).
    async fn mark_active(&self, id: Uuid) -> Result<(), QueueError>;

    /// Refresh the lease of an active job.
    async fn heartbeat(&self, id: Uuid) -> Result<(), QueueError>;

    /// Clamped to 0..=100. Also refreshes the lease.
    async fn report_progress(&self, id: Uuid, percent: i32) -> Result<(), QueueError>;

    async fn mark_completed(&self, id: Uuid, result: &JobResult) -> Result<(), QueueError>;

    /// Terminal failure when `retry_at` is `None` or the attempt budget is
    /// spent; otherwise back to pending, eligible again at `retry_at`.
    async fn mark_failed(
        &self,
        id: Uuid,
        error: &JobError,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), QueueError>;

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, QueueError>;

    async fn list_by_status(
        &self,
        queue: QueueName,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<JobRecord>, QueueError>;

    async fn count_by_status(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<QueueCounts, QueueError>;

    /// Delete terminal jobs finished more than `older_than` ago, oldest
    /// first, at most `limit` rows. Non-terminal statuses are ignored.
    async fn clean(
        &self,
        queue: QueueName,
        older_than: Duration,
        statuses: &[JobStatus],
        limit: usize,
    ) -> Result<u64, QueueError>;

    async fn pause(&self, queue: QueueName) -> Result<(), QueueError>;

    async fn resume(&self, queue: QueueName) -> Result<(), QueueError>;

    async fn is_paused(&self, queue: QueueName) -> Result<bool, QueueError>;

    /// Return jobs whose lease expired to pending, or fail them once
    /// `stalled_count` exceeds `max_stalled_count`.
    async fn recover_stalled(
        &self,
        now: DateTime<Utc>,
        stall_interval: Duration,
        max_stalled_count: i32,
    ) -> Result<StallReport, QueueError>;

    /// Suspend until work may be available or `max_wait` elapses.
    async fn wait_for_work(&self, _queue: QueueName, max_wait: Duration) {
        tokio::time::sleep(max_wait).await;
    }

    async fn ping(&self) -> Result<(), QueueError>;
}

/// Keep only terminal statuses; `clean` must never touch live jobs.
pub(crate) fn terminal_only(statuses: &[JobStatus]) -> Vec<JobStatus> {
    statuses
        .iter()
        .copied()
        .filter(JobStatus::is_terminal)
        .collect()
}
