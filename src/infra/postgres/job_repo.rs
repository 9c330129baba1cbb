use {
    crate::domain::job::{JobKind, JobRecord, JobStatus, NewJob, QueueCounts, QueueName},
    crate::queue::QueueError,
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

const JOB_COLUMNS: &str = "id, seq, queue_name, name, payload, status, attempts, max_attempts, \
     priority, progress, result, error_message, stalled_count, scheduled_at, heartbeat_at, \
     created_at, updated_at, processed_at";

#[derive(Debug, sqlx::FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub seq: i64,
    pub queue_name: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub priority: i32,
    pub progress: i32,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub stalled_count: i32,
    pub scheduled_at: DateTime<Utc>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| QueueError::Corrupt { id: row.id, reason };
        let queue = QueueName::try_from(row.queue_name.as_str()).map_err(|e| corrupt(e.to_string()))?;
        let kind = JobKind::try_from(row.name.as_str()).map_err(|e| corrupt(e.to_string()))?;
        let status = JobStatus::try_from(row.status.as_str()).map_err(|e| corrupt(e.to_string()))?;

        Ok(JobRecord {
            id: row.id,
            queue,
            kind,
            payload: row.payload,
            status,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            priority: row.priority,
            progress: row.progress,
            result: row.result,
            error_message: row.error_message,
            stalled_count: row.stalled_count,
            seq: row.seq,
            scheduled_at: row.scheduled_at,
            heartbeat_at: row.heartbeat_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            processed_at: row.processed_at,
        })
    }
}

fn into_records(rows: Vec<JobRow>) -> Result<Vec<JobRecord>, QueueError> {
    rows.into_iter().map(JobRecord::try_from).collect()
}

/// Insert a job. `seq` comes from the table's sequence.
pub async fn enqueue(pool: &sqlx::PgPool, job: &NewJob) -> Result<JobRecord, QueueError> {
    let row: JobRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO jobs (id, queue_name, name, payload, priority, max_attempts, scheduled_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(job.id)
    .bind(job.queue.as_str())
    .bind(job.kind.as_str())
    .bind(&job.payload)
    .bind(job.priority)
    .bind(job.max_attempts)
    .bind(job.scheduled_at)
    .bind(job.created_at)
    .fetch_one(pool)
    .await?;

    row.try_into()
}

/// Claim up to `limit` due jobs of one queue, highest priority first.
/// Uses SKIP LOCKED so concurrent workers never claim the same row.
pub async fn claim(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    queue: QueueName,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<JobRecord>, QueueError> {
    let rows: Vec<JobRow> = sqlx::query_as(&format!(
        r#"
        UPDATE jobs
        SET status = 'active', attempts = attempts + 1, progress = 0,
            heartbeat_at = $2, updated_at = $2
        WHERE id IN (
            SELECT id FROM jobs
            WHERE queue_name = $1 AND status = 'pending' AND scheduled_at <= $2
              AND NOT EXISTS (SELECT 1 FROM paused_queues p WHERE p.queue_name = $1)
            ORDER BY priority DESC, seq
            LIMIT $3
            FOR UPDATE SKIP LOCKED
        )
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(queue.as_str())
    .bind(now)
    .bind(limit)
    .fetch_all(&mut **tx)
    .await?;

    // RETURNING does not preserve the subquery order.
    let mut jobs = into_records(rows)?;
    jobs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
    Ok(jobs)
}

pub async fn get(pool: &sqlx::PgPool, id: Uuid) -> Result<Option<JobRecord>, QueueError> {
    let row = sqlx::query_as!(
        JobRow,
        r#"
        SELECT id, seq, queue_name, name, payload, status, attempts, max_attempts, priority,
               progress, result, error_message, stalled_count, scheduled_at, heartbeat_at,
               created_at, updated_at, processed_at
        FROM jobs WHERE id = $1
        "#,
        id,
    )
    .fetch_optional(pool)
    .await?;
    row.map(JobRecord::try_from).transpose()
}

/// Refresh the lease (and optionally progress) of an active job.
/// Returns `false` if the job is not active.
pub async fn touch(
    pool: &sqlx::PgPool,
    id: Uuid,
    progress: Option<i32>,
) -> Result<bool, QueueError> {
    let result = sqlx::query!(
        r#"
        UPDATE jobs
        SET heartbeat_at = now(), updated_at = now(), progress = COALESCE($2, progress)
        WHERE id = $1 AND status = 'active'
        "#,
        id,
        progress,
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Mark an active job as completed. Returns `false` if it was not active.
pub async fn complete(
    pool: &sqlx::PgPool,
    id: Uuid,
    result: &serde_json::Value,
) -> Result<bool, QueueError> {
    let done = sqlx::query!(
        r#"
        UPDATE jobs
        SET status = 'completed', progress = 100, result = $2, heartbeat_at = NULL,
            processed_at = now(), updated_at = now()
        WHERE id = $1 AND status = 'active'
        "#,
        id,
        result,
    )
    .execute(pool)
    .await?;
    Ok(done.rows_affected() == 1)
}

/// Record a failure. With `retry_at` and budget left the job goes back to
/// pending at `retry_at`; otherwise it is failed permanently.
pub async fn fail(
    pool: &sqlx::PgPool,
    id: Uuid,
    error: &str,
    retry_at: Option<DateTime<Utc>>,
) -> Result<bool, QueueError> {
    let result = sqlx::query!(
        r#"
        UPDATE jobs
        SET error_message = $2,
            status = CASE
                WHEN $3::timestamptz IS NOT NULL AND attempts < max_attempts THEN 'pending'
                ELSE 'failed'
            END,
            scheduled_at = CASE
                WHEN $3::timestamptz IS NOT NULL AND attempts < max_attempts THEN $3::timestamptz
                ELSE scheduled_at
            END,
            processed_at = CASE
                WHEN $3::timestamptz IS NOT NULL AND attempts < max_attempts THEN NULL
                ELSE now()
            END,
            heartbeat_at = NULL,
            updated_at = now()
        WHERE id = $1 AND status = 'active'
        "#,
        id,
        error,
        retry_at,
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn list_by_status(
    pool: &sqlx::PgPool,
    queue: QueueName,
    status: JobStatus,
    limit: i64,
) -> Result<Vec<JobRecord>, QueueError> {
    let rows = sqlx::query_as!(
        JobRow,
        r#"
        SELECT id, seq, queue_name, name, payload, status, attempts, max_attempts, priority,
               progress, result, error_message, stalled_count, scheduled_at, heartbeat_at,
               created_at, updated_at, processed_at
        FROM jobs
        WHERE queue_name = $1 AND status = $2
        ORDER BY seq
        LIMIT $3
        "#,
        queue.as_str(),
        status.as_str(),
        limit,
    )
    .fetch_all(pool)
    .await?;
    into_records(rows)
}

pub async fn counts(
    pool: &sqlx::PgPool,
    queue: QueueName,
    now: DateTime<Utc>,
) -> Result<QueueCounts, QueueError> {
    let row = sqlx::query!(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE status = 'pending' AND scheduled_at <= $2) AS "waiting!",
            COUNT(*) FILTER (WHERE status = 'pending' AND scheduled_at > $2) AS "delayed!",
            COUNT(*) FILTER (WHERE status = 'active') AS "active!",
            COUNT(*) FILTER (WHERE status = 'completed') AS "completed!",
            COUNT(*) FILTER (WHERE status = 'failed') AS "failed!",
            EXISTS (SELECT 1 FROM paused_queues WHERE queue_name = $1) AS "paused!"
        FROM jobs
        WHERE queue_name = $1
        "#,
        queue.as_str(),
        now,
    )
    .fetch_one(pool)
    .await?;

    let count = |n: i64| u64::try_from(n).unwrap_or(0);
    let mut counts = QueueCounts::new(
        count(row.waiting),
        count(row.active),
        count(row.completed),
        count(row.failed),
        count(row.delayed),
    );
    counts.paused = row.paused;
    Ok(counts)
}

/// Delete at most `limit` terminal jobs finished before `cutoff`.
pub async fn clean(
    pool: &sqlx::PgPool,
    queue: QueueName,
    cutoff: DateTime<Utc>,
    statuses: &[JobStatus],
    limit: i64,
) -> Result<u64, QueueError> {
    let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
    let result = sqlx::query!(
        r#"
        DELETE FROM jobs
        WHERE id IN (
            SELECT id FROM jobs
            WHERE queue_name = $1 AND status = ANY($2)
              AND COALESCE(processed_at, updated_at) <= $3
            ORDER BY COALESCE(processed_at, updated_at)
            LIMIT $4
        )
        "#,
        queue.as_str(),
        &statuses[..],
        cutoff,
        limit,
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn pause(pool: &sqlx::PgPool, queue: QueueName) -> Result<(), QueueError> {
    sqlx::query!(
        "INSERT INTO paused_queues (queue_name) VALUES ($1) ON CONFLICT DO NOTHING",
        queue.as_str(),
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn resume(pool: &sqlx::PgPool, queue: QueueName) -> Result<(), QueueError> {
    sqlx::query!("DELETE FROM paused_queues WHERE queue_name = $1", queue.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn is_paused(pool: &sqlx::PgPool, queue: QueueName) -> Result<bool, QueueError> {
    let paused = sqlx::query_scalar!(
        r#"SELECT EXISTS (SELECT 1 FROM paused_queues WHERE queue_name = $1) AS "paused!""#,
        queue.as_str(),
    )
    .fetch_one(pool)
    .await?;
    Ok(paused)
}

/// Reset jobs whose lease is older than `stall_secs` back to 'pending', or
/// fail them once `stalled_count` exceeds `max_stalled`.
/// Returns `(id, new_status)` for every touched row.
pub async fn reap_stale(
    pool: &sqlx::PgPool,
    now: DateTime<Utc>,
    stall_secs: f64,
    max_stalled: i32,
    stall_error: &str,
) -> Result<Vec<(Uuid, String)>, QueueError> {
    let rows = sqlx::query!(
        r#"
        WITH stale AS (
            SELECT id FROM jobs
            WHERE status = 'active'
              AND COALESCE(heartbeat_at, updated_at)
                  < $1::timestamptz - make_interval(secs => $2::double precision)
            FOR UPDATE SKIP LOCKED
        )
        UPDATE jobs j
        SET stalled_count = j.stalled_count + 1,
            status = CASE WHEN j.stalled_count + 1 > $3::int THEN 'failed' ELSE 'pending' END,
            attempts = CASE WHEN j.stalled_count + 1 > $3::int THEN j.attempts ELSE GREATEST(j.attempts - 1, 0) END,
            error_message = CASE WHEN j.stalled_count + 1 > $3::int THEN $4::text ELSE j.error_message END,
            scheduled_at = CASE WHEN j.stalled_count + 1 > $3::int THEN j.scheduled_at ELSE $1::timestamptz END,
            processed_at = CASE WHEN j.stalled_count + 1 > $3::int THEN $1::timestamptz ELSE NULL END,
            heartbeat_at = NULL,
            updated_at = $1::timestamptz
        FROM stale
        WHERE j.id = stale.id
        RETURNING j.id AS "id!", j.status AS "status!"
        "#,
        now,
        stall_secs,
        max_stalled,
        stall_error,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| (r.id, r.status)).collect())
}

pub async fn ping(pool: &sqlx::PgPool) -> Result<(), QueueError> {
    sqlx::query!("SELECT 1 AS one").fetch_one(pool).await?;
    Ok(())
}
