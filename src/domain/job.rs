use {
    super::error::PipelineError,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::{fmt, time::Duration},
    uuid::Uuid,
};

/// Independently scheduled channel of jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    Webhook,
    OrderProcessing,
    Email,
    Notifications,
    ProductSync,
    Background,
}

impl QueueName {
    pub const ALL: [QueueName; 6] = [
        Self::Webhook,
        Self::OrderProcessing,
        Self::Email,
        Self::Notifications,
        Self::ProductSync,
        Self::Background,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::OrderProcessing => "order-processing",
            Self::Email => "email",
            Self::Notifications => "notifications",
            Self::ProductSync => "product-sync",
            Self::Background => "background",
        }
    }

    /// Higher is serviced first.
    pub fn default_priority(&self) -> i32 {
        match self {
            Self::Webhook => 10,
            Self::OrderProcessing => 8,
            Self::Email | Self::Notifications => 5,
            Self::ProductSync => 2,
            Self::Background => 1,
        }
    }

    pub fn default_max_attempts(&self) -> i32 {
        match self {
            Self::Webhook => 5,
            Self::ProductSync => 2,
            Self::Background => 1,
            Self::OrderProcessing | Self::Email | Self::Notifications => 3,
        }
    }

    pub fn default_concurrency(&self) -> usize {
        match self {
            Self::Email => 5,
            Self::Webhook | Self::OrderProcessing => 3,
            Self::Notifications | Self::ProductSync => 2,
            Self::Background => 1,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for QueueName {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| PipelineError::Validation(format!("unknown queue: {s}")))
    }
}

/// Job kind within a queue. Each kind belongs to exactly one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    SendEmail,
    ProcessWebhook,
    SyncProduct,
    ProcessOrder,
    SendNotification,
    CleanupJobs,
}

impl JobKind {
    pub const ALL: [JobKind; 6] = [
        Self::SendEmail,
        Self::ProcessWebhook,
        Self::SyncProduct,
        Self::ProcessOrder,
        Self::SendNotification,
        Self::CleanupJobs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendEmail => "send-email",
            Self::ProcessWebhook => "process-webhook",
            Self::SyncProduct => "sync-product",
            Self::ProcessOrder => "process-order",
            Self::SendNotification => "send-notification",
            Self::CleanupJobs => "cleanup-jobs",
        }
    }

    pub fn queue(&self) -> QueueName {
        match self {
            Self::SendEmail => QueueName::Email,
            Self::ProcessWebhook => QueueName::Webhook,
            Self::SyncProduct => QueueName::ProductSync,
            Self::ProcessOrder => QueueName::OrderProcessing,
            Self::SendNotification => QueueName::Notifications,
            Self::CleanupJobs => QueueName::Background,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for JobKind {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| PipelineError::Validation(format!("unknown job kind: {s}")))
    }
}

/// Persisted status. See [`JobState`] for the finer observable states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// `Active -> Pending` is the retry edge (failure with budget left) and
    /// the stall-recovery edge. Everything else only moves forward.
    pub fn can_transition_to(&self, next: &JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Failed)
                | (Self::Active, Self::Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for JobStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(PipelineError::Validation(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Stalled,
    Completed,
    Failed,
}

/// Per-job overrides for the queue defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOptions {
    pub priority: Option<i32>,
    pub delay: Option<Duration>,
    pub max_attempts: Option<i32>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// For INSERT: id generated in Rust via Uuid::now_v7().
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Uuid,
    pub queue: QueueName,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub max_attempts: i32,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl NewJob {
    pub fn build(
        queue: QueueName,
        kind: JobKind,
        payload: serde_json::Value,
        options: &JobOptions,
        now: DateTime<Utc>,
    ) -> Result<Self, PipelineError> {
        if kind.queue() != queue {
            return Err(PipelineError::Validation(format!(
                "job kind {kind} belongs to queue {}, not {queue}",
                kind.queue()
            )));
        }
        let max_attempts = options
            .max_attempts
            .unwrap_or_else(|| queue.default_max_attempts());
        if max_attempts < 1 {
            return Err(PipelineError::Validation(format!(
                "max_attempts must be at least 1, got: {max_attempts}"
            )));
        }
        let delay = options.delay.unwrap_or_default();
        let scheduled_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .ok_or_else(|| PipelineError::Validation(format!("delay out of range: {delay:?}")))?;

        Ok(Self {
            id: Uuid::now_v7(),
            queue,
            kind,
            payload,
            priority: options.priority.unwrap_or_else(|| queue.default_priority()),
            max_attempts,
            scheduled_at,
            created_at: now,
        })
    }
}

/// A unit of work as stored by a queue backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub queue: QueueName,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub priority: i32,
    pub progress: i32,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub stalled_count: i32,
    /// Creation order, FIFO tie-break among equal priorities.
    pub seq: i64,
    pub scheduled_at: DateTime<Utc>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn from_new(job: NewJob, seq: i64) -> Self {
        Self {
            id: job.id,
            queue: job.queue,
            kind: job.kind,
            payload: job.payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: job.max_attempts,
            priority: job.priority,
            progress: 0,
            result: None,
            error_message: None,
            stalled_count: 0,
            seq,
            scheduled_at: job.scheduled_at,
            heartbeat_at: None,
            created_at: job.created_at,
            updated_at: job.created_at,
            processed_at: None,
        }
    }

    pub fn state(&self, now: DateTime<Utc>, stall_interval: Duration) -> JobState {
        match self.status {
            JobStatus::Pending if self.scheduled_at > now => JobState::Delayed,
            JobStatus::Pending => JobState::Waiting,
            JobStatus::Active => {
                let lease = self.heartbeat_at.unwrap_or(self.updated_at);
                let stall = chrono::Duration::from_std(stall_interval)
                    .unwrap_or_else(|_| chrono::Duration::days(365));
                if now - lease > stall {
                    JobState::Stalled
                } else {
                    JobState::Active
                }
            }
            JobStatus::Completed => JobState::Completed,
            JobStatus::Failed => JobState::Failed,
        }
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.scheduled_at <= now
    }
}

/// Terminal success payload of a processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub success: bool,
    pub message: String,
    pub processed_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl JobResult {
    pub fn ok(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            processed_at: Utc::now(),
            data,
        }
    }
}

/// Snapshot of one queue for health and monitoring endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub total: u64,
    pub paused: bool,
}

impl QueueCounts {
    pub fn new(waiting: u64, active: u64, completed: u64, failed: u64, delayed: u64) -> Self {
        Self {
            waiting,
            active,
            completed,
            failed,
            delayed,
            total: waiting + active + completed + failed + delayed,
            paused: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_belong_to_their_queue() {
        assert_eq!(JobKind::ProcessWebhook.queue(), QueueName::Webhook);
        assert_eq!(JobKind::SendEmail.queue(), QueueName::Email);
        assert_eq!(JobKind::CleanupJobs.queue(), QueueName::Background);
    }

    #[test]
    fn build_rejects_kind_from_other_queue() {
        let err = NewJob::build(
            QueueName::Email,
            JobKind::ProcessWebhook,
            serde_json::json!({}),
            &JobOptions::new(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn build_applies_queue_defaults_and_delay() {
        let now = Utc::now();
        let job = NewJob::build(
            QueueName::Webhook,
            JobKind::ProcessWebhook,
            serde_json::json!({"a": 1}),
            &JobOptions::new().with_delay(Duration::from_millis(5000)),
            now,
        )
        .unwrap();
        assert_eq!(job.priority, 10);
        assert_eq!(job.max_attempts, 5);
        assert_eq!(job.scheduled_at, now + chrono::Duration::milliseconds(5000));
    }

    #[test]
    fn build_rejects_delay_past_calendar_range() {
        // Fits in a TimeDelta but not on top of `now`.
        let delay = Duration::from_millis(9_000_000_000_000_000);
        assert!(chrono::Duration::from_std(delay).is_ok());
        let err = NewJob::build(
            QueueName::Email,
            JobKind::SendEmail,
            serde_json::json!({}),
            &JobOptions::new().with_delay(delay),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(msg) if msg.contains("delay")));
    }

    #[test]
    fn build_rejects_zero_attempts() {
        let result = NewJob::build(
            QueueName::Email,
            JobKind::SendEmail,
            serde_json::json!({}),
            &JobOptions::new().with_max_attempts(0),
            Utc::now(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn names_roundtrip() {
        for q in QueueName::ALL {
            assert_eq!(QueueName::try_from(q.as_str()).unwrap(), q);
        }
        for k in JobKind::ALL {
            assert_eq!(JobKind::try_from(k.as_str()).unwrap(), k);
        }
    }

    #[test]
    fn stalled_state_follows_heartbeat() {
        let now = Utc::now();
        let job = NewJob::build(
            QueueName::Email,
            JobKind::SendEmail,
            serde_json::json!({}),
            &JobOptions::new(),
            now,
        )
        .unwrap();
        let mut record = JobRecord::from_new(job, 1);
        record.status = JobStatus::Active;
        record.heartbeat_at = Some(now - chrono::Duration::seconds(31));
        assert_eq!(record.state(now, Duration::from_secs(30)), JobState::Stalled);
        record.heartbeat_at = Some(now);
        assert_eq!(record.state(now, Duration::from_secs(30)), JobState::Active);
    }
}
