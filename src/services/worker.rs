use {
    crate::domain::{
        error::{ErrorKind, JobError},
        job::{JobRecord, JobResult, QueueName},
        retry::{RetryDecision, RetryPolicy},
    },
    crate::jobs::{JobContext, ProcessorRegistry},
    crate::queue::{DEFAULT_MAX_STALLED_COUNT, DEFAULT_STALL_INTERVAL, QueueBackend},
    chrono::Utc,
    futures_util::FutureExt,
    std::{
        any::Any,
        panic::AssertUnwindSafe,
        sync::Arc,
        time::{Duration, Instant},
    },
    tokio::{
        sync::{Semaphore, watch},
        task::{JoinHandle, JoinSet},
    },
};

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Tuning for one queue's pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub queue: QueueName,
    pub concurrency: usize,
    /// Longest sleep between empty polls.
    pub poll_interval: Duration,
    /// Most jobs claimed per tick.
    pub batch_size: usize,
    pub heartbeat_interval: Duration,
    pub shutdown_timeout: Duration,
    pub retry: RetryPolicy,
}

impl PoolConfig {
    pub fn for_queue(queue: QueueName) -> Self {
        Self {
            queue,
            concurrency: queue.default_concurrency(),
            poll_interval: Duration::from_secs(1),
            batch_size: 10,
            heartbeat_interval: DEFAULT_STALL_INTERVAL / 2,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// A running pool. Dropping it does not stop the loop; call [`close`].
///
/// [`close`]: WorkerPool::close
pub struct WorkerPool {
    queue: QueueName,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl WorkerPool {
    pub fn spawn(
        config: PoolConfig,
        backend: Arc<dyn QueueBackend>,
        registry: Arc<ProcessorRegistry>,
    ) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let queue = config.queue;
        let handle = tokio::spawn(run_pool(config, backend, registry, rx));
        Self {
            queue,
            shutdown,
            handle,
        }
    }

    pub fn queue(&self) -> QueueName {
        self.queue
    }

    /// Stop dequeuing, wait for in-flight jobs up to the shutdown timeout,
    /// then abort whatever is left.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(queue = %self.queue, error = %e, "worker pool task failed");
        }
    }
}

async fn run_pool(
    config: PoolConfig,
    backend: Arc<dyn QueueBackend>,
    registry: Arc<ProcessorRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    let queue = config.queue;
    tracing::info!(queue = %queue, concurrency = config.concurrency, backend = backend.name(), "worker pool started");

    let slots = Arc::new(Semaphore::new(config.concurrency));
    let config = Arc::new(config);
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }
        while in_flight.try_join_next().is_some() {}

        let claimed = fill_slots(&config, &backend, &registry, &slots, &mut in_flight).await;
        if claimed > 0 {
            continue;
        }

        let saturated = slots.available_permits() == 0;
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            Some(_) = in_flight.join_next(), if saturated => {}
            _ = backend.wait_for_work(queue, config.poll_interval), if !saturated => {}
            else => {}
        }
    }

    tracing::info!(queue = %queue, in_flight = in_flight.len(), "worker pool draining");
    let drained = tokio::time::timeout(config.shutdown_timeout, async {
        while in_flight.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            queue = %queue,
            aborted = in_flight.len(),
            "shutdown timeout reached, aborting in-flight jobs"
        );
        in_flight.abort_all();
        while in_flight.join_next().await.is_some() {}
    }
    tracing::info!(queue = %queue, "worker pool stopped");
}

/// Claim due jobs while slots are free, at most one batch per tick.
async fn fill_slots(
    config: &Arc<PoolConfig>,
    backend: &Arc<dyn QueueBackend>,
    registry: &Arc<ProcessorRegistry>,
    slots: &Arc<Semaphore>,
    in_flight: &mut JoinSet<()>,
) -> usize {
    let mut claimed = 0;
    while claimed < config.batch_size {
        let Ok(permit) = slots.clone().try_acquire_owned() else {
            break;
        };
        let job = match backend.dequeue_next(config.queue, Utc::now()).await {
            Ok(Some(job)) => job,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(queue = %config.queue, error = %e, "dequeue failed");
                break;
            }
        };
        claimed += 1;

        let (config, backend, registry) = (config.clone(), backend.clone(), registry.clone());
        in_flight.spawn(async move {
            let _permit = permit;
            run_job(job, &config, backend, &registry).await;
        });
    }
    claimed
}

async fn run_job(
    job: JobRecord,
    config: &PoolConfig,
    backend: Arc<dyn QueueBackend>,
    registry: &ProcessorRegistry,
) {
    let started = Instant::now();
    if let Err(e) = backend.mark_active(job.id).await {
        tracing::warn!(job_id = %job.id, error = %e, "mark_active failed");
    }

    let heartbeat = tokio::spawn(heartbeat_loop(
        backend.clone(),
        job.id,
        config.heartbeat_interval,
    ));
    let ctx = JobContext::new(&job, backend.clone());
    let outcome = AssertUnwindSafe(registry.dispatch(&job, &ctx))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(panic_error(panic)));
    heartbeat.abort();

    let success = finish(&job, config, backend.as_ref(), outcome).await;
    tracing::info!(
        queue = %job.queue,
        job_id = %job.id,
        job_name = %job.kind,
        attempt = job.attempts,
        duration_ms = started.elapsed().as_millis() as u64,
        success,
        "job finished"
    );
}

/// Record the outcome. Returns whether the job succeeded.
async fn finish(
    job: &JobRecord,
    config: &PoolConfig,
    backend: &dyn QueueBackend,
    outcome: Result<JobResult, JobError>,
) -> bool {
    let (recorded, success) = match outcome {
        Ok(result) => (backend.mark_completed(job.id, &result).await, true),
        // Idempotency short-circuit: the work was already done.
        Err(e) if e.kind == ErrorKind::Duplicate => {
            tracing::info!(job_id = %job.id, reason = %e.message, "duplicate, completing");
            let result = JobResult {
                success: true,
                message: format!("skipped: {}", e.message),
                processed_at: Utc::now(),
                data: serde_json::json!({ "duplicate": true }),
            };
            (backend.mark_completed(job.id, &result).await, true)
        }
        Err(e) => match config.retry.decide(job.attempts, job.max_attempts, &e) {
            RetryDecision::Retry { delay } => {
                let retry_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::hours(1));
                tracing::warn!(
                    job_id = %job.id,
                    attempt = job.attempts,
                    max_attempts = job.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "job failed, scheduling retry"
                );
                (backend.mark_failed(job.id, &e, Some(retry_at)).await, false)
            }
            RetryDecision::Fail { reason } => {
                tracing::error!(
                    job_id = %job.id,
                    attempt = job.attempts,
                    reason = ?reason,
                    code = e.code(),
                    error = %e,
                    "job failed permanently"
                );
                (backend.mark_failed(job.id, &e, None).await, false)
            }
        },
    };
    if let Err(e) = recorded {
        tracing::error!(job_id = %job.id, error = %e, "failed to record job outcome");
    }
    success
}

async fn heartbeat_loop(backend: Arc<dyn QueueBackend>, job_id: uuid::Uuid, every: Duration) {
    let mut tick = tokio::time::interval(every.max(Duration::from_millis(10)));
    tick.tick().await;
    loop {
        tick.tick().await;
        if let Err(e) = backend.heartbeat(job_id).await {
            tracing::debug!(job_id = %job_id, error = %e, "heartbeat stopped");
            return;
        }
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> JobError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    // Rerunning code that panics does not help.
    JobError::validation(format!("processor panicked: {message}"))
        .with_context(serde_json::json!({ "panic": true }))
}

/// Periodic stall sweep. Runs until `shutdown` flips.
pub async fn run_stall_monitor(
    backend: Arc<dyn QueueBackend>,
    every: Duration,
    stall_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(backend = backend.name(), every_ms = every.as_millis() as u64, "stall monitor started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("stall monitor shutting down");
                return;
            }
            _ = tokio::time::sleep(every) => {}
        }

        match backend
            .recover_stalled(Utc::now(), stall_interval, DEFAULT_MAX_STALLED_COUNT)
            .await
        {
            Ok(report) if report.is_empty() => {}
            Ok(report) => tracing::warn!(
                requeued = report.requeued.len(),
                failed = report.failed.len(),
                "recovered stalled jobs"
            ),
            Err(e) => tracing::error!(error = %e, "stall sweep error"),
        }
    }
}
