use {
    super::{QueueBackend, QueueError, STALL_ERROR, StallReport, terminal_only},
    crate::domain::{
        error::JobError,
        job::{
            JobKind, JobOptions, JobRecord, JobResult, JobStatus, NewJob, QueueCounts, QueueName,
        },
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    parking_lot::Mutex,
    std::{
        cmp::Reverse,
        collections::{BTreeSet, HashMap, HashSet},
        sync::Arc,
        time::Duration,
    },
    tokio::sync::Notify,
    uuid::Uuid,
};

/// Ordering key of a pending job: priority descending, then creation order.
type ReadyKey = (Reverse<i32>, i64, Uuid);

#[derive(Default)]
struct BrokerState {
    jobs: HashMap<Uuid, JobRecord>,
    pending: HashMap<QueueName, BTreeSet<ReadyKey>>,
    paused: HashSet<QueueName>,
    next_seq: i64,
}

impl BrokerState {
    fn push_pending(&mut self, job: &JobRecord) {
        self.pending
            .entry(job.queue)
            .or_default()
            .insert((Reverse(job.priority), job.seq, job.id));
    }

    fn active_mut(&mut self, id: Uuid, to: JobStatus) -> Result<&mut JobRecord, QueueError> {
        let job = self.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if job.status != JobStatus::Active {
            return Err(QueueError::InvalidTransition {
                id,
                from: job.status,
                to,
            });
        }
        Ok(job)
    }
}

/// In-process broker: an ordered, priority- and delay-aware work queue with
/// lease heartbeats and stall detection. Dequeue is a blocking pop through
/// [`QueueBackend::wait_for_work`], woken on every enqueue.
pub struct BrokerQueue {
    state: Mutex<BrokerState>,
    wakers: HashMap<QueueName, Arc<Notify>>,
}

impl Default for BrokerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            wakers: QueueName::ALL
                .into_iter()
                .map(|q| (q, Arc::new(Notify::new())))
                .collect(),
        }
    }

    fn wake(&self, queue: QueueName) {
        if let Some(n) = self.wakers.get(&queue) {
            n.notify_one();
        }
    }
}

#[async_trait]
impl QueueBackend for BrokerQueue {
    fn name(&self) -> &'static str {
        "broker"
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

        let record = {
            let mut state = self.state.lock();
            state.next_seq += 1;
            let record = JobRecord::from_new(new, state.next_seq);
            state.push_pending(&record);
            state.jobs.insert(record.id, record.clone());
            record
        };

        self.wake(queue);
        Ok(record)
    }

    async fn dequeue_next(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, QueueError> {
        let mut state = self.state.lock();
        if state.paused.contains(&queue) {
            return Ok(None);
        }

        let BrokerState { jobs, pending, .. } = &mut *state;
        let Some(ready) = pending.get_mut(&queue) else {
            return Ok(None);
        };
        let key = ready
            .iter()
            .find(|(_, _, id)| jobs.get(id).is_some_and(|j| j.scheduled_at <= now))
            .copied();
        let Some(key) = key else {
            return Ok(None);
        };
        ready.remove(&key);

        let job = jobs.get_mut(&key.2).ok_or(QueueError::NotFound(key.2))?;
        job.status = JobStatus::Active;
        job.attempts += 1;
        job.progress = 0;
        job.heartbeat_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn mark_active(&self, id: Uuid) -> Result<(), QueueError> {
        self.heartbeat(id).await
    }

    async fn heartbeat(&self, id: Uuid) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        let job = state.active_mut(id, JobStatus::Active)?;
        let now = Utc::now();
        job.heartbeat_at = Some(now);
        job.updated_at = now;
        Ok(())
    }

    async fn report_progress(&self, id: Uuid, percent: i32) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        let job = state.active_mut(id, JobStatus::Active)?;
        let now = Utc::now();
        job.progress = percent.clamp(0, 100);
        job.heartbeat_at = Some(now);
        job.updated_at = now;
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, result: &JobResult) -> Result<(), QueueError> {
        let value = serde_json::to_value(result)?;
        let mut state = self.state.lock();
        let job = state.active_mut(id, JobStatus::Completed)?;
        let now = Utc::now();
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.result = Some(value);
        job.heartbeat_at = None;
        job.processed_at = Some(now);
        job.updated_at = now;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &JobError,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), QueueError> {
        let requeued = {
            let mut state = self.state.lock();
            let job = state.active_mut(id, JobStatus::Failed)?;
            let now = Utc::now();
            job.error_message = Some(error.to_string());
            job.heartbeat_at = None;
            job.updated_at = now;

            match retry_at.filter(|_| !job.attempts_exhausted()) {
                Some(at) => {
                    job.status = JobStatus::Pending;
                    job.scheduled_at = at;
                    let job = job.clone();
                    state.push_pending(&job);
                    Some(job.queue)
                }
                None => {
                    job.status = JobStatus::Failed;
                    job.processed_at = Some(now);
                    None
                }
            }
        };

        if let Some(queue) = requeued {
            self.wake(queue);
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, QueueError> {
        Ok(self.state.lock().jobs.get(&id).cloned())
    }

    async fn list_by_status(
        &self,
        queue: QueueName,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<JobRecord>, QueueError> {
        let state = self.state.lock();
        let mut jobs: Vec<JobRecord> = state
            .jobs
            .values()
            .filter(|j| j.queue == queue && j.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.seq);
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn count_by_status(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<QueueCounts, QueueError> {
        let state = self.state.lock();
        let (mut waiting, mut delayed, mut active, mut completed, mut failed) = (0, 0, 0, 0, 0);
        for job in state.jobs.values().filter(|j| j.queue == queue) {
            match job.status {
                JobStatus::Pending if job.scheduled_at > now => delayed += 1,
                JobStatus::Pending => waiting += 1,
                JobStatus::Active => active += 1,
                JobStatus::Completed => completed += 1,
                JobStatus::Failed => failed += 1,
            }
        }
        let mut counts = QueueCounts::new(waiting, active, completed, failed, delayed);
        counts.paused = state.paused.contains(&queue);
        Ok(counts)
    }

    async fn clean(
        &self,
        queue: QueueName,
        older_than: Duration,
        statuses: &[JobStatus],
        limit: usize,
    ) -> Result<u64, QueueError> {
        let statuses = terminal_only(statuses);
        let older_than = chrono::Duration::from_std(older_than)
            .map_err(|_| QueueError::InvalidJob(format!("retention out of range: {older_than:?}")))?;
        let cutoff = Utc::now() - older_than;

        let mut state = self.state.lock();
        let mut victims: Vec<(DateTime<Utc>, Uuid)> = state
            .jobs
            .values()
            .filter(|j| j.queue == queue && statuses.contains(&j.status))
            .map(|j| (j.processed_at.unwrap_or(j.updated_at), j.id))
            .filter(|(finished, _)| *finished <= cutoff)
            .collect();
        victims.sort();
        victims.truncate(limit);

        for (_, id) in &victims {
            state.jobs.remove(id);
        }
        Ok(victims.len() as u64)
    }

    async fn pause(&self, queue: QueueName) -> Result<(), QueueError> {
        self.state.lock().paused.insert(queue);
        Ok(())
    }

    async fn resume(&self, queue: QueueName) -> Result<(), QueueError> {
        self.state.lock().paused.remove(&queue);
        self.wake(queue);
        Ok(())
    }

    async fn is_paused(&self, queue: QueueName) -> Result<bool, QueueError> {
        Ok(self.state.lock().paused.contains(&queue))
    }

    async fn recover_stalled(
        &self,
        now: DateTime<Utc>,
        stall_interval: Duration,
        max_stalled_count: i32,
    ) -> Result<StallReport, QueueError> {
        let stall = chrono::Duration::from_std(stall_interval)
            .map_err(|_| QueueError::InvalidJob(format!("stall interval out of range: {stall_interval:?}")))?;
        let mut report = StallReport::default();

        let mut state = self.state.lock();
        let stalled: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Active)
            .filter(|j| now - j.heartbeat_at.unwrap_or(j.updated_at) > stall)
            .map(|j| j.id)
            .collect();

        for id in stalled {
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            job.stalled_count += 1;
            job.heartbeat_at = None;
            job.updated_at = now;
            if job.stalled_count > max_stalled_count {
                job.status = JobStatus::Failed;
                job.error_message = Some(STALL_ERROR.to_string());
                job.processed_at = Some(now);
                report.failed.push(id);
            } else {
                job.status = JobStatus::Pending;
                job.attempts = (job.attempts - 1).max(0);
                job.scheduled_at = now;
                let job = job.clone();
                state.push_pending(&job);
                report.requeued.push(id);
            }
        }
        drop(state);

        for id in &report.requeued {
            if let Some(queue) = self.state.lock().jobs.get(id).map(|j| j.queue) {
                self.wake(queue);
            }
        }
        Ok(report)
    }

    async fn wait_for_work(&self, queue: QueueName, max_wait: Duration) {
        match self.wakers.get(&queue) {
            Some(n) => {
                let _ = tokio::time::timeout(max_wait, n.notified()).await;
            }
            None => tokio::time::sleep(max_wait).await,
        }
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
