use {
    crate::domain::job::{JobStatus, QueueCounts, QueueName},
    crate::queue::{DEFAULT_CLEAN_LIMIT, QueueBackend, QueueError},
    chrono::Utc,
    serde::Serialize,
    std::{collections::BTreeMap, sync::Arc, time::Duration},
};

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub backend: &'static str,
    pub backend_reachable: bool,
    pub queues: BTreeMap<QueueName, QueueCounts>,
}

/// Operational view over every queue: statistics, health, pause/resume and
/// retention cleanup.
#[derive(Clone)]
pub struct QueueSupervisor {
    backend: Arc<dyn QueueBackend>,
    clean_limit: usize,
}

impl QueueSupervisor {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            backend,
            clean_limit: DEFAULT_CLEAN_LIMIT,
        }
    }

    pub fn with_clean_limit(mut self, limit: usize) -> Self {
        self.clean_limit = limit;
        self
    }

    pub async fn statistics(&self) -> Result<BTreeMap<QueueName, QueueCounts>, QueueError> {
        let now = Utc::now();
        let mut stats = BTreeMap::new();
        for queue in QueueName::ALL {
            stats.insert(queue, self.backend.count_by_status(queue, now).await?);
        }
        Ok(stats)
    }

    /// Never fails: an unreachable backend is reported, not raised.
    pub async fn health(&self) -> HealthReport {
        let backend_reachable = match self.backend.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(backend = self.backend.name(), error = %e, "queue backend unreachable");
                false
            }
        };
        let queues = if backend_reachable {
            self.statistics().await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "failed to collect queue statistics");
                BTreeMap::new()
            })
        } else {
            BTreeMap::new()
        };
        HealthReport {
            healthy: backend_reachable && queues.len() == QueueName::ALL.len(),
            backend: self.backend.name(),
            backend_reachable,
            queues,
        }
    }

    pub async fn pause(&self, queue: QueueName) -> Result<(), QueueError> {
        self.backend.pause(queue).await?;
        tracing::info!(queue = %queue, "queue paused");
        Ok(())
    }

    pub async fn resume(&self, queue: QueueName) -> Result<(), QueueError> {
        self.backend.resume(queue).await?;
        tracing::info!(queue = %queue, "queue resumed");
        Ok(())
    }

    /// Remove completed and failed jobs older than `older_than` from every
    /// queue, at most `clean_limit` per queue.
    pub async fn cleanup(&self, older_than: Duration) -> Result<BTreeMap<QueueName, u64>, QueueError> {
        let statuses = [JobStatus::Completed, JobStatus::Failed];
        let mut removed = BTreeMap::new();
        for queue in QueueName::ALL {
            let n = self
                .backend
                .clean(queue, older_than, &statuses, self.clean_limit)
                .await?;
            if n > 0 {
                tracing::info!(queue = %queue, removed = n, "cleaned old jobs");
            }
            removed.insert(queue, n);
        }
        Ok(removed)
    }
}
