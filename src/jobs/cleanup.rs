use {
    super::{JobContext, Processor},
    crate::domain::{
        error::{JobError, PipelineError},
        job::JobResult,
    },
    crate::services::supervisor::{DEFAULT_RETENTION, QueueSupervisor},
    async_trait::async_trait,
    serde::Deserialize,
    std::time::Duration,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupPayload {
    #[serde(default)]
    pub older_than_ms: Option<u64>,
}

pub struct CleanupJobs {
    supervisor: QueueSupervisor,
}

impl CleanupJobs {
    pub fn new(supervisor: QueueSupervisor) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl Processor for CleanupJobs {
    type Payload = CleanupPayload;

    async fn process(&self, payload: CleanupPayload, ctx: &JobContext) -> Result<JobResult, JobError> {
        let older_than = payload
            .older_than_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RETENTION);
        let removed = self.supervisor.cleanup(older_than).await?;
        ctx.progress(100).await;

        let total: u64 = removed.values().sum();
        Ok(JobResult::ok(
            format!("removed {total} finished jobs"),
            serde_json::to_value(&removed).map_err(PipelineError::from)?,
        ))
    }
}
