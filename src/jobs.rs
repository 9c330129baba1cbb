//! Job processors and the registry that routes jobs to them.

pub mod cleanup;
pub mod email;
pub mod notification;
pub mod order;
pub mod product_sync;
pub mod registry;
pub mod webhook;

use {
    crate::domain::{
        error::JobError,
        job::{JobKind, JobRecord, JobResult, QueueName},
        provider::ShopifyApi,
    },
    crate::queue::QueueBackend,
    crate::services::{reconcile::Reconciler, supervisor::QueueSupervisor},
    crate::store::CommerceStore,
    async_trait::async_trait,
    serde::de::DeserializeOwned,
    std::sync::Arc,
    uuid::Uuid,
};

pub use registry::{ProcessorRegistry, RegistryError};

/// Handler for one job kind. The payload is decoded before `process` is
/// called; a body that does not decode never reaches the processor.
///
/// Processors do not retry on their own. They return a [`JobError`] with the
/// right kind and the worker pool decides.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    type Payload: DeserializeOwned + Send;

    async fn process(&self, payload: Self::Payload, ctx: &JobContext)
    -> Result<JobResult, JobError>;
}

/// Per-execution view handed to a processor.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub queue: QueueName,
    pub kind: JobKind,
    /// 1-based, includes the current attempt.
    pub attempt: i32,
    pub max_attempts: i32,
    backend: Arc<dyn QueueBackend>,
}

impl JobContext {
    pub fn new(job: &JobRecord, backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            job_id: job.id,
            queue: job.queue,
            kind: job.kind,
            attempt: job.attempts,
            max_attempts: job.max_attempts,
            backend,
        }
    }

    /// Best effort: a failed progress write is logged, never raised.
    pub async fn progress(&self, percent: i32) {
        if let Err(e) = self.backend.report_progress(self.job_id, percent).await {
            tracing::warn!(job_id = %self.job_id, percent, error = %e, "progress update failed");
        }
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Everything the built-in processors need, wired once at startup.
#[derive(Clone)]
pub struct ProcessorDeps {
    pub backend: Arc<dyn QueueBackend>,
    pub store: Arc<dyn CommerceStore>,
    pub shopify: Arc<dyn ShopifyApi>,
    pub mailer: Arc<dyn email::Mailer>,
}

/// Registry with every built-in processor under its queue.
pub fn default_registry(deps: ProcessorDeps) -> Result<ProcessorRegistry, RegistryError> {
    let mut registry = ProcessorRegistry::new();
    let supervisor = QueueSupervisor::new(deps.backend.clone());

    registry.register(
        QueueName::Email,
        JobKind::SendEmail,
        email::SendEmail::new(deps.mailer.clone()),
    )?;
    registry.register(
        QueueName::Webhook,
        JobKind::ProcessWebhook,
        webhook::ProcessWebhook::new(
            Reconciler::new(deps.store.clone()),
            deps.backend.clone(),
        ),
    )?;
    registry.register(
        QueueName::ProductSync,
        JobKind::SyncProduct,
        product_sync::SyncProduct::new(deps.store.clone(), deps.shopify.clone()),
    )?;
    registry.register(
        QueueName::OrderProcessing,
        JobKind::ProcessOrder,
        order::ProcessOrder::new(deps.store.clone()),
    )?;
    registry.register(
        QueueName::Notifications,
        JobKind::SendNotification,
        notification::SendNotification::new(deps.mailer.clone()),
    )?;
    registry.register(
        QueueName::Background,
        JobKind::CleanupJobs,
        cleanup::CleanupJobs::new(supervisor),
    )?;

    Ok(registry)
}
