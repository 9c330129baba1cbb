use {
    super::{JobContext, Processor},
    crate::domain::{
        error::JobError,
        job::{JobKind, JobRecord, JobResult, QueueName},
    },
    async_trait::async_trait,
    std::collections::HashMap,
    thiserror::Error,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{kind} belongs to queue {expected}, not {queue}")]
    QueueMismatch {
        kind: JobKind,
        queue: QueueName,
        expected: QueueName,
    },

    #[error("a processor for {0} is already registered")]
    Duplicate(JobKind),
}

/// Object-safe form of a [`Processor`]: takes the raw JSON payload.
#[async_trait]
trait ErasedProcessor: Send + Sync {
    async fn dispatch(
        &self,
        payload: &serde_json::Value,
        ctx: &JobContext,
    ) -> Result<JobResult, JobError>;
}

struct Wrapped<P>(P);

#[async_trait]
impl<P: Processor> ErasedProcessor for Wrapped<P> {
    async fn dispatch(
        &self,
        payload: &serde_json::Value,
        ctx: &JobContext,
    ) -> Result<JobResult, JobError> {
        let typed: P::Payload = serde_json::from_value(payload.clone()).map_err(|e| {
            JobError::validation(format!("invalid {} payload: {e}", ctx.kind))
        })?;
        self.0.process(typed, ctx).await
    }
}

type BoxedProcessor = Box<dyn ErasedProcessor>;

/// Checked table from job kind to processor. Mismatched or duplicate
/// registrations are rejected here, not at dispatch time.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<JobKind, BoxedProcessor>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: Processor>(
        &mut self,
        queue: QueueName,
        kind: JobKind,
        processor: P,
    ) -> Result<(), RegistryError> {
        let expected = kind.queue();
        if expected != queue {
            return Err(RegistryError::QueueMismatch {
                kind,
                queue,
                expected,
            });
        }
        if self.processors.contains_key(&kind) {
            return Err(RegistryError::Duplicate(kind));
        }
        self.processors.insert(kind, Box::new(Wrapped(processor)));
        Ok(())
    }

    pub fn contains(&self, kind: JobKind) -> bool {
        self.processors.contains_key(&kind)
    }

    /// Queues with at least one registered processor, in declaration order.
    pub fn queues(&self) -> Vec<QueueName> {
        QueueName::ALL
            .into_iter()
            .filter(|q| self.processors.keys().any(|k| k.queue() == *q))
            .collect()
    }

    #[tracing::instrument(skip_all, fields(job_id = %job.id, queue = %job.queue, job_name = %job.kind))]
    pub async fn dispatch(&self, job: &JobRecord, ctx: &JobContext) -> Result<JobResult, JobError> {
        let processor = self.processors.get(&job.kind).ok_or_else(|| {
            JobError::validation(format!("no processor registered for {}", job.kind))
        })?;
        processor.dispatch(&job.payload, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::domain::{
            error::ErrorKind,
            job::{JobOptions, NewJob},
        },
        crate::queue::broker::BrokerQueue,
        chrono::Utc,
        serde::Deserialize,
        std::sync::Arc,
    };

    #[derive(Deserialize)]
    struct Echo {
        text: String,
    }

    struct EchoProcessor;

    #[async_trait]
    impl Processor for EchoProcessor {
        type Payload = Echo;

        async fn process(&self, payload: Echo, _ctx: &JobContext) -> Result<JobResult, JobError> {
            Ok(JobResult::ok(payload.text, serde_json::Value::Null))
        }
    }

    fn job(kind: JobKind, payload: serde_json::Value) -> JobRecord {
        let new = NewJob::build(kind.queue(), kind, payload, &JobOptions::new(), Utc::now()).unwrap();
        JobRecord::from_new(new, 1)
    }

    fn ctx(job: &JobRecord) -> JobContext {
        JobContext::new(job, Arc::new(BrokerQueue::new()))
    }

    #[test]
    fn rejects_kind_under_wrong_queue() {
        let mut registry = ProcessorRegistry::new();
        let err = registry
            .register(QueueName::Webhook, JobKind::SendEmail, EchoProcessor)
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::QueueMismatch {
                kind: JobKind::SendEmail,
                queue: QueueName::Webhook,
                expected: QueueName::Email,
            }
        );
    }

    #[test]
    fn rejects_duplicate_kind() {
        let mut registry = ProcessorRegistry::new();
        registry
            .register(QueueName::Email, JobKind::SendEmail, EchoProcessor)
            .unwrap();
        let err = registry
            .register(QueueName::Email, JobKind::SendEmail, EchoProcessor)
            .unwrap_err();
        assert_eq!(err, RegistryError::Duplicate(JobKind::SendEmail));
    }

    #[tokio::test]
    async fn dispatches_decoded_payload() {
        let mut registry = ProcessorRegistry::new();
        registry
            .register(QueueName::Email, JobKind::SendEmail, EchoProcessor)
            .unwrap();
        assert_eq!(registry.queues(), vec![QueueName::Email]);

        let job = job(JobKind::SendEmail, serde_json::json!({"text": "hi"}));
        let result = registry.dispatch(&job, &ctx(&job)).await.unwrap();
        assert_eq!(result.message, "hi");
    }

    #[tokio::test]
    async fn undecodable_payload_is_validation() {
        let mut registry = ProcessorRegistry::new();
        registry
            .register(QueueName::Email, JobKind::SendEmail, EchoProcessor)
            .unwrap();

        let job = job(JobKind::SendEmail, serde_json::json!({"nope": 1}));
        let err = registry.dispatch(&job, &ctx(&job)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(!err.retryable());
    }

    #[tokio::test]
    async fn unregistered_kind_fails_without_retry() {
        let registry = ProcessorRegistry::new();
        let job = job(JobKind::ProcessOrder, serde_json::json!({}));
        let err = registry.dispatch(&job, &ctx(&job)).await.unwrap_err();
        assert!(!err.retryable());
    }
}
