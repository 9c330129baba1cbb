use {
    super::{JobContext, Processor, email::is_valid_email},
    crate::domain::{
        commerce::OrderStatus,
        error::JobError,
        job::{JobKind, JobOptions, JobResult, QueueName},
        webhook::{WebhookAction, WebhookEntity, WebhookTopic},
    },
    crate::queue::QueueBackend,
    crate::services::reconcile::{ReconcileOutcome, Reconciler},
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    std::sync::Arc,
    uuid::Uuid,
};

pub const SHOPIFY_SOURCE: &str = "shopify";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookJobPayload {
    pub source: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    /// Local audit row written at ingestion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop_domain: Option<String>,
}

/// Runs reconciliation for one verified delivery and keeps the audit row in
/// step with the outcome.
pub struct ProcessWebhook {
    reconciler: Reconciler,
    backend: Arc<dyn QueueBackend>,
}

impl ProcessWebhook {
    pub fn new(reconciler: Reconciler, backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            reconciler,
            backend,
        }
    }

    async fn handle(
        &self,
        payload: &WebhookJobPayload,
        ctx: &JobContext,
    ) -> Result<(WebhookTopic, ReconcileOutcome), JobError> {
        if payload.source != SHOPIFY_SOURCE {
            return Err(JobError::validation(format!(
                "unsupported webhook source: {}",
                payload.source
            )));
        }
        let topic = WebhookTopic::parse(&payload.event_type)?;
        ctx.progress(25).await;

        let outcome = self.reconciler.reconcile(&topic, &payload.payload).await?;
        ctx.progress(50).await;
        Ok((topic, outcome))
    }

    /// Follow-up work for an order that is stored but not yet processed.
    /// Keyed on order state so a redelivery that finds the order already
    /// mirrored still schedules it.
    /// Failures are logged: the order itself is already stored.
    async fn enqueue_order_followups(&self, order_id: Uuid) {
        let order = match self.reconciler.store().find_order(order_id).await {
            Ok(Some(order)) if !order.processed && order.status != OrderStatus::Cancelled => order,
            Ok(_) => return,
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "order lookup for follow-ups failed");
                return;
            }
        };

        if let Err(e) = self
            .backend
            .enqueue(
                QueueName::OrderProcessing,
                JobKind::ProcessOrder,
                serde_json::json!({ "orderId": order.id }),
                JobOptions::new(),
            )
            .await
        {
            tracing::error!(order_id = %order.id, error = %e, "failed to enqueue process-order");
        }

        let (channel, recipient) = match order.email.as_deref() {
            Some(email) if is_valid_email(email) => ("email", email.to_string()),
            _ => ("log", "operations".to_string()),
        };
        let notification = serde_json::json!({
            "channel": channel,
            "recipient": recipient,
            "message": format!("Order #{} received", order.order_number),
            "data": {
                "subject": format!("Order #{} received", order.order_number),
                "orderId": order.id,
                "orderNumber": order.order_number,
            },
        });
        if let Err(e) = self
            .backend
            .enqueue(
                QueueName::Notifications,
                JobKind::SendNotification,
                notification,
                JobOptions::new(),
            )
            .await
        {
            tracing::error!(order_id = %order.id, error = %e, "failed to enqueue send-notification");
        }
    }
}

#[async_trait]
impl Processor for ProcessWebhook {
    type Payload = WebhookJobPayload;

    async fn process(
        &self,
        payload: WebhookJobPayload,
        ctx: &JobContext,
    ) -> Result<JobResult, JobError> {
        let store = self.reconciler.store();

        let (topic, outcome) = match self.handle(&payload, ctx).await {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(
                    event_type = %payload.event_type,
                    webhook_id = ?payload.webhook_id,
                    error = %e,
                    "webhook processing failed"
                );
                if let Some(id) = payload.webhook_id {
                    if let Err(mark) = store.mark_webhook_failed(id, &e.to_string()).await {
                        tracing::error!(webhook_id = %id, error = %mark, "failed to record webhook failure");
                    }
                }
                return Err(e);
            }
        };

        if let (WebhookEntity::Order, WebhookAction::Create, Some(order_id)) =
            (topic.entity, topic.action, outcome.entity_id())
        {
            self.enqueue_order_followups(order_id).await;
        }
        ctx.progress(75).await;

        if let Some(id) = payload.webhook_id {
            store.mark_webhook_processed(id).await?;
        }
        ctx.progress(100).await;

        Ok(JobResult::ok(
            format!("{topic} {outcome}"),
            serde_json::json!({
                "topic": topic.as_str(),
                "outcome": outcome,
                "shopDomain": payload.shop_domain,
            }),
        ))
    }
}
