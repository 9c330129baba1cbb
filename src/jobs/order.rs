use {
    super::{JobContext, Processor},
    crate::domain::{
        commerce::OrderStatus,
        error::JobError,
        job::JobResult,
        money::MoneyAmount,
    },
    crate::store::CommerceStore,
    async_trait::async_trait,
    serde::Deserialize,
    std::sync::Arc,
    uuid::Uuid,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOrderPayload {
    pub order_id: Uuid,
}

/// Post-ingestion order handling: validates the mirrored line items and
/// flags the order as processed.
pub struct ProcessOrder {
    store: Arc<dyn CommerceStore>,
}

impl ProcessOrder {
    pub fn new(store: Arc<dyn CommerceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Processor for ProcessOrder {
    type Payload = ProcessOrderPayload;

    async fn process(
        &self,
        payload: ProcessOrderPayload,
        ctx: &JobContext,
    ) -> Result<JobResult, JobError> {
        let mut order = self
            .store
            .find_order(payload.order_id)
            .await?
            .ok_or_else(|| JobError::not_found(format!("order {} not found", payload.order_id)))?;

        if order.processed {
            return Err(JobError::duplicate(format!("order {} already processed", order.id)));
        }
        if order.status == OrderStatus::Cancelled {
            return Err(JobError::duplicate(format!("order {} is cancelled", order.id)));
        }
        ctx.progress(25).await;

        // Zero-priced lines (gifts, full discounts) are valid.
        let items = self.store.list_order_items(order.id).await?;
        ctx.progress(50).await;

        let items_total = items
            .iter()
            .try_fold(MoneyAmount::ZERO, |acc, i| i.line_total().and_then(|t| acc.checked_add(t)))
            .ok_or_else(|| {
                JobError::validation(format!("order {} total overflows", order.id))
                    .with_context(serde_json::json!({ "orderId": order.id }))
            })?;
        ctx.progress(75).await;

        order.processed = true;
        order.updated_at = chrono::Utc::now();
        self.store.update_order(&order).await?;
        ctx.progress(100).await;

        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            items = items.len(),
            items_total = %items_total,
            "order processed"
        );

        Ok(JobResult::ok(
            format!("order {} processed", order.order_number),
            serde_json::json!({
                "orderId": order.id,
                "orderNumber": order.order_number,
                "itemCount": items.len(),
                "itemsTotal": items_total.to_string(),
                "totalPrice": order.total_price.to_string(),
            }),
        ))
    }
}
