//! Idempotent merge of Shopify webhook bodies into the local store.
//!
//! Every handler is a find-then-upsert keyed on the Shopify id, so a
//! redelivered webhook converges on the same rows as the first delivery.

mod customer;
mod order;
mod product;

use {
    crate::domain::{
        error::JobError,
        webhook::{WebhookEntity, WebhookTopic},
    },
    crate::store::CommerceStore,
    serde::{Serialize, de::DeserializeOwned},
    std::{fmt, sync::Arc},
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "id", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Created(Uuid),
    Updated(Uuid),
    /// Duplicate delivery, nothing changed.
    Unchanged(Uuid),
    Deleted(Uuid),
    Cancelled(Uuid),
    /// Delete for a row that does not exist locally.
    Ignored,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Updated(_) => "updated",
            Self::Unchanged(_) => "unchanged",
            Self::Deleted(_) => "deleted",
            Self::Cancelled(_) => "cancelled",
            Self::Ignored => "ignored",
        }
    }

    pub fn entity_id(&self) -> Option<Uuid> {
        match self {
            Self::Created(id)
            | Self::Updated(id)
            | Self::Unchanged(id)
            | Self::Deleted(id)
            | Self::Cancelled(id) => Some(*id),
            Self::Ignored => None,
        }
    }
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn CommerceStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn CommerceStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CommerceStore> {
        &self.store
    }

    #[tracing::instrument(skip_all, fields(topic = %topic))]
    pub async fn reconcile(
        &self,
        topic: &WebhookTopic,
        payload: &serde_json::Value,
    ) -> Result<ReconcileOutcome, JobError> {
        let store = self.store.as_ref();
        let outcome = match topic.entity {
            WebhookEntity::Order => order::reconcile(store, topic.action, decode(payload)?).await?,
            WebhookEntity::Product => {
                product::reconcile(store, topic.action, decode(payload)?).await?
            }
            WebhookEntity::Customer => {
                customer::reconcile(store, topic.action, decode(payload)?).await?
            }
        };
        tracing::info!(
            entity = topic.entity.as_str(),
            outcome = outcome.as_str(),
            entity_id = ?outcome.entity_id(),
            "reconciled"
        );
        Ok(outcome)
    }
}

fn decode<T: DeserializeOwned>(payload: &serde_json::Value) -> Result<T, JobError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| JobError::validation(format!("invalid webhook body: {e}")))
}
