//! Local mirror of Shopify entities plus the webhook audit log.

pub mod memory;
pub mod postgres;

use {
    crate::domain::{
        commerce::{Customer, Order, OrderItem, Product},
        error::JobError,
        webhook::{NewWebhookRecord, WebhookRecord},
    },
    async_trait::async_trait,
    thiserror::Error,
    uuid::Uuid,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt {entity} row {id}: {reason}")]
    Corrupt {
        entity: &'static str,
        id: Uuid,
        reason: String,
    },
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::Database(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) => {
                JobError::network(err.to_string())
            }
            StoreError::NotFound { .. } => JobError::not_found(err.to_string()),
            _ => JobError::unknown(err.to_string()),
        }
    }
}

/// Persistence used by reconciliation and the processors.
///
/// `insert_*` are upserts keyed on the Shopify id: when a concurrent
/// delivery already created the row, the remote columns are overwritten and
/// the stored row is returned, so both deliveries converge on one record.
#[async_trait]
pub trait CommerceStore: Send + Sync {
    async fn find_customer_by_remote_id(
        &self,
        remote_id: &str,
    ) -> Result<Option<Customer>, StoreError>;
    async fn find_customer_by_email(&self, email: &str) -> Result<Option<Customer>, StoreError>;
    async fn insert_customer(&self, customer: &Customer) -> Result<Customer, StoreError>;
    async fn update_customer(&self, customer: &Customer) -> Result<(), StoreError>;
    async fn delete_customer(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, StoreError>;
    async fn find_product_by_remote_id(
        &self,
        remote_id: &str,
    ) -> Result<Option<Product>, StoreError>;
    /// Local row with no Shopify id yet, matched by handle before sku. Lets the
    /// echo of a product this service pushed adopt the row it came from.
    async fn find_unlinked_product(
        &self,
        handle: Option<&str>,
        sku: Option<&str>,
    ) -> Result<Option<Product>, StoreError>;
    async fn insert_product(&self, product: &Product) -> Result<Product, StoreError>;
    async fn update_product(&self, product: &Product) -> Result<(), StoreError>;
    async fn delete_product(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, StoreError>;
    async fn find_order_by_remote_id(&self, remote_id: &str)
    -> Result<Option<Order>, StoreError>;
    async fn insert_order(&self, order: &Order) -> Result<Order, StoreError>;
    async fn update_order(&self, order: &Order) -> Result<(), StoreError>;

    /// Keyed on `(order_id, shopify_line_item_id)`.
    async fn upsert_order_item(&self, item: &OrderItem) -> Result<OrderItem, StoreError>;
    async fn list_order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError>;
    /// Removes the order's items whose Shopify line item id is not in `keep`.
    async fn delete_order_items_except(
        &self,
        order_id: Uuid,
        keep: &[String],
    ) -> Result<u64, StoreError>;

    async fn insert_webhook(&self, record: &NewWebhookRecord)
    -> Result<WebhookRecord, StoreError>;
    async fn find_webhook(&self, id: Uuid) -> Result<Option<WebhookRecord>, StoreError>;
    async fn mark_webhook_processed(&self, id: Uuid) -> Result<(), StoreError>;
    async fn mark_webhook_failed(&self, id: Uuid, error: &str) -> Result<(), StoreError>;
}
