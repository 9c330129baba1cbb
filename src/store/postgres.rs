use {
    super::{CommerceStore, StoreError},
    crate::domain::{
        commerce::{Customer, Order, OrderItem, Product},
        webhook::{NewWebhookRecord, WebhookRecord},
    },
    crate::infra::postgres::{customer_repo, order_repo, product_repo, webhook_repo},
    async_trait::async_trait,
    sqlx::PgPool,
    uuid::Uuid,
};

/// `CommerceStore` over the shared Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommerceStore for PgStore {
    async fn find_customer_by_remote_id(
        &self,
        remote_id: &str,
    ) -> Result<Option<Customer>, StoreError> {
        customer_repo::find_by_remote_id(&self.pool, remote_id).await
    }

    async fn find_customer_by_email(&self, email: &str) -> Result<Option<Customer>, StoreError> {
        customer_repo::find_by_email(&self.pool, email).await
    }

    async fn insert_customer(&self, customer: &Customer) -> Result<Customer, StoreError> {
        customer_repo::upsert(&self.pool, customer).await
    }

    async fn update_customer(&self, customer: &Customer) -> Result<(), StoreError> {
        customer_repo::update(&self.pool, customer).await
    }

    async fn delete_customer(&self, id: Uuid) -> Result<bool, StoreError> {
        customer_repo::delete(&self.pool, id).await
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        product_repo::find(&self.pool, id).await
    }

    async fn find_product_by_remote_id(
        &self,
        remote_id: &str,
    ) -> Result<Option<Product>, StoreError> {
        product_repo::find_by_remote_id(&self.pool, remote_id).await
    }

    async fn find_unlinked_product(
        &self,
        handle: Option<&str>,
        sku: Option<&str>,
    ) -> Result<Option<Product>, StoreError> {
        product_repo::find_unlinked(&self.pool, handle, sku).await
    }

    async fn insert_product(&self, product: &Product) -> Result<Product, StoreError> {
        product_repo::upsert(&self.pool, product).await
    }

    async fn update_product(&self, product: &Product) -> Result<(), StoreError> {
        product_repo::update(&self.pool, product).await
    }

    async fn delete_product(&self, id: Uuid) -> Result<bool, StoreError> {
        product_repo::delete(&self.pool, id).await
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        order_repo::find(&self.pool, id).await
    }

    async fn find_order_by_remote_id(
        &self,
        remote_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        order_repo::find_by_remote_id(&self.pool, remote_id).await
    }

    async fn insert_order(&self, order: &Order) -> Result<Order, StoreError> {
        order_repo::upsert(&self.pool, order).await
    }

    async fn update_order(&self, order: &Order) -> Result<(), StoreError> {
        order_repo::update(&self.pool, order).await
    }

    async fn upsert_order_item(&self, item: &OrderItem) -> Result<OrderItem, StoreError> {
        order_repo::upsert_item(&self.pool, item).await
    }

    async fn list_order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
        order_repo::list_items(&self.pool, order_id).await
    }

    async fn delete_order_items_except(
        &self,
        order_id: Uuid,
        keep: &[String],
    ) -> Result<u64, StoreError> {
        order_repo::delete_items_except(&self.pool, order_id, keep).await
    }

    async fn insert_webhook(
        &self,
        record: &NewWebhookRecord,
    ) -> Result<WebhookRecord, StoreError> {
        webhook_repo::insert(&self.pool, record).await
    }

    async fn find_webhook(&self, id: Uuid) -> Result<Option<WebhookRecord>, StoreError> {
        webhook_repo::find(&self.pool, id).await
    }

    async fn mark_webhook_processed(&self, id: Uuid) -> Result<(), StoreError> {
        webhook_repo::mark_processed(&self.pool, id).await
    }

    async fn mark_webhook_failed(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        webhook_repo::mark_failed(&self.pool, id, error).await
    }
}
