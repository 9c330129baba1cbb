use {
    super::{CommerceStore, StoreError},
    crate::domain::{
        commerce::{Customer, Order, OrderItem, Product},
        webhook::{NewWebhookRecord, WebhookRecord},
    },
    async_trait::async_trait,
    chrono::Utc,
    parking_lot::Mutex,
    std::collections::HashMap,
    uuid::Uuid,
};

#[derive(Default)]
struct Tables {
    customers: HashMap<Uuid, Customer>,
    products: HashMap<Uuid, Product>,
    orders: HashMap<Uuid, Order>,
    order_items: HashMap<Uuid, OrderItem>,
    webhooks: HashMap<Uuid, WebhookRecord>,
}

/// In-process store with the same uniqueness rules as the Postgres schema.
/// Backs the memory backend and the integration tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn customer_count(&self) -> usize {
        self.tables.lock().customers.len()
    }

    pub fn product_count(&self) -> usize {
        self.tables.lock().products.len()
    }

    pub fn order_count(&self) -> usize {
        self.tables.lock().orders.len()
    }

    pub fn webhooks(&self) -> Vec<WebhookRecord> {
        let mut all: Vec<_> = self.tables.lock().webhooks.values().cloned().collect();
        all.sort_by_key(|w| w.created_at);
        all
    }
}

fn email_taken(tables: &Tables, email: &str, except: Uuid) -> bool {
    tables
        .customers
        .values()
        .any(|c| c.id != except && c.email == email)
}

#[async_trait]
impl CommerceStore for MemoryStore {
    async fn find_customer_by_remote_id(
        &self,
        remote_id: &str,
    ) -> Result<Option<Customer>, StoreError> {
        let tables = self.tables.lock();
        Ok(tables
            .customers
            .values()
            .find(|c| c.shopify_customer_id.as_deref() == Some(remote_id))
            .cloned())
    }

    async fn find_customer_by_email(&self, email: &str) -> Result<Option<Customer>, StoreError> {
        let tables = self.tables.lock();
        Ok(tables.customers.values().find(|c| c.email == email).cloned())
    }

    async fn insert_customer(&self, customer: &Customer) -> Result<Customer, StoreError> {
        let mut tables = self.tables.lock();
        let existing = customer.shopify_customer_id.as_deref().and_then(|rid| {
            tables
                .customers
                .values()
                .find(|c| c.shopify_customer_id.as_deref() == Some(rid))
                .map(|c| c.id)
        });
        let id = existing.unwrap_or(customer.id);
        if email_taken(&tables, &customer.email, id) {
            return Err(StoreError::Conflict(format!(
                "customer email {} already exists",
                customer.email
            )));
        }

        let stored = match tables.customers.get_mut(&id) {
            Some(row) => {
                row.apply(customer.fields());
                row.clone()
            }
            None => {
                tables.customers.insert(id, customer.clone());
                customer.clone()
            }
        };
        Ok(stored)
    }

    async fn update_customer(&self, customer: &Customer) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        if email_taken(&tables, &customer.email, customer.id) {
            return Err(StoreError::Conflict(format!(
                "customer email {} already exists",
                customer.email
            )));
        }
        match tables.customers.get_mut(&customer.id) {
            Some(row) => {
                *row = customer.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("customer", customer.id)),
        }
    }

    async fn delete_customer(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        let removed = tables.customers.remove(&id).is_some();
        if removed {
            // ON DELETE SET NULL
            for order in tables.orders.values_mut() {
                if order.customer_id == Some(id) {
                    order.customer_id = None;
                }
            }
        }
        Ok(removed)
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        Ok(self.tables.lock().products.get(&id).cloned())
    }

    async fn find_product_by_remote_id(
        &self,
        remote_id: &str,
    ) -> Result<Option<Product>, StoreError> {
        let tables = self.tables.lock();
        Ok(tables
            .products
            .values()
            .find(|p| p.shopify_product_id.as_deref() == Some(remote_id))
            .cloned())
    }

    async fn find_unlinked_product(
        &self,
        handle: Option<&str>,
        sku: Option<&str>,
    ) -> Result<Option<Product>, StoreError> {
        let tables = self.tables.lock();
        let mut unlinked: Vec<&Product> = tables
            .products
            .values()
            .filter(|p| p.shopify_product_id.is_none())
            .collect();
        unlinked.sort_by_key(|p| p.created_at);

        let by_handle = handle.and_then(|h| unlinked.iter().find(|p| p.handle.as_deref() == Some(h)));
        let found = by_handle
            .or_else(|| sku.and_then(|s| unlinked.iter().find(|p| p.sku.as_deref() == Some(s))));
        Ok(found.map(|p| (*p).clone()))
    }

    async fn insert_product(&self, product: &Product) -> Result<Product, StoreError> {
        let mut tables = self.tables.lock();
        let existing = product.shopify_product_id.as_deref().and_then(|rid| {
            tables
                .products
                .values_mut()
                .find(|p| p.shopify_product_id.as_deref() == Some(rid))
        });
        let stored = match existing {
            Some(row) => {
                row.apply(product.fields());
                row.clone()
            }
            None => {
                tables.products.insert(product.id, product.clone());
                product.clone()
            }
        };
        Ok(stored)
    }

    async fn update_product(&self, product: &Product) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        if let Some(rid) = product.shopify_product_id.as_deref() {
            let clash = tables
                .products
                .values()
                .any(|p| p.id != product.id && p.shopify_product_id.as_deref() == Some(rid));
            if clash {
                return Err(StoreError::Conflict(format!(
                    "shopify product {rid} is linked to another row"
                )));
            }
        }
        match tables.products.get_mut(&product.id) {
            Some(row) => {
                *row = product.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("product", product.id)),
        }
    }

    async fn delete_product(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        let removed = tables.products.remove(&id).is_some();
        if removed {
            for item in tables.order_items.values_mut() {
                if item.product_id == Some(id) {
                    item.product_id = None;
                }
            }
        }
        Ok(removed)
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.tables.lock().orders.get(&id).cloned())
    }

    async fn find_order_by_remote_id(
        &self,
        remote_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        let tables = self.tables.lock();
        Ok(tables
            .orders
            .values()
            .find(|o| o.shopify_order_id == remote_id)
            .cloned())
    }

    async fn insert_order(&self, order: &Order) -> Result<Order, StoreError> {
        let mut tables = self.tables.lock();
        let existing = tables
            .orders
            .values_mut()
            .find(|o| o.shopify_order_id == order.shopify_order_id);
        let stored = match existing {
            Some(row) => {
                row.apply(order.fields());
                if row.customer_id.is_none() {
                    row.customer_id = order.customer_id;
                }
                row.clone()
            }
            None => {
                tables.orders.insert(order.id, order.clone());
                order.clone()
            }
        };
        Ok(stored)
    }

    async fn update_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        match tables.orders.get_mut(&order.id) {
            Some(row) => {
                *row = order.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("order", order.id)),
        }
    }

    async fn upsert_order_item(&self, item: &OrderItem) -> Result<OrderItem, StoreError> {
        let mut tables = self.tables.lock();
        if !tables.orders.contains_key(&item.order_id) {
            return Err(StoreError::not_found("order", item.order_id));
        }
        let existing = tables.order_items.values_mut().find(|i| {
            i.order_id == item.order_id && i.shopify_line_item_id == item.shopify_line_item_id
        });
        let stored = match existing {
            Some(row) => {
                let id = row.id;
                *row = OrderItem { id, ..item.clone() };
                row.clone()
            }
            None => {
                tables.order_items.insert(item.id, item.clone());
                item.clone()
            }
        };
        Ok(stored)
    }

    async fn list_order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
        let tables = self.tables.lock();
        let mut items: Vec<_> = tables
            .order_items
            .values()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.id);
        Ok(items)
    }

    async fn delete_order_items_except(
        &self,
        order_id: Uuid,
        keep: &[String],
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock();
        let before = tables.order_items.len();
        tables
            .order_items
            .retain(|_, i| i.order_id != order_id || keep.contains(&i.shopify_line_item_id));
        Ok((before - tables.order_items.len()) as u64)
    }

    async fn insert_webhook(
        &self,
        record: &NewWebhookRecord,
    ) -> Result<WebhookRecord, StoreError> {
        let stored = WebhookRecord::from(record.clone());
        self.tables.lock().webhooks.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_webhook(&self, id: Uuid) -> Result<Option<WebhookRecord>, StoreError> {
        Ok(self.tables.lock().webhooks.get(&id).cloned())
    }

    async fn mark_webhook_processed(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let record = tables
            .webhooks
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("webhook", id))?;
        record.processed = true;
        record.processed_at = Some(Utc::now());
        record.error_message = None;
        Ok(())
    }

    async fn mark_webhook_failed(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let record = tables
            .webhooks
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("webhook", id))?;
        record.processed = false;
        record.error_message = Some(error.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::domain::{
            commerce::{CustomerFields, OrderFields},
            money::MoneyAmount,
        },
    };

    fn customer_fields(email: &str) -> CustomerFields {
        CustomerFields {
            email: email.to_string(),
            first_name: Some("Ada".into()),
            last_name: None,
            phone: None,
            accepts_marketing: false,
        }
    }

    fn order_fields() -> OrderFields {
        OrderFields {
            order_number: "1001".into(),
            email: None,
            total_price: MoneyAmount::new(5000).unwrap(),
            currency: "USD".into(),
            financial_status: None,
            fulfillment_status: None,
            cancelled: false,
        }
    }

    #[tokio::test]
    async fn insert_customer_converges_on_remote_id() {
        let store = MemoryStore::new();
        let first = Customer::new(Some("7".into()), customer_fields("a@example.com"));
        let second = Customer::new(Some("7".into()), customer_fields("a@example.com"));

        let a = store.insert_customer(&first).await.unwrap();
        let b = store.insert_customer(&second).await.unwrap();

        assert_eq!(a.id, b.id);
        assert_eq!(store.customer_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let store = MemoryStore::new();
        store
            .insert_customer(&Customer::new(None, customer_fields("a@example.com")))
            .await
            .unwrap();
        let err = store
            .insert_customer(&Customer::new(Some("9".into()), customer_fields("a@example.com")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn insert_order_keeps_local_columns() {
        let store = MemoryStore::new();
        let mut order = Order::new("123".into(), order_fields());
        order.notes = Some("vip".into());
        let stored = store.insert_order(&order).await.unwrap();

        let again = Order::new("123".into(), order_fields());
        let merged = store.insert_order(&again).await.unwrap();

        assert_eq!(merged.id, stored.id);
        assert_eq!(merged.notes.as_deref(), Some("vip"));
        assert_eq!(store.order_count(), 1);
    }

    #[tokio::test]
    async fn order_item_upsert_is_keyed_by_line_item() {
        let store = MemoryStore::new();
        let order = store
            .insert_order(&Order::new("123".into(), order_fields()))
            .await
            .unwrap();
        let item = OrderItem {
            id: Uuid::now_v7(),
            order_id: order.id,
            shopify_line_item_id: "1".into(),
            product_id: None,
            title: "Mug".into(),
            quantity: 1,
            price: MoneyAmount::new(2500).unwrap(),
            sku: None,
        };
        store.upsert_order_item(&item).await.unwrap();
        store
            .upsert_order_item(&OrderItem {
                id: Uuid::now_v7(),
                quantity: 2,
                ..item.clone()
            })
            .await
            .unwrap();

        let items = store.list_order_items(order.id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, item.id);
        assert_eq!(items[0].quantity, 2);
    }

    #[tokio::test]
    async fn webhook_failure_then_success() {
        let store = MemoryStore::new();
        let record = store
            .insert_webhook(&NewWebhookRecord::new("orders/create", "shop", None, "{}"))
            .await
            .unwrap();

        store.mark_webhook_failed(record.id, "boom").await.unwrap();
        let failed = store.find_webhook(record.id).await.unwrap().unwrap();
        assert!(!failed.processed);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));

        store.mark_webhook_processed(record.id).await.unwrap();
        let done = store.find_webhook(record.id).await.unwrap().unwrap();
        assert!(done.processed);
        assert!(done.processed_at.is_some());
        assert!(done.error_message.is_none());
    }
}
