use {
    crate::domain::{
        commerce::{Order, OrderItem, OrderStatus},
        money::MoneyAmount,
    },
    crate::store::StoreError,
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

const ORDER_COLUMNS: &str = "id, shopify_order_id, order_number, customer_id, email, \
     total_price_cents, currency, financial_status, fulfillment_status, status, cancelled_at, \
     processed, notes, created_at, updated_at";

const ITEM_COLUMNS: &str =
    "id, order_id, shopify_line_item_id, product_id, title, quantity, price_cents, sku";

#[derive(Debug, sqlx::FromRow)]
pub struct OrderRow {
    pub id: Uuid,
    pub shopify_order_id: String,
    pub order_number: String,
    pub customer_id: Option<Uuid>,
    pub email: Option<String>,
    pub total_price_cents: i64,
    pub currency: String,
    pub financial_status: Option<String>,
    pub fulfillment_status: Option<String>,
    pub status: String,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub processed: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            entity: "order",
            id: row.id,
            reason,
        };
        let total_price =
            MoneyAmount::new(row.total_price_cents).map_err(|e| corrupt(e.to_string()))?;
        let status = OrderStatus::try_from(row.status.as_str()).map_err(|e| corrupt(e.to_string()))?;
        Ok(Order {
            id: row.id,
            shopify_order_id: row.shopify_order_id,
            order_number: row.order_number,
            customer_id: row.customer_id,
            email: row.email,
            total_price,
            currency: row.currency,
            financial_status: row.financial_status,
            fulfillment_status: row.fulfillment_status,
            status,
            cancelled_at: row.cancelled_at,
            processed: row.processed,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct OrderItemRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub shopify_line_item_id: String,
    pub product_id: Option<Uuid>,
    pub title: String,
    pub quantity: i64,
    pub price_cents: i64,
    pub sku: Option<String>,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = StoreError;

    fn try_from(row: OrderItemRow) -> Result<Self, Self::Error> {
        let price = MoneyAmount::new(row.price_cents).map_err(|e| StoreError::Corrupt {
            entity: "order_item",
            id: row.id,
            reason: e.to_string(),
        })?;
        Ok(OrderItem {
            id: row.id,
            order_id: row.order_id,
            shopify_line_item_id: row.shopify_line_item_id,
            product_id: row.product_id,
            title: row.title,
            quantity: row.quantity,
            price,
            sku: row.sku,
        })
    }
}

pub async fn find(pool: &PgPool, id: Uuid) -> Result<Option<Order>, StoreError> {
    let row = sqlx::query_as!(
        OrderRow,
        r#"
        SELECT id, shopify_order_id, order_number, customer_id, email, total_price_cents,
               currency, financial_status, fulfillment_status, status, cancelled_at,
               processed, notes, created_at, updated_at
        FROM orders WHERE id = $1
        "#,
        id,
    )
    .fetch_optional(pool)
    .await?;
    row.map(Order::try_from).transpose()
}

pub async fn find_by_remote_id(
    pool: &PgPool,
    remote_id: &str,
) -> Result<Option<Order>, StoreError> {
    let row = sqlx::query_as!(
        OrderRow,
        r#"
        SELECT id, shopify_order_id, order_number, customer_id, email, total_price_cents,
               currency, financial_status, fulfillment_status, status, cancelled_at,
               processed, notes, created_at, updated_at
        FROM orders WHERE shopify_order_id = $1
        "#,
        remote_id,
    )
    .fetch_optional(pool)
    .await?;
    row.map(Order::try_from).transpose()
}

/// Insert, or merge remote columns into the row with the same Shopify id.
/// A cancelled row stays cancelled and an existing customer link is kept.
pub async fn upsert(pool: &PgPool, order: &Order) -> Result<Order, StoreError> {
    let row: OrderRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO orders
            (id, shopify_order_id, order_number, customer_id, email, total_price_cents,
             currency, financial_status, fulfillment_status, status, cancelled_at,
             processed, notes, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        ON CONFLICT (shopify_order_id) DO UPDATE SET
            order_number = EXCLUDED.order_number,
            customer_id = COALESCE(orders.customer_id, EXCLUDED.customer_id),
            email = EXCLUDED.email,
            total_price_cents = EXCLUDED.total_price_cents,
            currency = EXCLUDED.currency,
            financial_status = EXCLUDED.financial_status,
            fulfillment_status = EXCLUDED.fulfillment_status,
            status = CASE WHEN orders.status = 'cancelled' THEN orders.status ELSE EXCLUDED.status END,
            cancelled_at = COALESCE(orders.cancelled_at, EXCLUDED.cancelled_at),
            updated_at = now()
        RETURNING {ORDER_COLUMNS}
        "#
    ))
    .bind(order.id)
    .bind(&order.shopify_order_id)
    .bind(&order.order_number)
    .bind(order.customer_id)
    .bind(order.email.as_deref())
    .bind(order.total_price.cents())
    .bind(&order.currency)
    .bind(order.financial_status.as_deref())
    .bind(order.fulfillment_status.as_deref())
    .bind(order.status.as_str())
    .bind(order.cancelled_at)
    .bind(order.processed)
    .bind(order.notes.as_deref())
    .bind(order.created_at)
    .bind(order.updated_at)
    .fetch_one(pool)
    .await?;
    row.try_into()
}

pub async fn update(pool: &PgPool, order: &Order) -> Result<(), StoreError> {
    let result = sqlx::query!(
        r#"
        UPDATE orders
        SET order_number = $2, customer_id = $3, email = $4, total_price_cents = $5,
            currency = $6, financial_status = $7, fulfillment_status = $8, status = $9,
            cancelled_at = $10, processed = $11, notes = $12, updated_at = $13
        WHERE id = $1
        "#,
        order.id,
        &order.order_number,
        order.customer_id,
        order.email.as_deref(),
        order.total_price.cents(),
        &order.currency,
        order.financial_status.as_deref(),
        order.fulfillment_status.as_deref(),
        order.status.as_str(),
        order.cancelled_at,
        order.processed,
        order.notes.as_deref(),
        order.updated_at,
    )
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("order", order.id));
    }
    Ok(())
}

pub async fn upsert_item(pool: &PgPool, item: &OrderItem) -> Result<OrderItem, StoreError> {
    let row: OrderItemRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO order_items
            (id, order_id, shopify_line_item_id, product_id, title, quantity, price_cents, sku)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (order_id, shopify_line_item_id) DO UPDATE SET
            product_id = EXCLUDED.product_id,
            title = EXCLUDED.title,
            quantity = EXCLUDED.quantity,
            price_cents = EXCLUDED.price_cents,
            sku = EXCLUDED.sku
        RETURNING {ITEM_COLUMNS}
        "#
    ))
    .bind(item.id)
    .bind(item.order_id)
    .bind(&item.shopify_line_item_id)
    .bind(item.product_id)
    .bind(&item.title)
    .bind(item.quantity)
    .bind(item.price.cents())
    .bind(item.sku.as_deref())
    .fetch_one(pool)
    .await?;
    row.try_into()
}

pub async fn list_items(pool: &PgPool, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
    let rows = sqlx::query_as!(
        OrderItemRow,
        r#"
        SELECT id, order_id, shopify_line_item_id, product_id, title, quantity, price_cents, sku
        FROM order_items WHERE order_id = $1 ORDER BY id
        "#,
        order_id,
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(OrderItem::try_from).collect()
}

/// Drop the order's line items whose Shopify id is not in `keep`.
pub async fn delete_items_except(
    pool: &PgPool,
    order_id: Uuid,
    keep: &[String],
) -> Result<u64, StoreError> {
    let result = sqlx::query!(
        r#"
        DELETE FROM order_items
        WHERE order_id = $1 AND NOT (shopify_line_item_id = ANY($2))
        "#,
        order_id,
        keep,
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
