use {
    super::customer_repo::unique_to_conflict,
    crate::domain::{commerce::Product, money::MoneyAmount},
    crate::store::StoreError,
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

const PRODUCT_COLUMNS: &str = "id, shopify_product_id, title, body_html, vendor, product_type, \
     handle, status, tags, price_cents, sku, inventory_quantity, last_synced_at, notes, \
     created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub struct ProductRow {
    pub id: Uuid,
    pub shopify_product_id: Option<String>,
    pub title: String,
    pub body_html: Option<String>,
    pub vendor: Option<String>,
    pub product_type: Option<String>,
    pub handle: Option<String>,
    pub status: String,
    pub tags: Option<String>,
    pub price_cents: i64,
    pub sku: Option<String>,
    pub inventory_quantity: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let price = MoneyAmount::new(row.price_cents).map_err(|e| StoreError::Corrupt {
            entity: "product",
            id: row.id,
            reason: e.to_string(),
        })?;
        Ok(Product {
            id: row.id,
            shopify_product_id: row.shopify_product_id,
            title: row.title,
            body_html: row.body_html,
            vendor: row.vendor,
            product_type: row.product_type,
            handle: row.handle,
            status: row.status,
            tags: row.tags,
            price,
            sku: row.sku,
            inventory_quantity: row.inventory_quantity,
            last_synced_at: row.last_synced_at,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub async fn find(pool: &PgPool, id: Uuid) -> Result<Option<Product>, StoreError> {
    let row = sqlx::query_as!(
        ProductRow,
        r#"
        SELECT id, shopify_product_id, title, body_html, vendor, product_type, handle, status,
               tags, price_cents, sku, inventory_quantity, last_synced_at, notes,
               created_at, updated_at
        FROM products WHERE id = $1
        "#,
        id,
    )
    .fetch_optional(pool)
    .await?;
    row.map(Product::try_from).transpose()
}

pub async fn find_by_remote_id(
    pool: &PgPool,
    remote_id: &str,
) -> Result<Option<Product>, StoreError> {
    let row = sqlx::query_as!(
        ProductRow,
        r#"
        SELECT id, shopify_product_id, title, body_html, vendor, product_type, handle, status,
               tags, price_cents, sku, inventory_quantity, last_synced_at, notes,
               created_at, updated_at
        FROM products WHERE shopify_product_id = $1
        "#,
        remote_id,
    )
    .fetch_optional(pool)
    .await?;
    row.map(Product::try_from).transpose()
}

/// Oldest local row not yet linked to Shopify whose handle, or failing that
/// sku, matches.
pub async fn find_unlinked(
    pool: &PgPool,
    handle: Option<&str>,
    sku: Option<&str>,
) -> Result<Option<Product>, StoreError> {
    let row = sqlx::query_as!(
        ProductRow,
        r#"
        SELECT id, shopify_product_id, title, body_html, vendor, product_type, handle, status,
               tags, price_cents, sku, inventory_quantity, last_synced_at, notes,
               created_at, updated_at
        FROM products
        WHERE shopify_product_id IS NULL
          AND ((handle IS NOT NULL AND handle = $1) OR (sku IS NOT NULL AND sku = $2))
        ORDER BY (handle IS NOT NULL AND handle = $1) DESC, created_at
        LIMIT 1
        "#,
        handle,
        sku,
    )
    .fetch_optional(pool)
    .await?;
    row.map(Product::try_from).transpose()
}

pub async fn upsert(pool: &PgPool, product: &Product) -> Result<Product, StoreError> {
    let row: ProductRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO products
            (id, shopify_product_id, title, body_html, vendor, product_type, handle, status,
             tags, price_cents, sku, inventory_quantity, last_synced_at, notes,
             created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (shopify_product_id) DO UPDATE SET
            title = EXCLUDED.title,
            body_html = EXCLUDED.body_html,
            vendor = EXCLUDED.vendor,
            product_type = EXCLUDED.product_type,
            handle = EXCLUDED.handle,
            status = EXCLUDED.status,
            tags = EXCLUDED.tags,
            price_cents = EXCLUDED.price_cents,
            sku = EXCLUDED.sku,
            inventory_quantity = EXCLUDED.inventory_quantity,
            updated_at = now()
        RETURNING {PRODUCT_COLUMNS}
        "#
    ))
    .bind(product.id)
    .bind(product.shopify_product_id.as_deref())
    .bind(&product.title)
    .bind(product.body_html.as_deref())
    .bind(product.vendor.as_deref())
    .bind(product.product_type.as_deref())
    .bind(product.handle.as_deref())
    .bind(&product.status)
    .bind(product.tags.as_deref())
    .bind(product.price.cents())
    .bind(product.sku.as_deref())
    .bind(product.inventory_quantity)
    .bind(product.last_synced_at)
    .bind(product.notes.as_deref())
    .bind(product.created_at)
    .bind(product.updated_at)
    .fetch_one(pool)
    .await
    .map_err(unique_to_conflict)?;
    row.try_into()
}

pub async fn update(pool: &PgPool, product: &Product) -> Result<(), StoreError> {
    let result = sqlx::query!(
        r#"
        UPDATE products
        SET shopify_product_id = $2, title = $3, body_html = $4, vendor = $5,
            product_type = $6, handle = $7, status = $8, tags = $9, price_cents = $10,
            sku = $11, inventory_quantity = $12, last_synced_at = $13, notes = $14,
            updated_at = $15
        WHERE id = $1
        "#,
        product.id,
        product.shopify_product_id.as_deref(),
        &product.title,
        product.body_html.as_deref(),
        product.vendor.as_deref(),
        product.product_type.as_deref(),
        product.handle.as_deref(),
        &product.status,
        product.tags.as_deref(),
        product.price.cents(),
        product.sku.as_deref(),
        product.inventory_quantity,
        product.last_synced_at,
        product.notes.as_deref(),
        product.updated_at,
    )
    .execute(pool)
    .await
    .map_err(unique_to_conflict)?;

    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("product", product.id));
    }
    Ok(())
}

pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, StoreError> {
    let result = sqlx::query!("DELETE FROM products WHERE id = $1", id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
