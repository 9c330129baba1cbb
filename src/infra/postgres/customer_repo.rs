use {
    crate::domain::commerce::Customer,
    crate::store::StoreError,
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

const CUSTOMER_COLUMNS: &str = "id, shopify_customer_id, email, first_name, last_name, phone, \
     accepts_marketing, notes, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub struct CustomerRow {
    pub id: Uuid,
    pub shopify_customer_id: Option<String>,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub accepts_marketing: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Customer {
            id: row.id,
            shopify_customer_id: row.shopify_customer_id,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            phone: row.phone,
            accepts_marketing: row.accepts_marketing,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub async fn find_by_remote_id(
    pool: &PgPool,
    remote_id: &str,
) -> Result<Option<Customer>, StoreError> {
    let row = sqlx::query_as!(
        CustomerRow,
        r#"
        SELECT id, shopify_customer_id, email, first_name, last_name, phone,
               accepts_marketing, notes, created_at, updated_at
        FROM customers WHERE shopify_customer_id = $1
        "#,
        remote_id,
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Customer::from))
}

pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Customer>, StoreError> {
    let row = sqlx::query_as!(
        CustomerRow,
        r#"
        SELECT id, shopify_customer_id, email, first_name, last_name, phone,
               accepts_marketing, notes, created_at, updated_at
        FROM customers WHERE email = $1
        "#,
        email,
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Customer::from))
}

/// Insert, or refresh the Shopify-owned columns of the row already linked to
/// the same remote id. `notes` is never touched on conflict.
pub async fn upsert(pool: &PgPool, customer: &Customer) -> Result<Customer, StoreError> {
    let row: CustomerRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO customers
            (id, shopify_customer_id, email, first_name, last_name, phone,
             accepts_marketing, notes, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (shopify_customer_id) DO UPDATE SET
            email = EXCLUDED.email,
            first_name = EXCLUDED.first_name,
            last_name = EXCLUDED.last_name,
            phone = EXCLUDED.phone,
            accepts_marketing = EXCLUDED.accepts_marketing,
            updated_at = now()
        RETURNING {CUSTOMER_COLUMNS}
        "#
    ))
    .bind(customer.id)
    .bind(customer.shopify_customer_id.as_deref())
    .bind(&customer.email)
    .bind(customer.first_name.as_deref())
    .bind(customer.last_name.as_deref())
    .bind(customer.phone.as_deref())
    .bind(customer.accepts_marketing)
    .bind(customer.notes.as_deref())
    .bind(customer.created_at)
    .bind(customer.updated_at)
    .fetch_one(pool)
    .await
    .map_err(unique_to_conflict)?;
    Ok(row.into())
}

pub async fn update(pool: &PgPool, customer: &Customer) -> Result<(), StoreError> {
    let result = sqlx::query!(
        r#"
        UPDATE customers
        SET shopify_customer_id = $2, email = $3, first_name = $4, last_name = $5,
            phone = $6, accepts_marketing = $7, notes = $8, updated_at = $9
        WHERE id = $1
        "#,
        customer.id,
        customer.shopify_customer_id.as_deref(),
        &customer.email,
        customer.first_name.as_deref(),
        customer.last_name.as_deref(),
        customer.phone.as_deref(),
        customer.accepts_marketing,
        customer.notes.as_deref(),
        customer.updated_at,
    )
    .execute(pool)
    .await
    .map_err(unique_to_conflict)?;

    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("customer", customer.id));
    }
    Ok(())
}

pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, StoreError> {
    let result = sqlx::query!("DELETE FROM customers WHERE id = $1", id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Unique violations surface as retryable conflicts; a retry re-reads and
/// takes the update path.
pub(crate) fn unique_to_conflict(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        _ => StoreError::Database(err),
    }
}
