use {
    crate::domain::webhook::{NewWebhookRecord, WebhookRecord},
    crate::store::StoreError,
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

const WEBHOOK_COLUMNS: &str =
    "id, topic, shop_domain, webhook_id, payload, processed, processed_at, error_message, created_at";

#[derive(Debug, sqlx::FromRow)]
pub struct WebhookRow {
    pub id: Uuid,
    pub topic: String,
    pub shop_domain: String,
    pub webhook_id: Option<String>,
    pub payload: String,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<WebhookRow> for WebhookRecord {
    fn from(row: WebhookRow) -> Self {
        WebhookRecord {
            id: row.id,
            topic: row.topic,
            shop_domain: row.shop_domain,
            webhook_id: row.webhook_id,
            payload: row.payload,
            processed: row.processed,
            processed_at: row.processed_at,
            error_message: row.error_message,
            created_at: row.created_at,
        }
    }
}

/// Write-ahead audit row. Every delivery gets its own row, even a redelivery
/// with the same `webhook_id`.
pub async fn insert(pool: &PgPool, record: &NewWebhookRecord) -> Result<WebhookRecord, StoreError> {
    let row: WebhookRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO webhooks (id, topic, shop_domain, webhook_id, payload, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {WEBHOOK_COLUMNS}
        "#
    ))
    .bind(record.id)
    .bind(&record.topic)
    .bind(&record.shop_domain)
    .bind(record.webhook_id.as_deref())
    .bind(&record.payload)
    .bind(record.created_at)
    .fetch_one(pool)
    .await?;
    Ok(row.into())
}

pub async fn find(pool: &PgPool, id: Uuid) -> Result<Option<WebhookRecord>, StoreError> {
    let row = sqlx::query_as!(
        WebhookRow,
        r#"
        SELECT id, topic, shop_domain, webhook_id, payload, processed, processed_at,
               error_message, created_at
        FROM webhooks WHERE id = $1
        "#,
        id,
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.map(WebhookRecord::from))
}

pub async fn mark_processed(pool: &PgPool, id: Uuid) -> Result<(), StoreError> {
    let result = sqlx::query!(
        "UPDATE webhooks SET processed = true, processed_at = now(), error_message = NULL WHERE id = $1",
        id,
    )
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("webhook", id));
    }
    Ok(())
}

pub async fn mark_failed(pool: &PgPool, id: Uuid, error: &str) -> Result<(), StoreError> {
    let result = sqlx::query!(
        "UPDATE webhooks SET processed = false, error_message = $2 WHERE id = $1",
        id,
        error,
    )
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("webhook", id));
    }
    Ok(())
}
