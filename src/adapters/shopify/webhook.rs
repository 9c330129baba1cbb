use {
    crate::{
        AppState,
        adapters::api_errors::ApiError,
        domain::{
            error::PipelineError,
            job::{JobKind, JobOptions, QueueName},
            webhook::{NewWebhookRecord, WebhookTopic},
        },
        jobs::webhook::{SHOPIFY_SOURCE, WebhookJobPayload},
    },
    axum::{
        Json,
        body::Bytes,
        extract::State,
        http::{HeaderMap, StatusCode},
    },
    base64::{Engine, engine::general_purpose::STANDARD},
    hmac::{Hmac, Mac},
    sha2::Sha256,
};

pub const HMAC_HEADER: &str = "X-Shopify-Hmac-Sha256";
pub const TOPIC_HEADER: &str = "X-Shopify-Topic";
pub const SHOP_DOMAIN_HEADER: &str = "X-Shopify-Shop-Domain";
pub const WEBHOOK_ID_HEADER: &str = "X-Shopify-Webhook-Id";

/// Constant-time check of the base64 HMAC-SHA256 Shopify sends with every
/// delivery, computed over the raw body.
pub fn verify_signature(body: &[u8], header: &str, secret: &str) -> bool {
    let Ok(expected) = STANDARD.decode(header.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Header value Shopify would send for `body`.
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length.
        Err(_) => return String::new(),
    };
    mac.update(body);
    STANDARD.encode(mac.finalize().into_bytes())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[tracing::instrument(
    name = "webhook",
    skip_all,
    fields(topic = tracing::field::Empty, shop = tracing::field::Empty, job_id = tracing::field::Empty)
)]
pub async fn shopify_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let signature = header(&headers, HMAC_HEADER).ok_or_else(|| {
        PipelineError::WebhookSignature(format!("missing {HMAC_HEADER} header"))
    })?;
    if !verify_signature(&body, signature, &state.webhook_secret) {
        return Err(PipelineError::WebhookSignature("signature mismatch".into()).into());
    }

    let topic = header(&headers, TOPIC_HEADER)
        .ok_or_else(|| PipelineError::BadRequest(format!("missing {TOPIC_HEADER} header")))?
        .to_string();
    let shop = header(&headers, SHOP_DOMAIN_HEADER)
        .ok_or_else(|| PipelineError::BadRequest(format!("missing {SHOP_DOMAIN_HEADER} header")))?
        .to_string();
    let webhook_id = header(&headers, WEBHOOK_ID_HEADER).map(str::to_string);

    tracing::Span::current()
        .record("topic", tracing::field::display(&topic))
        .record("shop", tracing::field::display(&shop));

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| PipelineError::BadRequest(format!("invalid JSON body: {e}")))?;
    if payload.get("id").is_none_or(serde_json::Value::is_null) {
        return Err(PipelineError::Validation("webhook payload has no id".into()).into());
    }

    let record = state
        .store
        .insert_webhook(&NewWebhookRecord::new(
            &topic,
            &shop,
            webhook_id,
            String::from_utf8_lossy(&body),
        ))
        .await?;

    if WebhookTopic::parse(&topic).is_err() {
        state.store.mark_webhook_processed(record.id).await?;
        tracing::info!(webhook_id = %record.id, "unsupported topic, ignored");
        return Ok((
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ignored", "webhookId": record.id })),
        ));
    }

    let job_payload = serde_json::to_value(WebhookJobPayload {
        source: SHOPIFY_SOURCE.to_string(),
        event_type: topic,
        payload,
        webhook_id: Some(record.id),
        shop_domain: Some(shop),
    })
    .map_err(PipelineError::from)?;

    let job = state
        .backend
        .enqueue(
            QueueName::Webhook,
            JobKind::ProcessWebhook,
            job_payload,
            JobOptions::new(),
        )
        .await?;
    tracing::Span::current().record("job_id", tracing::field::display(job.id));
    tracing::info!(webhook_id = %record.id, "webhook enqueued for async processing");

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "accepted",
            "jobId": job.id,
            "webhookId": record.id,
        })),
    ))
}
