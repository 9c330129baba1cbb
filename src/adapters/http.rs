use {
    crate::{
        AppState,
        adapters::{api_errors::ApiError, shopify::webhook::shopify_webhook_handler},
        domain::{
            error::PipelineError,
            job::{JobKind, JobOptions, QueueName},
        },
    },
    axum::{
        Json, Router,
        body::Bytes,
        extract::{DefaultBodyLimit, Path, State},
        http::StatusCode,
        routing::{get, post},
    },
    serde::Deserialize,
    std::time::Duration,
    tower_http::timeout::TimeoutLayer,
    uuid::Uuid,
};

/// Shopify caps webhook bodies well below this.
pub const BODY_LIMIT: usize = 256 * 1024;
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/shopify", post(shopify_webhook_handler))
        .route("/queues/stats", get(queue_stats))
        .route("/queues/cleanup", post(cleanup))
        .route("/queues/{name}/pause", post(pause_queue))
        .route("/queues/{name}/resume", post(resume_queue))
        .route("/jobs", post(create_job))
        .route("/jobs/{id}", get(get_job))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let report = state.supervisor.health().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(serde_json::json!(report)))
}

async fn queue_stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state.supervisor.statistics().await?;
    Ok(Json(serde_json::json!(stats)))
}

fn parse_queue(name: &str) -> Result<QueueName, ApiError> {
    QueueName::try_from(name).map_err(ApiError::from)
}

async fn pause_queue(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let queue = parse_queue(&name)?;
    state.supervisor.pause(queue).await?;
    Ok(Json(serde_json::json!({ "queue": queue, "paused": true })))
}

async fn resume_queue(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let queue = parse_queue(&name)?;
    state.supervisor.resume(queue).await?;
    Ok(Json(serde_json::json!({ "queue": queue, "paused": false })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CleanupRequest {
    #[serde(default)]
    older_than_ms: Option<u64>,
}

async fn cleanup(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let req: CleanupRequest = if body.is_empty() {
        CleanupRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| PipelineError::BadRequest(format!("invalid JSON body: {e}")))?
    };
    let older_than = req
        .older_than_ms
        .map(Duration::from_millis)
        .unwrap_or(state.retention);
    let removed = state.supervisor.cleanup(older_than).await?;
    let total: u64 = removed.values().sum();
    Ok(Json(serde_json::json!({ "removed": removed, "total": total })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobRequest {
    queue: String,
    name: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    delay_ms: Option<u64>,
    #[serde(default)]
    max_attempts: Option<i32>,
}

async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let queue = parse_queue(&req.queue)?;
    let kind = JobKind::try_from(req.name.as_str())?;

    let mut options = JobOptions::new();
    if let Some(priority) = req.priority {
        options = options.with_priority(priority);
    }
    if let Some(delay_ms) = req.delay_ms {
        options = options.with_delay(Duration::from_millis(delay_ms));
    }
    if let Some(max_attempts) = req.max_attempts {
        options = options.with_max_attempts(max_attempts);
    }

    let job = state.backend.enqueue(queue, kind, req.payload, options).await?;
    tracing::info!(job_id = %job.id, queue = %queue, job_name = %kind, "job enqueued via api");
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "jobId": job.id, "status": job.status })),
    ))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = state
        .backend
        .get(id)
        .await?
        .ok_or_else(|| PipelineError::Queue(crate::queue::QueueError::NotFound(id)))?;
    Ok(Json(serde_json::json!(job)))
}
