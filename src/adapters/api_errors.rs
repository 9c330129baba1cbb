use {
    crate::{domain::error::PipelineError, queue::QueueError, store::StoreError},
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
};

/// HTTP face of [`PipelineError`]. Internal failures are logged here and
/// answered with a generic message.
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        Self(err.into())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(err.into())
    }
}

fn internal(err: &dyn std::fmt::Display) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %err, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "internal error".to_string(),
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self.0 {
            PipelineError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                msg.clone(),
            ),
            PipelineError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", msg.clone())
            }
            PipelineError::WebhookSignature(msg) => {
                tracing::warn!(reason = %msg, "webhook signature rejected");
                (
                    StatusCode::UNAUTHORIZED,
                    "webhook_error",
                    "invalid webhook signature".to_string(),
                )
            }
            PipelineError::Queue(QueueError::InvalidJob(msg)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                msg.clone(),
            ),
            PipelineError::Queue(err @ QueueError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "not_found", err.to_string())
            }
            PipelineError::Store(err @ StoreError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, "not_found", err.to_string())
            }
            PipelineError::Store(StoreError::Conflict(msg)) => {
                (StatusCode::CONFLICT, "conflict", msg.clone())
            }
            PipelineError::Database(err) => internal(err),
            PipelineError::Serialization(err) => internal(err),
            PipelineError::Queue(err) => internal(err),
            PipelineError::Store(err) => internal(err),
        };

        let body = serde_json::json!({
            "error_code": error_code,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
