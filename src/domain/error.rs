use {
    serde::{Deserialize, Serialize},
    std::fmt,
    thiserror::Error,
};

/// Errors raised at the ingestion and composition edges (HTTP, bootstrap).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("webhook signature: {0}")]
    WebhookSignature(String),

    /// Missing header or unparseable body.
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("queue: {0}")]
    Queue(#[from] crate::queue::QueueError),

    #[error("store: {0}")]
    Store(#[from] crate::store::StoreError),
}

/// Classification attached to a job failure where it is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input or missing required field.
    Validation,
    /// Template or resource does not exist.
    NotFound,
    /// Credentials or signature rejected.
    Auth,
    /// Connection, DNS or timeout failure.
    Network,
    RateLimited,
    /// Work already done; idempotency short-circuit.
    Duplicate,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Auth => "auth",
            Self::Network => "network",
            Self::RateLimited => "rate_limited",
            Self::Duplicate => "duplicate",
            Self::Unknown => "unknown",
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(self, Self::Network | Self::RateLimited | Self::Unknown)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured failure returned by a processor. The worker pool reads `kind`
/// to decide between retry and terminal failure.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: serde_json::Value::Null,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Duplicate, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }

    /// Machine-readable code, e.g. `rate_limited`.
    pub fn code(&self) -> &'static str {
        self.kind.as_str()
    }
}

impl From<PipelineError> for JobError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(msg) => Self::validation(msg),
            PipelineError::WebhookSignature(msg) => Self::auth(msg),
            PipelineError::BadRequest(msg) => Self::validation(msg),
            PipelineError::Serialization(e) => Self::validation(e.to_string()),
            PipelineError::Database(e) => crate::store::StoreError::Database(e).into(),
            PipelineError::Store(e) => e.into(),
            PipelineError::Queue(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_kinds_are_retryable() {
        assert!(ErrorKind::Network.retryable());
        assert!(ErrorKind::RateLimited.retryable());
        assert!(ErrorKind::Unknown.retryable());

        assert!(!ErrorKind::Validation.retryable());
        assert!(!ErrorKind::NotFound.retryable());
        assert!(!ErrorKind::Auth.retryable());
        assert!(!ErrorKind::Duplicate.retryable());
    }

    #[test]
    fn job_error_serializes_code_and_context() {
        let err = JobError::rate_limited("slow down").with_context(serde_json::json!({"retry_after": 2}));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "rate_limited");
        assert_eq!(value["message"], "slow down");
        assert_eq!(value["context"]["retry_after"], 2);
        assert_eq!(err.to_string(), "rate_limited: slow down");
    }

    #[test]
    fn pipeline_validation_maps_to_non_retryable() {
        let err: JobError = PipelineError::Validation("missing id".into()).into();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(!err.retryable());
    }
}
