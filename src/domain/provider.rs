use {
    super::error::{ErrorKind, JobError},
    std::{future::Future, pin::Pin},
    thiserror::Error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// Failure of a Shopify Admin call. The kind is decided by the client from
/// the HTTP status or transport error, not from the message text.
#[derive(Debug, Clone, Error)]
#[error("shopify {method} {path}: {message}")]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub method: &'static str,
    pub path: String,
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn from_status(method: Method, path: &str, status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => ErrorKind::Auth,
            404 => ErrorKind::NotFound,
            400 | 422 => ErrorKind::Validation,
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::Network,
            _ => ErrorKind::Unknown,
        };
        Self {
            kind,
            method: method.as_str(),
            path: path.to_string(),
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn transport(method: Method, path: &str, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Network,
            method: method.as_str(),
            path: path.to_string(),
            status: None,
            message: message.into(),
        }
    }
}

impl From<RemoteError> for JobError {
    fn from(err: RemoteError) -> Self {
        let context = serde_json::json!({
            "method": err.method,
            "path": err.path,
            "status": err.status,
        });
        JobError::new(err.kind, err.to_string()).with_context(context)
    }
}

/// Opaque remote commerce API. No retry inside: the job layer owns retries.
pub trait ShopifyApi: Send + Sync {
    fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, RemoteError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_kinds() {
        let kind = |status| RemoteError::from_status(Method::Get, "/x", status, "").kind;
        assert_eq!(kind(401), ErrorKind::Auth);
        assert_eq!(kind(403), ErrorKind::Auth);
        assert_eq!(kind(404), ErrorKind::NotFound);
        assert_eq!(kind(422), ErrorKind::Validation);
        assert_eq!(kind(429), ErrorKind::RateLimited);
        assert_eq!(kind(503), ErrorKind::Network);
        assert_eq!(kind(302), ErrorKind::Unknown);
    }

    #[test]
    fn transport_errors_are_retryable() {
        let err: JobError = RemoteError::transport(Method::Post, "/products.json", "timed out").into();
        assert!(err.retryable());
        assert_eq!(err.context["path"], "/products.json");
    }
}
