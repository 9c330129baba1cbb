use {
    crate::domain::{
        error::ErrorKind,
        provider::{Method, RemoteError, ShopifyApi},
    },
    std::{future::Future, pin::Pin, time::Duration},
};

pub const API_VERSION: &str = "2024-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shopify Admin REST client. One attempt per call; retries belong to the
/// job that made it.
pub struct ShopifyClient {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl ShopifyClient {
    pub fn new(shop_domain: &str, access_token: Option<String>) -> Result<Self, reqwest::Error> {
        Self::with_base_url(
            format!("https://{}/admin/api/{API_VERSION}", shop_domain.trim_end_matches('/')),
            access_token,
        )
    }

    /// Fails only when the TLS backend cannot be initialised.
    pub fn with_base_url(
        base_url: impl Into<String>,
        access_token: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            access_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, RemoteError> {
        let token = self.access_token.as_deref().ok_or_else(|| RemoteError {
            kind: ErrorKind::Auth,
            method: method.as_str(),
            path: path.to_string(),
            status: None,
            message: "SHOPIFY_ACCESS_TOKEN is not configured".to_string(),
        })?;

        let url = format!("{}{path}", self.base_url);
        let verb = match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut req = self
            .http
            .request(verb, &url)
            .header("X-Shopify-Access-Token", token);
        if let Some(body) = &body {
            req = req.json(body);
        }

        let started = std::time::Instant::now();
        let resp = req
            .send()
            .await
            .map_err(|e| RemoteError::transport(method, path, e.to_string()))?;
        let status = resp.status();
        tracing::debug!(
            method = method.as_str(),
            path,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "shopify request"
        );

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(method, path, status.as_u16(), text));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RemoteError::transport(method, path, e.to_string()))?;
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| RemoteError {
            kind: ErrorKind::Unknown,
            method: method.as_str(),
            path: path.to_string(),
            status: Some(status.as_u16()),
            message: format!("invalid JSON response: {e}"),
        })
    }
}

impl ShopifyApi for ShopifyClient {
    fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, RemoteError>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move { self.send(method, &path, body).await })
    }
}
