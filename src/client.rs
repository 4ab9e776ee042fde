//! API client plumbing.
//!
//! The [`Client`] admits every request through its [`RateLimiter`] before
//! handing it to a [`Transport`]. Rate limiter errors are returned to the
//! caller unchanged and never retried.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::{ClientConfig, MailwireConfig};
use crate::context::Context;
use crate::error::{MailwireError, Result};
use crate::ratelimit::RateLimiter;

/// An outbound API request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    /// HTTP method, e.g. `POST`
    pub method: String,
    /// Request path relative to the base URL
    pub path: String,
    /// JSON body, if any
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    /// Value of the `Idempotency-Key` header
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl ApiRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            body: None,
            idempotency_key: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// A response returned by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Decoded JSON body
    #[serde(default)]
    pub body: serde_json::Value,
}

/// Sends requests over the wire.
///
/// Implementations own authentication, retries and encoding.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a single request.
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// A rate-limited API client.
pub struct Client<T> {
    transport: T,
    rate_limiter: Arc<RateLimiter>,
    config: ClientConfig,
}

impl<T: Transport> Client<T> {
    /// Create a client with its own rate limiter built from `config`.
    pub fn new(transport: T, config: &MailwireConfig) -> Result<Self> {
        let rate_limiter = RateLimiter::from_config(&config.rate_limiting)?;
        Ok(Self::with_rate_limiter(
            transport,
            config.client.clone(),
            Arc::new(rate_limiter),
        ))
    }

    /// Create a client around an existing rate limiter.
    pub fn with_rate_limiter(transport: T, config: ClientConfig, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            transport,
            rate_limiter,
            config,
        }
    }

    /// The rate limiter, for reconfiguration and status queries.
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send a request once a token is available.
    ///
    /// The configured request timeout applies only when `ctx` has no
    /// deadline of its own. The transport call is abandoned if `ctx` fires
    /// while it is in flight.
    #[instrument(skip(self, ctx, request), fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, ctx: &Context, mut request: ApiRequest) -> Result<ApiResponse> {
        let ctx = match (ctx.deadline(), self.config.request_timeout()) {
            (None, Some(timeout)) => ctx.with_timeout(timeout),
            _ => ctx.clone(),
        };

        self.rate_limiter
            .wait_for_token_with_context(&ctx, &request.method, &request.path)
            .await?;

        if self.config.idempotency_keys
            && request.idempotency_key.is_none()
            && request.method.eq_ignore_ascii_case("POST")
        {
            request.idempotency_key = Some(uuid::Uuid::new_v4().to_string());
        }

        debug!(idempotency_key = ?request.idempotency_key, "Request admitted");

        tokio::select! {
            biased;
            err = ctx.done() => Err(MailwireError::from(err)),
            response = self.transport.execute(request) => response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RateLimitError;
    use crate::ratelimit::EndpointType;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Records requests and answers after an optional delay.
    #[derive(Default)]
    struct RecordingTransport {
        requests: Mutex<Vec<ApiRequest>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
            self.requests.lock().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(ApiResponse {
                status: 200,
                body: serde_json::json!({ "ok": true }),
            })
        }
    }

    fn client(transport: RecordingTransport) -> Client<RecordingTransport> {
        Client::new(transport, &MailwireConfig::default()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_passes_through() {
        let client = client(RecordingTransport::default());

        let response = client
            .send(&Context::background(), ApiRequest::get("/templates"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        let requests = client.transport.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].idempotency_key, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_gets_idempotency_key() {
        let client = client(RecordingTransport::default());

        let request = ApiRequest::post("/email").with_body(serde_json::json!({ "to": "a@example.com" }));
        client.send(&Context::background(), request).await.unwrap();
        client
            .send(
                &Context::background(),
                ApiRequest::post("/email").with_idempotency_key("fixed"),
            )
            .await
            .unwrap();

        let requests = client.transport.requests.lock();
        let generated = requests[0].idempotency_key.as_deref().unwrap();
        assert!(uuid::Uuid::parse_str(generated).is_ok());
        assert_eq!(requests[1].idempotency_key.as_deref(), Some("fixed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_error_skips_transport() {
        let client = client(RecordingTransport::default());
        client.rate_limiter().set_rate_limit(EndpointType::SendMessage, 1, 0);

        let ctx = Context::background().with_timeout(Duration::from_millis(100));
        let err = client.send(&ctx, ApiRequest::post("/email")).await.unwrap_err();

        assert!(matches!(err, MailwireError::RateLimit(RateLimitError::DeadlineExceeded)));
        assert!(!err.is_retryable());
        assert!(client.transport.requests.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_timeout_applies_without_deadline() {
        let mut config = MailwireConfig::default();
        config.client.request_timeout_ms = Some(250);
        config.rate_limiting.statistics.burst_capacity = 0;

        let client = Client::new(RecordingTransport::default(), &config).unwrap();
        let start = tokio::time::Instant::now();
        let err = client
            .send(&Context::background(), ApiRequest::get("/stats"))
            .await
            .unwrap_err();

        assert!(matches!(err, MailwireError::RateLimit(RateLimitError::DeadlineExceeded)));
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_transport() {
        let client = Arc::new(client(RecordingTransport {
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        }));
        let (ctx, handle) = Context::background().with_cancel();

        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.send(&ctx, ApiRequest::get("/domains")).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, MailwireError::RateLimit(RateLimitError::Canceled)));
        assert_eq!(client.transport.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_shared_rate_limiter() {
        let limiter = Arc::new(RateLimiter::new());
        limiter.set_global_enabled(false);

        let client = Client::with_rate_limiter(
            RecordingTransport::default(),
            ClientConfig::default(),
            limiter.clone(),
        );

        assert!(Arc::ptr_eq(client.rate_limiter(), &limiter));
        assert!(!client.rate_limiter().is_global_enabled());
    }
}
