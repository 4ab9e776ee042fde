//! Core rate limiter implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, trace};

use super::bucket::TokenBucket;
use super::endpoint::EndpointType;
use super::rules::Classifier;
use super::status::{RateLimitConfig, RateLimitStatus};
use crate::config::RateLimitingConfig;
use crate::context::Context;
use crate::error::RateLimitError;

/// Per-category client-side rate limiter.
///
/// This struct is thread-safe and is meant to be owned by one client and
/// shared with its in-flight requests through an `Arc`.
///
/// Reconfiguring a category swaps in a new, full bucket. Callers already
/// waiting keep waiting on the bucket they started with.
pub struct RateLimiter {
    /// One bucket per category, all present from construction
    buckets: DashMap<EndpointType, Arc<TokenBucket>>,
    /// Kill switch; when false every admission succeeds immediately
    global_enabled: AtomicBool,
    /// Maps requests to categories
    classifier: RwLock<Classifier>,
}

impl RateLimiter {
    /// Create a rate limiter with the default limits for every category.
    pub fn new() -> Self {
        let buckets = EndpointType::ALL
            .iter()
            .map(|endpoint| (*endpoint, Arc::new(TokenBucket::new(endpoint.default_config()))))
            .collect();

        Self {
            buckets,
            global_enabled: AtomicBool::new(true),
            classifier: RwLock::new(Classifier::default()),
        }
    }

    /// Create a rate limiter from configuration.
    ///
    /// All categories are validated before anything is applied.
    pub fn from_config(config: &RateLimitingConfig) -> Result<Self, RateLimitError> {
        let configs = EndpointType::ALL
            .iter()
            .map(|endpoint| {
                config
                    .limits(*endpoint)
                    .validate()
                    .map(|bucket_config| (*endpoint, bucket_config))
            })
            .collect::<Result<Vec<_>, RateLimitError>>()?;

        let limiter = Self::new();
        for (endpoint, bucket_config) in configs {
            limiter.set_config(endpoint, bucket_config);
        }
        limiter.set_global_enabled(config.enabled);
        limiter.set_classifier(Classifier::from_rules_or_default(&config.rules));

        info!(
            enabled = config.enabled,
            rules = limiter.classifier.read().rules().len(),
            "Rate limiter configured"
        );
        Ok(limiter)
    }

    /// Replace the limits for a category with an enabled bucket.
    pub fn set_rate_limit(&self, endpoint: EndpointType, requests_per_second: u32, burst_capacity: u32) {
        self.set_config(endpoint, RateLimitConfig::new(requests_per_second, burst_capacity));
    }

    /// Replace the bucket for a category.
    pub fn set_config(&self, endpoint: EndpointType, config: RateLimitConfig) {
        debug!(
            endpoint = %endpoint,
            requests_per_second = config.requests_per_second,
            burst_capacity = config.burst_capacity,
            enabled = config.enabled,
            "Replacing token bucket"
        );
        self.buckets.insert(endpoint, Arc::new(TokenBucket::new(config)));
    }

    /// Enable or disable throttling for one category, keeping its tokens.
    pub fn set_endpoint_enabled(&self, endpoint: EndpointType, enabled: bool) {
        debug!(endpoint = %endpoint, enabled = enabled, "Toggling endpoint rate limit");
        self.bucket(endpoint).set_enabled(enabled);
    }

    /// Turn all throttling on or off, regardless of per-category settings.
    pub fn set_global_enabled(&self, enabled: bool) {
        debug!(enabled = enabled, "Toggling global rate limiting");
        self.global_enabled.store(enabled, Ordering::Release);
    }

    pub fn is_global_enabled(&self) -> bool {
        self.global_enabled.load(Ordering::Acquire)
    }

    /// Replace the request classification rules.
    pub fn set_classifier(&self, classifier: Classifier) {
        *self.classifier.write() = classifier;
    }

    /// Resolve the category governing a request.
    pub fn classify(&self, method: &str, path: &str) -> EndpointType {
        self.classifier.read().classify(method, path)
    }

    /// Wait until the request's category admits it.
    ///
    /// Turning the global switch off releases callers already waiting here.
    pub async fn wait_for_token(&self, method: &str, path: &str) {
        let endpoint = self.classify(method, path);
        trace!(endpoint = %endpoint, method = method, path = path, "Waiting for token");
        self.bucket(endpoint).wait_for_token_gated(&self.global_enabled).await;
    }

    /// Wait until the request's category admits it or `ctx` fires.
    ///
    /// Turning the global switch off releases callers already waiting here.
    pub async fn wait_for_token_with_context(
        &self,
        ctx: &Context,
        method: &str,
        path: &str,
    ) -> Result<(), RateLimitError> {
        let endpoint = self.classify(method, path);
        trace!(endpoint = %endpoint, method = method, path = path, "Waiting for token");

        let result = self
            .bucket(endpoint)
            .wait_for_token_with_context_gated(ctx, &self.global_enabled)
            .await;
        if let Err(ref err) = result {
            debug!(endpoint = %endpoint, method = method, path = path, error = %err, "Request not admitted");
        }
        result
    }

    /// Snapshot a category's configuration and current tokens.
    pub fn get_rate_limit_status(&self, endpoint: EndpointType) -> RateLimitStatus {
        let bucket = self.bucket(endpoint);

        RateLimitStatus {
            endpoint_type: endpoint,
            enabled: self.is_global_enabled() && bucket.is_enabled(),
            requests_per_second: bucket.requests_per_second(),
            burst_capacity: bucket.capacity(),
            tokens: bucket.tokens(),
        }
    }

    /// Snapshot every category.
    pub fn statuses(&self) -> Vec<RateLimitStatus> {
        EndpointType::ALL
            .iter()
            .map(|endpoint| self.get_rate_limit_status(*endpoint))
            .collect()
    }

    fn bucket(&self, endpoint: EndpointType) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.get(&endpoint) {
            return bucket.value().clone();
        }

        // Unreachable while `new` inserts every category and nothing removes
        // one; keeps the lookup total without panicking.
        self.buckets
            .entry(endpoint)
            .or_insert_with(|| Arc::new(TokenBucket::new(endpoint.default_config())))
            .value()
            .clone()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
