//! Rate limit configuration and status value types.

use serde::{Deserialize, Serialize};

use super::endpoint::EndpointType;
use crate::error::RateLimitError;

/// Validated settings for a single token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens added per second
    pub requests_per_second: u32,
    /// Maximum tokens held, i.e. the burst size
    pub burst_capacity: u32,
    /// When false every admission succeeds immediately
    pub enabled: bool,
}

impl RateLimitConfig {
    /// An enabled configuration.
    pub fn new(requests_per_second: u32, burst_capacity: u32) -> Self {
        Self {
            requests_per_second,
            burst_capacity,
            enabled: true,
        }
    }

    /// A configuration that admits everything.
    pub fn disabled() -> Self {
        Self {
            requests_per_second: 0,
            burst_capacity: 0,
            enabled: false,
        }
    }
}

/// Per-category limits as they appear in configuration files.
///
/// Values are signed so that a negative setting is reported with its field
/// name instead of surfacing as a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLimits {
    /// Requests allowed per second
    pub requests_per_second: i64,
    /// Requests that may fire back-to-back
    pub burst_capacity: i64,
    /// Whether this category is throttled at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CategoryLimits {
    /// Check both numeric fields, returning the bucket configuration they describe.
    pub fn validate(&self) -> Result<RateLimitConfig, RateLimitError> {
        Ok(RateLimitConfig {
            requests_per_second: check_field("requests_per_second", self.requests_per_second)?,
            burst_capacity: check_field("burst_capacity", self.burst_capacity)?,
            enabled: self.enabled,
        })
    }
}

impl From<RateLimitConfig> for CategoryLimits {
    fn from(config: RateLimitConfig) -> Self {
        Self {
            requests_per_second: config.requests_per_second as i64,
            burst_capacity: config.burst_capacity as i64,
            enabled: config.enabled,
        }
    }
}

fn check_field(field: &'static str, value: i64) -> Result<u32, RateLimitError> {
    u32::try_from(value).map_err(|_| RateLimitError::InvalidConfig {
        field,
        value,
        max: u32::MAX as i64,
    })
}

/// Read-only snapshot of one category's limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    /// The category this snapshot describes
    pub endpoint_type: EndpointType,
    /// Whether admissions for this category are currently throttled
    pub enabled: bool,
    /// Configured refill rate
    pub requests_per_second: u32,
    /// Configured burst size
    pub burst_capacity: u32,
    /// Tokens available at the time of the snapshot
    pub tokens: f64,
}
