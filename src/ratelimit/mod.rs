//! Client-side rate limiting.
//!
//! Every outbound request is classified into an [`EndpointType`] and must
//! obtain a token from that category's [`TokenBucket`] before it is sent.

mod bucket;
mod endpoint;
mod limiter;
mod rules;
mod status;

pub use bucket::TokenBucket;
pub use endpoint::{EndpointType, UnknownEndpointType};
pub use limiter::RateLimiter;
pub use rules::{ClassificationRule, Classifier};
pub use status::{CategoryLimits, RateLimitConfig, RateLimitStatus};
