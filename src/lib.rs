//! Mailwire - transactional email API client
//!
//! This crate provides the request plumbing for a transactional email REST
//! API. Outbound requests pass through a client-side, per-endpoint token
//! bucket rate limiter that can be bounded by a caller-supplied
//! cancellation/deadline [`context::Context`].

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod ratelimit;
