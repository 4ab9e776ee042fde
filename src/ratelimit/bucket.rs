//! Token bucket admission control.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::status::RateLimitConfig;
use crate::context::Context;
use crate::error::RateLimitError;

/// Shortest sleep between admission attempts.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Longest sleep between admission attempts.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Mutable part of the bucket, always updated as a unit.
#[derive(Debug)]
struct BucketState {
    /// Tokens currently available, in `[0, capacity]`
    tokens: f64,
    /// When `tokens` was last brought up to date
    last_refill: Instant,
}

impl BucketState {
    /// Tokens that would be available at `now`.
    fn projected(&self, now: Instant, capacity: f64, refill_rate: f64) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * refill_rate).min(capacity)
    }

    fn refill(&mut self, now: Instant, capacity: f64, refill_rate: f64) {
        self.tokens = self.projected(now, capacity, refill_rate);
        self.last_refill = now;
    }
}

/// Outcome of a single non-blocking admission attempt.
enum Attempt {
    Admitted,
    Retry(Duration),
}

/// A token bucket with lazy refill.
///
/// Tokens are recomputed from the elapsed time whenever the bucket is
/// consulted, so no background timer is needed. Concurrent waiters are
/// admitted in whatever order they happen to retry; there is no queue.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum tokens held
    capacity: u32,
    /// Tokens added per second
    requests_per_second: u32,
    /// When false every admission succeeds without consuming a token
    enabled: AtomicBool,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            capacity: config.burst_capacity,
            requests_per_second: config.requests_per_second,
            enabled: AtomicBool::new(config.enabled),
            state: Mutex::new(BucketState {
                tokens: config.burst_capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Get the burst capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Get the refill rate in tokens per second.
    pub fn requests_per_second(&self) -> u32 {
        self.requests_per_second
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turn throttling on or off. Waiters already suspended notice the
    /// change on their next retry.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// The configuration this bucket currently represents.
    pub fn config(&self) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_second: self.requests_per_second,
            burst_capacity: self.capacity,
            enabled: self.is_enabled(),
        }
    }

    /// Tokens available right now. Does not modify the bucket.
    pub fn tokens(&self) -> f64 {
        let state = self.state.lock();
        state.projected(Instant::now(), self.capacity as f64, self.refill_rate())
    }

    /// Take a token if one is available, without waiting.
    pub fn try_acquire(&self) -> bool {
        matches!(self.attempt(None), Attempt::Admitted)
    }

    /// Wait until a token is available and take it.
    ///
    /// Returns immediately when the bucket is disabled. With a zero refill
    /// rate and no tokens left this never completes; use
    /// [`wait_for_token_with_context`](Self::wait_for_token_with_context) to
    /// bound the wait.
    pub async fn wait_for_token(&self) {
        self.wait_gated(None).await
    }

    /// Wait until a token is available or `ctx` fires.
    ///
    /// A token that is already available is taken even if `ctx` has fired.
    pub async fn wait_for_token_with_context(&self, ctx: &Context) -> Result<(), RateLimitError> {
        self.wait_with_context_gated(ctx, None).await
    }

    /// Like [`wait_for_token`](Self::wait_for_token), but also admits as
    /// soon as `gate` reads false, including for callers already waiting.
    pub(crate) async fn wait_for_token_gated(&self, gate: &AtomicBool) {
        self.wait_gated(Some(gate)).await
    }

    /// Like [`wait_for_token_with_context`](Self::wait_for_token_with_context),
    /// but also admits as soon as `gate` reads false.
    pub(crate) async fn wait_for_token_with_context_gated(
        &self,
        ctx: &Context,
        gate: &AtomicBool,
    ) -> Result<(), RateLimitError> {
        self.wait_with_context_gated(ctx, Some(gate)).await
    }

    async fn wait_gated(&self, gate: Option<&AtomicBool>) {
        loop {
            match self.attempt(gate) {
                Attempt::Admitted => return,
                Attempt::Retry(delay) => tokio::time::sleep(delay).await,
            }
        }
    }

    async fn wait_with_context_gated(
        &self,
        ctx: &Context,
        gate: Option<&AtomicBool>,
    ) -> Result<(), RateLimitError> {
        if let Attempt::Admitted = self.attempt(gate) {
            return Ok(());
        }

        if let Some(err) = ctx.err() {
            debug!(error = %err, "Context fired before waiting for a token");
            return Err(err);
        }

        tokio::select! {
            biased;
            err = ctx.done() => {
                debug!(
                    error = %err,
                    requests_per_second = self.requests_per_second,
                    "Gave up waiting for a token"
                );
                Err(err)
            }
            _ = self.wait_gated(gate) => Ok(()),
        }
    }

    fn refill_rate(&self) -> f64 {
        self.requests_per_second as f64
    }

    /// A closed `gate` or a disabled bucket admits without consuming.
    fn attempt(&self, gate: Option<&AtomicBool>) -> Attempt {
        let gate_open = gate.map_or(true, |gate| gate.load(Ordering::Acquire));
        if !gate_open || !self.is_enabled() {
            return Attempt::Admitted;
        }

        let mut state = self.state.lock();
        state.refill(Instant::now(), self.capacity as f64, self.refill_rate());

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            trace!(remaining = state.tokens, "Token acquired");
            Attempt::Admitted
        } else {
            Attempt::Retry(self.retry_after(state.tokens))
        }
    }

    /// How long to sleep before the next attempt.
    fn retry_after(&self, tokens: f64) -> Duration {
        if self.requests_per_second == 0 || self.capacity == 0 {
            return MAX_POLL_INTERVAL;
        }

        let secs = (1.0 - tokens) / self.refill_rate();
        Duration::from_secs_f64(secs).clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
    }
}
