//! Per-provider token buckets.
//!
//! Refill is lazy: every acquire attempt tops the bucket up by
//! `elapsed * refill_per_sec` (capped at `max_tokens`) before checking it.
//! A caller that finds the bucket empty sleeps `1 / refill_per_sec` (at most
//! [`MAX_POLL_INTERVAL`]) and checks again. Waiters are not queued, so there is no FIFO ordering.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RateLimitSettings;
use crate::provider::ProviderId;

/// Longest sleep between checks of an empty bucket.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    name: String,
    max_tokens: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// A full bucket. `refill_per_sec` must be positive.
    pub fn new(name: impl Into<String>, max_tokens: u32, refill_per_sec: f64) -> Self {
        let name = name.into();
        debug!(
            bucket = %name,
            max_tokens,
            refill_per_sec,
            "Token bucket created"
        );
        Self {
            name,
            max_tokens: f64::from(max_tokens),
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: f64::from(max_tokens),
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        state.last_refill = now;
    }

    /// Take one token if available, without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Suspend until a token is available, then consume it.
    pub async fn acquire(&self) {
        let started = Instant::now();
        let mut waited = false;

        loop {
            if self.try_acquire() {
                if waited {
                    info!(
                        bucket = %self.name,
                        wait_ms = started.elapsed().as_millis() as u64,
                        "Rate limit wait completed"
                    );
                }
                return;
            }

            if !waited {
                warn!(
                    bucket = %self.name,
                    available = self.available(),
                    "Rate limited, waiting for tokens"
                );
                waited = true;
            }

            tokio::time::sleep(self.poll_interval()).await;
        }
    }

    /// Return one token, capped at capacity.
    pub fn refund(&self) {
        let mut state = self.state.lock();
        state.tokens = (state.tokens + 1.0).min(self.max_tokens);
        debug!(bucket = %self.name, tokens = state.tokens, "Token refunded");
    }

    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    pub fn max_tokens(&self) -> f64 {
        self.max_tokens
    }

    /// `1 / refill_per_sec`, capped at [`MAX_POLL_INTERVAL`].
    fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.refill_per_sec)
            .map_or(MAX_POLL_INTERVAL, |interval| interval.min(MAX_POLL_INTERVAL))
    }
}

/// One independent bucket per provider, created eagerly.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: HashMap<ProviderId, TokenBucket>,
}

impl RateLimiter {
    pub fn new(settings: impl IntoIterator<Item = (ProviderId, RateLimitSettings)>) -> Self {
        let buckets = settings
            .into_iter()
            .map(|(id, limits)| {
                let bucket = TokenBucket::new(id.as_str(), limits.max_tokens, limits.refill_per_sec);
                (id, bucket)
            })
            .collect();
        Self { buckets }
    }

    pub fn bucket(&self, provider: ProviderId) -> Option<&TokenBucket> {
        self.buckets.get(&provider)
    }

    /// Wait for a token on `provider`'s bucket. Providers without a bucket are unthrottled.
    pub async fn acquire(&self, provider: ProviderId) {
        if let Some(bucket) = self.buckets.get(&provider) {
            bucket.acquire().await;
        }
    }

    pub fn refund(&self, provider: ProviderId) {
        if let Some(bucket) = self.buckets.get(&provider) {
            bucket.refund();
        }
    }
}
