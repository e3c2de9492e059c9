//! Per-caller, per-endpoint token buckets.
//!
//! Each bucket is a single `AtomicU64` holding the token count (low 24 bits)
//! and the last refill stamp (high 40 bits, milliseconds since the limiter
//! was created). Acquisition is an optimistic compare-and-swap loop over that
//! word, so concurrent callers never share a lock and the last token can be
//! taken only once.
//!
//! Refill is continuous: every attempt first credits
//! `elapsed_ms * requests_per_minute / 60000` whole tokens, capped at the
//! burst ceiling. The stamp only advances by the time actually converted into
//! tokens, so fractional progress carries over to the next attempt.

use crate::domain::config::{EndpointLimit, RateLimitConfig};
use crate::ports::outbound::TimeSource;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const TOKEN_BITS: u32 = 24;
const TOKEN_MASK: u64 = (1 << TOKEN_BITS) - 1;
const MS_PER_MINUTE: u64 = 60_000;

fn pack(tokens: u64, stamp: u64) -> u64 {
    (stamp << TOKEN_BITS) | (tokens & TOKEN_MASK)
}

fn unpack(word: u64) -> (u64, u64) {
    (word & TOKEN_MASK, word >> TOKEN_BITS)
}

/// Result of one acquisition attempt. Denial is a normal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Tokens left after this attempt
    pub remaining: u32,
    /// Zero when allowed, at least one when denied
    pub retry_after_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    caller: String,
    endpoint: String,
}

struct Bucket {
    state: AtomicU64,
    last_access: AtomicU64,
    limit: EndpointLimit,
}

impl Bucket {
    fn new(limit: EndpointLimit, now: u64) -> Self {
        Self {
            state: AtomicU64::new(pack(limit.burst_size as u64, now)),
            last_access: AtomicU64::new(now),
            limit,
        }
    }

    /// Tokens and stamp after crediting refill up to `now`.
    fn refilled(&self, word: u64, now: u64) -> (u64, u64) {
        let (tokens, stamp) = unpack(word);
        let rate = self.limit.requests_per_minute as u64;
        let burst = self.limit.burst_size as u64;

        let elapsed = now.saturating_sub(stamp);
        let added = elapsed.saturating_mul(rate) / MS_PER_MINUTE;
        if added == 0 {
            return (tokens.min(burst), stamp);
        }

        let tokens = tokens.saturating_add(added).min(burst);
        if tokens == burst {
            (tokens, now)
        } else {
            (tokens, stamp + (added * MS_PER_MINUTE).div_ceil(rate))
        }
    }

    fn try_acquire(&self, now: u64) -> RateLimitDecision {
        self.last_access.fetch_max(now, Ordering::Relaxed);
        let rate = self.limit.requests_per_minute as u64;

        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let (tokens, stamp) = self.refilled(current, now);

            if tokens == 0 {
                // (1 - tokens) * 60 / rate, rounded up
                let retry_after_secs = 60u64.div_ceil(rate).max(1);
                return RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    retry_after_secs,
                };
            }

            let next = pack(tokens - 1, stamp);
            match self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    return RateLimitDecision {
                        allowed: true,
                        remaining: (tokens - 1) as u32,
                        retry_after_secs: 0,
                    }
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn available(&self, now: u64) -> u32 {
        self.refilled(self.state.load(Ordering::Acquire), now).0 as u32
    }
}

/// Token-bucket rate limiter keyed by (caller, endpoint).
pub struct RateLimiter {
    buckets: DashMap<BucketKey, Bucket>,
    config: RateLimitConfig,
    clock: Arc<dyn TimeSource>,
    /// Wall-clock origin of bucket stamps
    epoch_ms: u64,
    last_sweep: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn TimeSource>) -> Self {
        let epoch_ms = clock.now_millis();
        Self {
            buckets: DashMap::new(),
            config,
            clock,
            epoch_ms,
            last_sweep: AtomicU64::new(0),
        }
    }

    fn now(&self) -> u64 {
        self.clock.now_millis().saturating_sub(self.epoch_ms)
    }

    /// Take one token for `caller` on `endpoint`.
    pub fn try_acquire(&self, caller: &str, endpoint: &str) -> RateLimitDecision {
        let limit = self.config.limits_for(endpoint);
        if !self.config.enabled {
            return RateLimitDecision {
                allowed: true,
                remaining: limit.burst_size,
                retry_after_secs: 0,
            };
        }

        let now = self.now();
        self.maybe_sweep(now);

        let key = BucketKey {
            caller: caller.to_string(),
            endpoint: endpoint.to_string(),
        };

        let decision = match self.buckets.get(&key) {
            Some(bucket) => bucket.try_acquire(now),
            None => self
                .buckets
                .entry(key)
                .or_insert_with(|| Bucket::new(limit, now))
                .downgrade()
                .try_acquire(now),
        };

        if !decision.allowed {
            debug!(
                caller,
                endpoint,
                retry_after_secs = decision.retry_after_secs,
                "Rate limit denied"
            );
        }
        decision
    }

    /// Tokens currently available without consuming one.
    pub fn remaining(&self, caller: &str, endpoint: &str) -> u32 {
        let key = BucketKey {
            caller: caller.to_string(),
            endpoint: endpoint.to_string(),
        };
        match self.buckets.get(&key) {
            Some(bucket) => bucket.available(self.now()),
            None => self.config.limits_for(endpoint).burst_size,
        }
    }

    /// Forget every bucket belonging to `caller`.
    pub fn reset(&self, caller: &str) {
        self.buckets.retain(|k, _| k.caller != caller);
    }

    /// Drop buckets idle for at least `bucket_expiry`. Returns how many went.
    pub fn sweep(&self) -> usize {
        self.sweep_at(self.now())
    }

    fn sweep_at(&self, now: u64) -> usize {
        let expiry = self.config.bucket_expiry.as_millis() as u64;
        let before = self.buckets.len();
        self.buckets
            .retain(|_, b| now.saturating_sub(b.last_access.load(Ordering::Relaxed)) < expiry);
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            debug!(removed, remaining = self.buckets.len(), "Swept idle rate limit buckets");
        }
        removed
    }

    /// Sweep on access, at most once per `cleanup_interval`.
    fn maybe_sweep(&self, now: u64) {
        let interval = self.config.cleanup_interval.as_millis() as u64;
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now.saturating_sub(last) < interval {
            return;
        }
        if self
            .last_sweep
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.sweep_at(now);
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

/// Background task to sweep idle buckets
pub async fn cleanup_task(limiter: Arc<RateLimiter>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        limiter.sweep();
    }
}
