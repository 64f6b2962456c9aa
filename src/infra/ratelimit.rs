//! Per-client token-bucket rate limiter
//!
//! Each client key owns a bucket with a burst capacity and a sustained
//! refill rate, refilled in whole ticks. The client key is taken from the
//! first `X-Forwarded-For` value, then `X-Real-Ip`, then a non-cryptographic
//! fingerprint of `User-Agent` + `Accept-Language` so anonymous clients
//! still share a bucket.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;

/// Default burst capacity
pub const DEFAULT_BURST: u32 = 100;

/// Default sustained refill, tokens per tick
pub const DEFAULT_PER_SECOND: u32 = 10;

/// Refill tick
const TICK: Duration = Duration::from_secs(1);

/// Buckets idle longer than this are dropped
const IDLE_EXPIRY: Duration = Duration::from_secs(3600);

/// Sweep cadence for idle buckets
const SWEEP_INTERVAL: Duration = Duration::from_secs(600);

struct Bucket {
    tokens: u32,
    last_refill: Instant,
    last_seen: Instant,
}

struct Buckets {
    map: HashMap<String, Bucket>,
    last_sweep: Instant,
}

/// Token-bucket rate limiter keyed by client identity.
pub struct RateLimiter {
    capacity: u32,
    refill_per_tick: u32,
    buckets: Mutex<Buckets>,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_tick: u32) -> Self {
        Self {
            capacity: capacity.max(1),
            refill_per_tick: refill_per_tick.max(1),
            buckets: Mutex::new(Buckets {
                map: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Check whether a request from `key` is admitted right now.
    ///
    /// On rejection returns the whole seconds until the next token arrives,
    /// suitable for a `Retry-After` header.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        self.check_at(key, Instant::now())
    }

    /// `check` with an injected clock, the testability seam.
    pub fn check_at(&self, key: &str, now: Instant) -> Result<(), u64> {
        let mut buckets = self.buckets.lock().unwrap();

        if now.duration_since(buckets.last_sweep) >= SWEEP_INTERVAL {
            buckets
                .map
                .retain(|_, bucket| now.duration_since(bucket.last_seen) < IDLE_EXPIRY);
            buckets.last_sweep = now;
        }

        let capacity = self.capacity;
        let bucket = buckets.map.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        });
        bucket.last_seen = now;

        // Refill in whole elapsed ticks
        let elapsed_ticks = (now.duration_since(bucket.last_refill).as_millis()
            / TICK.as_millis()) as u32;
        if elapsed_ticks > 0 {
            bucket.tokens = bucket
                .tokens
                .saturating_add(elapsed_ticks.saturating_mul(self.refill_per_tick))
                .min(self.capacity);
            bucket.last_refill += TICK * elapsed_ticks;
        }

        if bucket.tokens == 0 {
            let until_next_tick = TICK
                .checked_sub(now.duration_since(bucket.last_refill))
                .unwrap_or(TICK);
            return Err(until_next_tick.as_secs().max(1));
        }

        bucket.tokens -= 1;
        Ok(())
    }

    /// Number of live buckets; diagnostics only.
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().unwrap().map.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_BURST, DEFAULT_PER_SECOND)
    }
}

/// Derive the rate-limit key for a request.
pub fn client_key(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    // Anonymous clients share a fingerprint bucket; collision resistance is
    // not a goal here
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let accept_language = headers
        .get("accept-language")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_agent.hash(&mut hasher);
    accept_language.hash(&mut hasher);
    format!("anon:{:016x}", hasher.finish())
}

// ============================================================================
// Tests
// ============================================================================
