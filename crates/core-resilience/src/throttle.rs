//! Global byte throttle built on a token bucket
//!
//! A single [`Throttle`] is shared by every worker so the aggregate transfer
//! rate stays under the configured cap no matter how many workers run.
//!
//! # Example
//!
//! ```no_run
//! use shardline_core_resilience::Throttle;
//!
//! # async fn example() {
//! // 8 MiB/s shared by all clones
//! let throttle = Throttle::new(8 * 1024 * 1024);
//! let worker = throttle.clone();
//!
//! worker.acquire(5 * 1024 * 1024).await;
//! # }
//! ```

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::error::ResilienceError;

/// Upper bound on bucket granularity
const MAX_TOKENS_PER_SEC: u64 = 1000;

/// Fraction of one second of refill the bucket may hold at rest
const BURST_DIVISOR: u64 = 10;

type DirectLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

struct Bucket {
    limiter: DirectLimiter,
    rate_bps: u64,
    bytes_per_token: u64,
    burst: NonZeroU32,
    granted: AtomicU64,
}

/// Shared token bucket metering bytes per second
///
/// Cloning is cheap and every clone debits the same bucket. A rate of `0`
/// disables throttling entirely.
#[derive(Clone)]
pub struct Throttle {
    bucket: Option<Arc<Bucket>>,
}

impl Throttle {
    /// Create a throttle releasing at most `bytes_per_sec` bytes per second
    ///
    /// `0` means unlimited.
    pub fn new(bytes_per_sec: u64) -> Self {
        match Self::try_new(bytes_per_sec) {
            Ok(throttle) => throttle,
            // try_new only rejects rates that cannot occur once clamped below
            Err(_) => Self::unlimited(),
        }
    }

    /// Create a throttle, reporting rates that cannot be represented
    pub fn try_new(bytes_per_sec: u64) -> Result<Self, ResilienceError> {
        if bytes_per_sec == 0 {
            return Ok(Self::unlimited());
        }

        // Keep tokens_per_sec * bytes_per_token <= bytes_per_sec so rounding
        // can only ever slow the bucket down.
        let tokens_per_sec = bytes_per_sec.min(MAX_TOKENS_PER_SEC);
        let bytes_per_token = bytes_per_sec / tokens_per_sec;
        let burst_tokens = (tokens_per_sec / BURST_DIVISOR).max(1);

        let rate = NonZeroU32::new(tokens_per_sec as u32)
            .ok_or_else(|| ResilienceError::InvalidRate(format!("{} B/s", bytes_per_sec)))?;
        let burst = NonZeroU32::new(burst_tokens as u32)
            .ok_or_else(|| ResilienceError::InvalidRate(format!("{} B/s", bytes_per_sec)))?;

        let quota = Quota::per_second(rate).allow_burst(burst);

        tracing::debug!(
            rate_bps = bytes_per_sec,
            tokens_per_sec,
            bytes_per_token,
            burst_tokens,
            "throttle configured"
        );

        Ok(Self {
            bucket: Some(Arc::new(Bucket {
                limiter: GovernorRateLimiter::direct(quota),
                rate_bps: bytes_per_sec,
                bytes_per_token,
                burst,
                granted: AtomicU64::new(0),
            })),
        })
    }

    /// A throttle that never delays
    pub fn unlimited() -> Self {
        Self { bucket: None }
    }

    /// Suspend until `bytes` may cross the wire, then debit the bucket
    ///
    /// Never fails. Requests larger than the bucket's burst are debited in
    /// burst-sized slices and simply take several refill periods.
    pub async fn acquire(&self, bytes: u64) {
        let Some(bucket) = self.bucket.as_ref() else {
            return;
        };
        if bytes == 0 {
            return;
        }

        let mut tokens = bytes.div_ceil(bucket.bytes_per_token);
        let burst = u64::from(bucket.burst.get());

        while tokens > 0 {
            let slice = tokens.min(burst);
            if let Some(n) = NonZeroU32::new(slice as u32) {
                if let Err(e) = bucket.limiter.until_n_ready(n).await {
                    // slices never exceed the burst, so this is unreachable
                    tracing::error!("throttle slice rejected: {}", e);
                }
            }
            tokens -= slice;
        }

        bucket.granted.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Whether any limit is applied
    pub fn is_enabled(&self) -> bool {
        self.bucket.is_some()
    }

    /// Configured cap in bytes per second (`0` when unlimited)
    pub fn rate_bps(&self) -> u64 {
        self.bucket.as_ref().map(|b| b.rate_bps).unwrap_or(0)
    }

    /// Largest number of bytes the bucket can release without waiting
    pub fn burst_bytes(&self) -> u64 {
        self.bucket
            .as_ref()
            .map(|b| u64::from(b.burst.get()) * b.bytes_per_token)
            .unwrap_or(u64::MAX)
    }

    /// Total bytes released through this bucket so far
    pub fn granted_bytes(&self) -> u64 {
        self.bucket
            .as_ref()
            .map(|b| b.granted.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl fmt::Debug for Throttle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bucket {
            Some(b) => f
                .debug_struct("Throttle")
                .field("rate_bps", &b.rate_bps)
                .field("bytes_per_token", &b.bytes_per_token)
                .field("burst", &b.burst)
                .finish(),
            None => f.write_str("Throttle(unlimited)"),
        }
    }
}
