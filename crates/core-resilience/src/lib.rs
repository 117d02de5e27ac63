//! Shardline Core Resilience: pure-logic pacing primitives
//!
//! # Overview
//!
//! - **Throttle**: a shared token bucket metering bytes per second across
//!   any number of concurrent workers
//! - **Backoff**: bounded exponential retry delays with jitter
//!
//! This crate knows nothing about HTTP, files or jobs. The transfer engine
//! composes these pieces around its own I/O.
//!
//! ```text
//!   worker ─┐
//!   worker ─┼──► Throttle::acquire(bytes) ──► wire
//!   worker ─┘
//!      │ on retryable failure
//!      ▼
//!   Backoff::wait(attempt) ──► next attempt
//! ```

pub mod backoff;
pub mod error;
pub mod throttle;

pub use backoff::Backoff;
pub use error::ResilienceError;
pub use throttle::Throttle;
