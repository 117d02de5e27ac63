//! Error type for pacing primitives

use thiserror::Error;

/// Errors raised while constructing throttles or backoff policies
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// A bandwidth value that cannot be expressed as a token bucket
    #[error("invalid throttle rate: {0}")]
    InvalidRate(String),

    /// A backoff policy with inconsistent bounds
    #[error("invalid backoff policy: {0}")]
    InvalidBackoff(String),
}
