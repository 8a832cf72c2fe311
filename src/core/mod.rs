//! Types shared by every component of the resiliency library.
//!
//! - [`error`] - Structured error types and the error-chain helper

pub mod error;

pub use error::{
    error_chain, BatchError, BatchResult, BoxError, BreakerError, BreakerResult, LimiterError,
    Panic, RetryError, RetryResult, WithBackoff,
};

use std::time::Duration;

/// Milliseconds in `duration` as a log field, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
