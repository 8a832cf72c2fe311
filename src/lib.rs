//! # Resiliency
//!
//! Resiliency patterns for async Rust services: circuit breaking, batching,
//! rate limiting and retrying.
//!
//! ## Overview
//!
//! Each pattern is a small, independent component that wraps a unit of
//! work, usually a future that talks to something unreliable:
//!
//! - [`Breaker`] stops calling a dependency after repeated failures and
//!   probes it again after a cooldown
//! - [`Batcher`] coalesces concurrent single-item calls into one bulk call
//! - [`LeakyBucket`] hands out permits at a bounded rate after an initial burst
//! - [`Retrier`] repeats failed work with backoff, jitter and cancellation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use resiliency::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let breaker = Breaker::new(3, 1, Duration::from_secs(10));
//!     let retrier = Retrier::new(exponential_backoff(3, Duration::from_millis(100)), None);
//!
//!     let body = retrier
//!         .run(|| breaker.run(|| fetch("https://example.com")))
//!         .await?;
//!
//!     println!("{body}");
//!     Ok(())
//! }
//! ```
//!
//! ## Runtime
//!
//! Components that own timers or background tasks spawn them on Tokio, so
//! they must be created and used inside a Tokio runtime.
//!
//! ## Architecture
//!
//! - **Core**: Error types shared by every component
//! - **Circuit Breaker**: Closed / open / half-open state machine
//! - **Batcher**: Time-windowed call coalescing
//! - **Limiter**: Leaky-bucket token producer
//! - **Retrier**: Backoff schedules, classifiers and the retry loop

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod batcher;
pub mod circuit_breaker;
pub mod core;
pub mod limiter;
pub mod retrier;

// Re-export commonly used types at the crate root
pub use crate::core::{
    BatchError, BatchResult, BoxError, BreakerError, BreakerResult, LimiterError, Panic,
    RetryError, RetryResult, WithBackoff,
};

pub use crate::batcher::Batcher;
pub use crate::circuit_breaker::{Breaker, BreakerConfig, BreakerState};
pub use crate::limiter::LeakyBucket;
pub use crate::retrier::{Classification, Classifier, Retrier};

/// Prelude module for convenient imports.
///
/// ```rust
/// use resiliency::prelude::*;
/// ```
pub mod prelude {
    pub use crate::batcher::Batcher;
    pub use crate::circuit_breaker::{Breaker, BreakerConfig, BreakerState};
    pub use crate::core::{BatchError, BreakerError, LimiterError, RetryError, WithBackoff};
    pub use crate::limiter::LeakyBucket;
    pub use crate::retrier::{
        constant_backoff, exponential_backoff, limited_exponential_backoff, BlacklistClassifier,
        Classification, Classifier, DefaultClassifier, Retrier, WhitelistClassifier,
    };
}
