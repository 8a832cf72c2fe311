//! Retrying failed work with backoff.
//!
//! A [`Retrier`] calls work again after a failure, waiting between attempts
//! according to a backoff schedule. A [`Classifier`] decides which outcomes
//! are worth another attempt.
//!
//! ## Schedules
//!
//! - [`constant_backoff`] - the same wait before every retry
//! - [`exponential_backoff`] - doubling waits
//! - [`limited_exponential_backoff`] - doubling waits up to a ceiling
//!
//! Work can ask for a specific wait before the next attempt by returning an
//! error wrapped in [`WithBackoff`](crate::core::WithBackoff).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use resiliency::retrier::{exponential_backoff, Retrier, WhitelistClassifier};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let retrier = Retrier::new(
//!     exponential_backoff(5, Duration::from_millis(20)),
//!     Some(Arc::new(WhitelistClassifier::new([FetchError::Timeout]))),
//! )
//! .with_jitter(0.25);
//!
//! let token = CancellationToken::new();
//! let page = retrier.run_with_cancel(&token, |token| fetch(token, url)).await?;
//! ```

mod backoff;
mod classifier;
mod executor;

pub use backoff::{constant_backoff, exponential_backoff, limited_exponential_backoff};
pub use classifier::{
    AsDynError, BlacklistClassifier, Boxed, Classification, Classifier, Concrete,
    DefaultClassifier, WhitelistClassifier,
};
pub use executor::Retrier;
