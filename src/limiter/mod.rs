//! Leaky-bucket rate limiting.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use resiliency::limiter::LeakyBucket;
//!
//! // Ten requests straight away, then five per second.
//! let bucket = LeakyBucket::new(10, 5.0)?;
//!
//! for request in requests {
//!     bucket.acquire().await?;
//!     client.send(request).await?;
//! }
//! ```

mod leaky_bucket;

pub use leaky_bucket::LeakyBucket;
