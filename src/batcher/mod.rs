//! Batching of concurrent calls.
//!
//! A [`Batcher`] turns many concurrent single-item calls into one call that
//! takes a collection, which suits downstream APIs with bulk endpoints or a
//! high per-request cost.
//!
//! ## Lifecycle of a batch
//!
//! - The first call opens a window and starts its flush timer.
//! - Calls made while the window is open join it and wait.
//! - When the timer fires (or [`Batcher::shutdown`] is called) the window
//!   closes, the work function runs once, and every waiting caller gets the
//!   same result.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use resiliency::batcher::Batcher;
//! use std::time::Duration;
//!
//! let batcher = Batcher::new(Duration::from_millis(5), |events: Vec<Event>| async move {
//!     sink.write_all(events).await.map_err(Arc::new)
//! });
//!
//! batcher.run(event).await?;
//! batcher.shutdown(true).await;
//! ```

mod batch;
mod coalescer;

pub use coalescer::Batcher;
