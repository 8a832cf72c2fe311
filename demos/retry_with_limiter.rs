//! Retry example with a rate limiter in front of the upstream.
//!
//! This example shows how to:
//! - Build a backoff schedule with jitter
//! - Retry only transient errors with a whitelist classifier
//! - Let the upstream request a specific backoff
//! - Throttle every attempt through a leaky bucket
//!
//! Run with: cargo run --example retry_with_limiter

use resiliency::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
enum FetchError {
    #[error("connection timed out")]
    Timeout,
    #[error("not found")]
    NotFound,
}

#[derive(Debug, thiserror::Error)]
enum UpstreamError {
    #[error("fetch failed: {0}")]
    Fetch(#[source] FetchError),
    #[error("throttled by upstream: {0}")]
    Throttled(#[source] WithBackoff),
    #[error(transparent)]
    Limiter(#[from] LimiterError),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("=== Retry With Limiter Example ===\n");

    // Two requests straight away, then four per second.
    let bucket = LeakyBucket::new(2, 4.0)?;

    let retrier = Retrier::new(
        limited_exponential_backoff(6, Duration::from_millis(50), Duration::from_millis(400)),
        Some(Arc::new(WhitelistClassifier::new([FetchError::Timeout]))),
    )
    .with_jitter(0.2);

    println!("Backoff schedule: {:?}\n", retrier.backoff());

    let token = CancellationToken::new();
    let calls = AtomicU32::new(0);

    let result = retrier
        .run_fn(&token, |_token, attempt| {
            let bucket = &bucket;
            let calls = &calls;
            async move {
                bucket.acquire().await?;
                println!("Attempt {attempt}");
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(UpstreamError::Fetch(FetchError::Timeout)),
                    // The upstream asks for a longer pause before the next try.
                    2 => Err(UpstreamError::Throttled(WithBackoff::new(
                        FetchError::Timeout,
                        Duration::from_millis(300),
                    ))),
                    _ => Ok("payload"),
                }
            }
        })
        .await;

    match result {
        Ok(body) => println!("\nFetched: {body}"),
        Err(e) => println!("\nGave up: {e}"),
    }

    // A permanent error is not retried.
    let result = retrier
        .run(|| async { Err::<(), _>(FetchError::NotFound) })
        .await;
    println!("Permanent error after one attempt: {:?}", result);

    bucket.close();
    Ok(())
}
