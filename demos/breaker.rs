//! Circuit breaker example.
//!
//! This example shows how to:
//! - Configure error and success thresholds
//! - Watch the breaker open after repeated failures
//! - Let it probe the dependency again after the cooldown
//!
//! Run with: cargo run --example breaker

use resiliency::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[error("upstream returned 503")]
struct Unavailable;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("=== Circuit Breaker Example ===\n");

    let config = BreakerConfig::default()
        .with_error_threshold(3)
        .with_success_threshold(2)
        .with_timeout(Duration::from_millis(500));

    println!("Error threshold:   {}", config.error_threshold);
    println!("Success threshold: {}", config.success_threshold);
    println!("Timeout:           {:?}\n", config.timeout);

    let breaker = Breaker::with_config(config);

    // The upstream fails for its first five calls, then recovers.
    let calls = &AtomicU32::new(0);
    let upstream = || async move {
        if calls.fetch_add(1, Ordering::SeqCst) < 5 {
            Err(Unavailable)
        } else {
            Ok("200 OK")
        }
    };

    for i in 1..=6 {
        match breaker.run(upstream).await {
            Ok(body) => println!("Request #{i}: {body}"),
            Err(BreakerError::Open) => println!("Request #{i}: rejected, breaker is open"),
            Err(BreakerError::Work(e)) => println!("Request #{i}: failed: {e}"),
        }
        println!("  state = {}", breaker.state().name());
    }

    println!("\nWaiting for the breaker to half-open...\n");
    tokio::time::sleep(Duration::from_millis(600)).await;

    for i in 7..=10 {
        match breaker.run(upstream).await {
            Ok(body) => println!("Request #{i}: {body}"),
            Err(BreakerError::Open) => println!("Request #{i}: rejected, breaker is open"),
            Err(BreakerError::Work(e)) => println!("Request #{i}: failed: {e}"),
        }
        println!("  state = {}", breaker.state().name());
    }

    Ok(())
}
