//! Backoff schedule generators.
//!
//! A schedule is a plain `Vec<Duration>`: its length is the number of
//! retries, and entry `i` is the wait before retry `i + 1`.

use std::time::Duration;

/// Retries `n` times, waiting `amount` before each retry.
pub fn constant_backoff(n: usize, amount: Duration) -> Vec<Duration> {
    vec![amount; n]
}

/// Retries `n` times, doubling the wait each time starting from `initial`.
///
/// Doubling saturates at [`Duration::MAX`].
pub fn exponential_backoff(n: usize, initial: Duration) -> Vec<Duration> {
    std::iter::successors(Some(initial), |d| Some(d.saturating_mul(2)))
        .take(n)
        .collect()
}

/// Like [`exponential_backoff`], but once the wait reaches `limit` every
/// remaining entry is `limit`.
pub fn limited_exponential_backoff(n: usize, initial: Duration, limit: Duration) -> Vec<Duration> {
    let mut next = initial;
    (0..n)
        .map(|_| {
            if next < limit {
                let current = next;
                next = next.saturating_mul(2);
                current
            } else {
                limit
            }
        })
        .collect()
}
