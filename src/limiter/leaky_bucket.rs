//! Token reservoir refilled by a background producer.

use crate::core::{millis, LimiterError};

use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

/// A rate limiter that allows an initial burst followed by a steady drip.
///
/// The bucket starts with `burst` tokens. A background task adds one token
/// every `1 / drip` seconds; a token that does not fit is discarded.
/// Consumers take one token per permitted operation.
///
/// Dropping the bucket stops the producer.
pub struct LeakyBucket {
    tokens: Mutex<mpsc::Receiver<()>>,
    stop: CancellationToken,
    burst: usize,
    drip: f64,
}

impl LeakyBucket {
    /// Creates a bucket holding `burst` tokens, refilled at `drip` tokens
    /// per second.
    ///
    /// Fails with [`LimiterError::InvalidBurst`] when `burst` exceeds
    /// [`Semaphore::MAX_PERMITS`], and with [`LimiterError::InvalidRate`]
    /// when `drip` is not a positive, finite rate.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(burst: usize, drip: f64) -> Result<Self, LimiterError> {
        if burst > Semaphore::MAX_PERMITS {
            return Err(LimiterError::InvalidBurst {
                burst,
                max: Semaphore::MAX_PERMITS,
            });
        }
        let period = drip_period(drip).ok_or(LimiterError::InvalidRate { drip })?;

        let (tx, rx) = mpsc::channel(burst.max(1));
        for _ in 0..burst {
            if tx.try_send(()).is_err() {
                break;
            }
        }

        let stop = CancellationToken::new();
        tokio::spawn(produce(tx, period, stop.clone()));

        tracing::debug!(
            burst,
            drip,
            period_ms = millis(period),
            "Leaky bucket started"
        );

        Ok(Self {
            tokens: Mutex::new(rx),
            stop,
            burst,
            drip,
        })
    }

    /// Waits for a token.
    ///
    /// Returns [`LimiterError::Closed`] once the bucket is closed and every
    /// remaining token has been taken.
    pub async fn acquire(&self) -> Result<(), LimiterError> {
        let mut tokens = self.tokens.lock().await;
        tokens.recv().await.ok_or(LimiterError::Closed)
    }

    /// Takes a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        match self.tokens.try_lock() {
            Ok(mut tokens) => tokens.try_recv().is_ok(),
            Err(_) => false,
        }
    }

    /// Stops producing tokens.
    ///
    /// Tokens already in the bucket can still be acquired.
    pub fn close(&self) {
        self.stop.cancel();
    }

    /// Returns whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Returns the initial token count.
    pub fn burst(&self) -> usize {
        self.burst
    }

    /// Returns the refill rate in tokens per second.
    pub fn drip(&self) -> f64 {
        self.drip
    }
}

impl Drop for LeakyBucket {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl fmt::Debug for LeakyBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeakyBucket")
            .field("burst", &self.burst)
            .field("drip", &self.drip)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Converts a rate to the interval between tokens.
fn drip_period(drip: f64) -> Option<Duration> {
    if !drip.is_finite() || drip <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / drip)
        .ok()
        .filter(|period| !period.is_zero())
}

async fn produce(tx: mpsc::Sender<()>, period: Duration, stop: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }

        match tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => tracing::trace!("Leaky bucket full, token dropped"),
            Err(TrySendError::Closed(())) => break,
        }
    }

    tracing::debug!("Leaky bucket producer stopped");
}
