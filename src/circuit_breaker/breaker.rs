//! Circuit breaker implementation.

use crate::circuit_breaker::config::BreakerConfig;
use crate::circuit_breaker::state::{BreakerState, Machine, Outcome, Transition};
use crate::core::{millis, BreakerError, BreakerResult, Panic};

use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// A circuit breaker around arbitrary async work.
///
/// The breaker counts failures of the work it runs and, once too many pile
/// up, rejects further calls for a cooldown period so a struggling
/// dependency gets room to recover.
///
/// # States
///
/// - **Closed**: Normal operation. Work runs, failures are counted.
/// - **Open**: Work is rejected immediately with [`BreakerError::Open`].
///   A background timer moves the circuit to half-open after the timeout.
/// - **Half-Open**: Work runs again. Enough successes close the circuit,
///   a single failure reopens it.
///
/// Cloning a `Breaker` is cheap and yields a handle to the same circuit.
///
/// # Example
///
/// ```rust,ignore
/// use resiliency::circuit_breaker::Breaker;
/// use std::time::Duration;
///
/// let breaker = Breaker::new(3, 1, Duration::from_secs(5));
///
/// match breaker.run(|| client.fetch(id)).await {
///     Ok(body) => handle(body),
///     Err(e) if e.is_open() => serve_cached(id),
///     Err(e) => return Err(e.into()),
/// }
/// ```
#[derive(Clone)]
pub struct Breaker {
    inner: Arc<Inner>,
}

struct Inner {
    config: BreakerConfig,
    machine: RwLock<Machine>,
}

impl Breaker {
    /// Creates a breaker that opens after `error_threshold` failures, closes
    /// after `success_threshold` half-open successes, and stays open for
    /// `timeout`.
    pub fn new(error_threshold: u32, success_threshold: u32, timeout: Duration) -> Self {
        Self::with_config(
            BreakerConfig::new()
                .with_error_threshold(error_threshold)
                .with_success_threshold(success_threshold)
                .with_timeout(timeout),
        )
    }

    /// Creates a breaker from a configuration.
    pub fn with_config(config: BreakerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                machine: RwLock::new(Machine::default()),
            }),
        }
    }

    /// Returns the current state of the circuit.
    pub fn state(&self) -> BreakerState {
        self.inner
            .machine
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .state()
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &BreakerConfig {
        &self.inner.config
    }

    /// Runs `work` unless the circuit is open.
    ///
    /// Returns [`BreakerError::Open`] without calling `work` while the
    /// circuit is open. Otherwise the work's own result is returned, with
    /// its error wrapped in [`BreakerError::Work`].
    ///
    /// If `work` panics, the panic is counted as a failure and then resumed
    /// with its original payload.
    pub async fn run<F, Fut, T, E>(&self, work: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.state().is_open() {
            tracing::debug!("Circuit open, rejecting call");
            return Err(BreakerError::Open);
        }

        let result = AssertUnwindSafe(async move { work().await })
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(value)) => {
                self.record(Outcome::Success);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record(Outcome::Failure);
                Err(BreakerError::Work(e))
            }
            Err(payload) => {
                let panic = Panic::new(payload);
                tracing::warn!(panic = %panic, "Work panicked inside circuit breaker");
                self.record(Outcome::Failure);
                panic.resume()
            }
        }
    }

    /// Runs `work` on a background task unless the circuit is open.
    ///
    /// The open check happens immediately; the returned handle resolves to
    /// the same result [`run`](Self::run) would produce. A panic in `work`
    /// surfaces as a panicked [`JoinHandle`].
    pub fn spawn<F, Fut, T, E>(
        &self,
        work: F,
    ) -> BreakerResult<JoinHandle<BreakerResult<T, E>>, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        if self.state().is_open() {
            tracing::debug!("Circuit open, rejecting spawned call");
            return Err(BreakerError::Open);
        }

        let breaker = self.clone();
        Ok(tokio::spawn(async move { breaker.run(work).await }))
    }

    fn record(&self, outcome: Outcome) {
        let (transition, state) = {
            let mut machine = self
                .inner
                .machine
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let transition = machine.record(outcome, &self.inner.config);
            (transition, machine.state())
        };

        match transition {
            Transition::Opened { generation } => {
                tracing::warn!(
                    timeout_ms = millis(self.inner.config.timeout),
                    "Circuit breaker opened"
                );
                schedule_reset(Arc::downgrade(&self.inner), generation);
            }
            Transition::Closed => {
                tracing::info!("Circuit breaker closed");
            }
            Transition::HalfOpened | Transition::Stay => {
                tracing::trace!(state = state.name(), outcome = ?outcome, "Recorded outcome");
            }
        }
    }
}

/// Moves the circuit to half-open once the timeout elapses, unless the
/// opening identified by `generation` has since been superseded.
fn schedule_reset(inner: Weak<Inner>, generation: u64) {
    let Some(timeout) = inner.upgrade().map(|inner| inner.config.timeout) else {
        return;
    };

    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;

        let Some(inner) = inner.upgrade() else {
            return;
        };
        let transition = inner
            .machine
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .expire(generation);

        if transition == Transition::HalfOpened {
            tracing::info!("Circuit breaker half-open, allowing probes");
        }
    });
}

impl fmt::Debug for Breaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breaker")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::oneshot;

    #[derive(Debug, PartialEq)]
    struct SomeError;

    async fn returns_error() -> Result<(), SomeError> {
        Err(SomeError)
    }

    async fn returns_success() -> Result<(), SomeError> {
        Ok(())
    }

    #[tokio::test]
    async fn test_breaker_passes_through() {
        let breaker = Breaker::new(3, 1, Duration::from_secs(1));

        let value = breaker.run(|| async { Ok::<_, SomeError>(42) }).await;
        assert_eq!(value.unwrap(), 42);

        let err = breaker.run(returns_error).await.unwrap_err();
        assert_eq!(err.into_work(), Some(SomeError));
        assert!(breaker.state().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_does_not_run_work() {
        let breaker = Breaker::new(2, 1, Duration::from_secs(1));
        let calls = AtomicU32::new(0);

        for _ in 0..10 {
            let _ = breaker
                .run(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(SomeError)
                })
                .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(breaker.state().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_state_transitions() {
        let breaker = Breaker::new(3, 2, Duration::from_secs(1));

        // three errors opens the breaker
        for _ in 0..3 {
            let err = breaker.run(returns_error).await.unwrap_err();
            assert_eq!(err.work(), Some(&SomeError));
        }

        for _ in 0..5 {
            assert!(breaker.run(returns_error).await.unwrap_err().is_open());
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(breaker.state().is_half_open());

        // one success is not enough to close, one error reopens
        assert!(breaker.run(returns_success).await.is_ok());
        let err = breaker.run(returns_error).await.unwrap_err();
        assert!(!err.is_open());
        assert!(breaker.run(returns_error).await.unwrap_err().is_open());

        tokio::time::sleep(Duration::from_secs(2)).await;
        for _ in 0..2 {
            assert!(breaker.run(returns_success).await.is_ok());
        }
        assert!(breaker.state().is_closed());

        // closed again: a single error passes through
        assert!(!breaker.run(returns_error).await.unwrap_err().is_open());
        assert!(breaker.run(returns_success).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_stays_open_until_timeout() {
        let breaker = Breaker::new(1, 1, Duration::from_secs(10));
        let _ = breaker.run(returns_error).await;

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(breaker.run(returns_success).await.unwrap_err().is_open());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(breaker.run(returns_success).await.is_ok());
        assert!(breaker.state().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_while_open_is_ignored() {
        let breaker = Breaker::new(1, 1, Duration::from_secs(1));
        let (release, released) = oneshot::channel::<()>();

        let slow = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .run(|| async move {
                        let _ = released.await;
                        Err::<(), _>(SomeError)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let _ = breaker.run(returns_error).await;
        assert!(breaker.state().is_open());

        release.send(()).unwrap();
        let late = slow.await.unwrap().unwrap_err();
        assert_eq!(late.into_work(), Some(SomeError));
        assert!(breaker.state().is_open());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(breaker.state().is_half_open());
    }

    #[tokio::test]
    async fn test_panic_is_recorded_and_resumed() {
        let breaker = Breaker::new(1, 1, Duration::from_secs(60));

        let caught = AssertUnwindSafe(breaker.run(|| async {
            if true {
                panic!("work exploded");
            }
            Ok::<(), SomeError>(())
        }))
        .catch_unwind()
        .await;

        let payload = caught.unwrap_err();
        assert_eq!(Panic::new(payload).message(), Some("work exploded"));
        assert!(breaker.state().is_open());
    }

    #[tokio::test]
    async fn test_spawn_rejects_when_open() {
        let breaker = Breaker::new(1, 1, Duration::from_secs(60));

        let handle = breaker.spawn(returns_error).unwrap();
        assert!(!handle.await.unwrap().unwrap_err().is_open());

        assert!(breaker.spawn(returns_success).unwrap_err().is_open());
    }
}
