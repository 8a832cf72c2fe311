//! The retrier.

use crate::core::{error_chain, millis, RetryError, RetryResult, WithBackoff};
use crate::retrier::classifier::{AsDynError, Classification, Classifier, DefaultClassifier};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runs work again when it fails, following a backoff schedule.
///
/// The length of the schedule is the number of retries; entry `i` is how
/// long to wait before retry `i + 1`. A [`Classifier`] decides after every
/// attempt whether to return the result or try again.
///
/// # Example
///
/// ```rust,ignore
/// use resiliency::retrier::{exponential_backoff, Retrier};
/// use std::time::Duration;
///
/// let retrier = Retrier::new(exponential_backoff(4, Duration::from_millis(50)), None)
///     .with_jitter(0.2);
///
/// let body = retrier.run(|| client.get(url)).await?;
/// ```
pub struct Retrier {
    backoff: Vec<Duration>,
    classifier: Arc<dyn Classifier>,
    jitter: f64,
    infinite: bool,
    surface_work_errors: bool,
    rng: Mutex<StdRng>,
}

/// How the retry loop ended.
enum Exit<T, E> {
    /// The classifier accepted the result, or retries ran out.
    Finished(Result<T, E>),
    /// The token fired during a backoff; `last` is the latest work result.
    Cancelled { last: Result<T, E> },
}

enum Pause {
    Elapsed,
    Cancelled,
}

impl Retrier {
    /// Creates a retrier with the given schedule and classifier.
    ///
    /// [`DefaultClassifier`] is used when `classifier` is `None`.
    pub fn new(backoff: Vec<Duration>, classifier: Option<Arc<dyn Classifier>>) -> Self {
        Self {
            backoff,
            classifier: classifier.unwrap_or_else(|| Arc::new(DefaultClassifier)),
            jitter: 0.0,
            infinite: false,
            surface_work_errors: false,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Sets the jitter fraction applied to scheduled waits.
    ///
    /// Each wait becomes `base * (1 + x)` for `x` drawn uniformly from
    /// `[-jitter, jitter]`. Values outside `[0, 1]` are ignored.
    pub fn set_jitter(&mut self, jitter: f64) {
        if (0.0..=1.0).contains(&jitter) {
            self.jitter = jitter;
        }
    }

    /// Builder form of [`set_jitter`](Self::set_jitter).
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.set_jitter(jitter);
        self
    }

    /// Retries forever on [`Classification::Retry`].
    ///
    /// Once past the end of the schedule, the last entry is reused.
    pub fn with_infinite_retry(mut self) -> Self {
        self.infinite = true;
        self
    }

    /// On cancellation, return the last work result instead of
    /// [`RetryError::Cancelled`].
    pub fn with_surface_work_errors(mut self) -> Self {
        self.surface_work_errors = true;
        self
    }

    /// Returns the backoff schedule.
    pub fn backoff(&self) -> &[Duration] {
        &self.backoff
    }

    /// Returns the jitter fraction.
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Runs `work` until the classifier accepts its result or retries run out.
    ///
    /// Whatever the last attempt returned is returned unchanged.
    pub async fn run<F, Fut, T, E, M>(&self, mut work: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: AsDynError<M>,
    {
        match self.retry_loop(None, |_| work()).await {
            Exit::Finished(result) | Exit::Cancelled { last: result } => result,
        }
    }

    /// Like [`run`](Self::run), but the waits between attempts end early
    /// when `token` is cancelled. `work` receives the token so it can
    /// observe cancellation too.
    pub async fn run_with_cancel<F, Fut, T, E, M>(
        &self,
        token: &CancellationToken,
        mut work: F,
    ) -> RetryResult<T, E>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: AsDynError<M>,
    {
        self.run_fn(token, |token, _| work(token)).await
    }

    /// Like [`run_with_cancel`](Self::run_with_cancel), and `work` also
    /// receives the number of retries made so far (0 on the first attempt).
    pub async fn run_fn<F, Fut, T, E, M>(
        &self,
        token: &CancellationToken,
        mut work: F,
    ) -> RetryResult<T, E>
    where
        F: FnMut(CancellationToken, usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: AsDynError<M>,
    {
        match self
            .retry_loop(Some(token), |attempt| work(token.clone(), attempt))
            .await
        {
            Exit::Finished(result) => result.map_err(RetryError::Work),
            Exit::Cancelled { last } if self.surface_work_errors => last.map_err(RetryError::Work),
            Exit::Cancelled { .. } => Err(RetryError::Cancelled),
        }
    }

    async fn retry_loop<F, Fut, T, E, M>(
        &self,
        token: Option<&CancellationToken>,
        mut work: F,
    ) -> Exit<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: AsDynError<M>,
    {
        let mut retries = 0;
        loop {
            let result = work(retries).await;
            let err = result.as_ref().err().map(|e| e.as_dyn_error());

            match self.classifier.classify(err) {
                Classification::Succeed | Classification::Fail => return Exit::Finished(result),
                Classification::Retry => {}
            }

            if !self.infinite && retries >= self.backoff.len() {
                tracing::debug!(attempts = retries + 1, "Retries exhausted");
                return Exit::Finished(result);
            }

            let delay = err
                .and_then(backoff_override)
                .unwrap_or_else(|| self.calc_sleep(retries));

            tracing::debug!(
                attempt = retries + 1,
                delay_ms = millis(delay),
                error = err.map(tracing::field::display),
                "Retrying operation"
            );

            if let Pause::Cancelled = pause(token, delay).await {
                tracing::debug!(attempt = retries + 1, "Retry cancelled during backoff");
                return Exit::Cancelled { last: result };
            }

            retries += 1;
        }
    }

    /// Returns the wait before retry `retries + 1`, jitter applied.
    pub(crate) fn calc_sleep(&self, retries: usize) -> Duration {
        let Some(&base) = self.backoff.get(retries).or_else(|| self.backoff.last()) else {
            return Duration::ZERO;
        };

        if self.jitter == 0.0 {
            return base;
        }

        let offset = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .gen_range(-self.jitter..=self.jitter);

        Duration::try_from_secs_f64(base.as_secs_f64() * (1.0 + offset)).unwrap_or(Duration::MAX)
    }
}

/// Finds an explicit wait requested anywhere in the error chain.
fn backoff_override(err: &(dyn StdError + 'static)) -> Option<Duration> {
    error_chain(err)
        .find_map(|e| e.downcast_ref::<WithBackoff>())
        .map(WithBackoff::backoff)
}

async fn pause(token: Option<&CancellationToken>, delay: Duration) -> Pause {
    let Some(token) = token else {
        tokio::time::sleep(delay).await;
        return Pause::Elapsed;
    };

    tokio::select! {
        biased;
        _ = token.cancelled() => Pause::Cancelled,
        _ = tokio::time::sleep(delay) => Pause::Elapsed,
    }
}

impl fmt::Debug for Retrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrier")
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("infinite", &self.infinite)
            .field("surface_work_errors", &self.surface_work_errors)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BoxError;
    use crate::retrier::backoff::constant_backoff;
    use crate::retrier::classifier::{BlacklistClassifier, WhitelistClassifier};
    use std::future::{ready, Ready};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use thiserror::Error;
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq, Error)]
    enum TestError {
        #[error("FOO")]
        Foo,
        #[error("BAR")]
        Bar,
        #[error("BAZ")]
        Baz,
    }

    /// Work that returns `returns[i]` on call `i`, then succeeds.
    fn scripted(
        returns: Vec<TestError>,
    ) -> (Arc<AtomicUsize>, impl FnMut() -> Ready<Result<(), TestError>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let work = move || {
            let i = counter.fetch_add(1, Ordering::SeqCst);
            ready(match returns.get(i) {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            })
        };
        (calls, work)
    }

    fn whitelist(errors: Vec<TestError>) -> Option<Arc<dyn Classifier>> {
        Some(Arc::new(WhitelistClassifier::new(errors)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrier() {
        let r = Retrier::new(
            vec![Duration::ZERO, Duration::from_millis(10)],
            whitelist(vec![TestError::Foo]),
        );

        let (calls, work) = scripted(vec![TestError::Foo, TestError::Foo]);
        assert_eq!(r.run(work).await, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let (calls, work) = scripted(vec![TestError::Foo, TestError::Bar]);
        assert_eq!(r.run(work).await, Err(TestError::Bar));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let (calls, work) = scripted(vec![TestError::Bar, TestError::Baz]);
        assert_eq!(r.run(work).await, Err(TestError::Bar));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retrier_none() {
        let r = Retrier::new(Vec::new(), None);

        let (calls, work) = scripted(vec![TestError::Foo]);
        assert_eq!(r.run(work).await, Err(TestError::Foo));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (calls, work) = scripted(Vec::new());
        assert_eq!(r.run(work).await, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhaust_after_schedule() {
        let r = Retrier::new(constant_backoff(3, Duration::from_millis(100)), None);
        let start = Instant::now();

        let (calls, work) = scripted(vec![TestError::Foo; 10]);
        assert_eq!(r.run(work).await, Err(TestError::Foo));

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blacklisted_error_is_not_retried() {
        let r = Retrier::new(
            constant_backoff(5, Duration::from_millis(1)),
            Some(Arc::new(BlacklistClassifier::new([TestError::Baz]))),
        );

        let (calls, work) = scripted(vec![TestError::Foo, TestError::Baz]);
        assert_eq!(r.run(work).await, Err(TestError::Baz));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_infinite_retry() {
        let r = Retrier::new(vec![Duration::from_millis(1)], None).with_infinite_retry();

        let (calls, work) = scripted(vec![TestError::Foo; 20]);
        assert_eq!(r.run(work).await, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 21);
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_can_override_backoff() {
        let r = Retrier::new(vec![Duration::from_secs(3600)], None);
        let start = Instant::now();
        let calls = AtomicUsize::new(0);

        let result = r
            .run(|| {
                let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
                async move {
                    if first {
                        Err(WithBackoff::new(TestError::Foo, Duration::from_millis(5)))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(start.elapsed(), Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_boxed_errors_are_retried() {
        let r = Retrier::new(vec![Duration::from_secs(3600); 3], whitelist(vec![TestError::Foo]));
        let start = Instant::now();
        let calls = AtomicUsize::new(0);

        let result = r
            .run(|| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    let err: BoxError = match call {
                        0 => Box::new(WithBackoff::new(TestError::Foo, Duration::from_millis(5))),
                        1 => Box::new(TestError::Foo),
                        _ => Box::new(TestError::Bar),
                    };
                    Err::<(), _>(err)
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.downcast_ref::<TestError>(), Some(&TestError::Bar));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            start.elapsed(),
            Duration::from_millis(5) + Duration::from_secs(3600)
        );

        let token = CancellationToken::new();
        let result = Retrier::new(Vec::new(), None)
            .run_with_cancel(&token, |_token| async {
                Err::<(), BoxError>("boom".into())
            })
            .await;
        assert_eq!(result.unwrap_err().into_work().unwrap().to_string(), "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let r = Retrier::new(vec![Duration::from_secs(3600)], None);
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                token.cancel();
            })
        };

        let result = r
            .run_with_cancel(&token, |_token| {
                calls.fetch_add(1, Ordering::SeqCst);
                ready(Err::<(), _>(TestError::Foo))
            })
            .await;

        canceller.await.unwrap();
        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_surface_work_errors_on_cancellation() {
        let r = Retrier::new(vec![Duration::from_secs(3600)], None).with_surface_work_errors();
        let token = CancellationToken::new();
        token.cancel();

        let result = r
            .run_with_cancel(&token, |_token| ready(Err::<(), _>(TestError::Bar)))
            .await;

        assert_eq!(result.unwrap_err().into_work(), Some(TestError::Bar));
    }

    #[tokio::test]
    async fn test_work_observes_cancelled_token() {
        let token = CancellationToken::new();
        let r = Retrier::new(
            vec![Duration::ZERO, Duration::from_millis(10)],
            whitelist(Vec::new()),
        );

        let work = |token: CancellationToken| {
            ready(if token.is_cancelled() {
                Err(TestError::Foo)
            } else {
                Ok(())
            })
        };

        assert!(r.run_with_cancel(&token, work).await.is_ok());

        token.cancel();
        let err = r.run_with_cancel(&token, work).await.unwrap_err();
        assert_eq!(err.into_work(), Some(TestError::Foo));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_fn_passes_attempt_number() {
        let r = Retrier::new(constant_backoff(2, Duration::from_millis(1)), None);
        let token = CancellationToken::new();
        let seen = Mutex::new(Vec::new());

        let result = r
            .run_fn(&token, |_token, attempt| {
                seen.lock().unwrap().push(attempt);
                ready(Err::<(), _>(TestError::Foo))
            })
            .await;

        assert_eq!(result.unwrap_err().into_work(), Some(TestError::Foo));
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_jitter_setter_ignores_out_of_range() {
        let mut r = Retrier::new(Vec::new(), None);
        r.set_jitter(0.25);
        assert_eq!(r.jitter(), 0.25);

        for bad in [-0.1, 1.1, f64::NAN, f64::INFINITY] {
            r.set_jitter(bad);
            assert_eq!(r.jitter(), 0.25);
        }

        let r = r.with_jitter(1.0);
        assert_eq!(r.jitter(), 1.0);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let base = Duration::from_millis(100);
        let r = Retrier::new(vec![base], None).with_jitter(0.25);

        for _ in 0..1000 {
            let delay = r.calc_sleep(0);
            assert!(delay >= base.mul_f64(0.75), "{delay:?} below lower bound");
            assert!(delay <= base.mul_f64(1.25), "{delay:?} above upper bound");
        }

        let r = Retrier::new(vec![base], None).with_jitter(1.0);
        for _ in 0..1000 {
            assert!(r.calc_sleep(0) <= base * 2);
        }
    }

    #[test]
    fn test_calc_sleep_clamps_to_last_entry() {
        let r = Retrier::new(vec![Duration::from_millis(1), Duration::from_millis(2)], None);
        assert_eq!(r.calc_sleep(0), Duration::from_millis(1));
        assert_eq!(r.calc_sleep(1), Duration::from_millis(2));
        assert_eq!(r.calc_sleep(10), Duration::from_millis(2));

        let empty = Retrier::new(Vec::new(), None);
        assert_eq!(empty.calc_sleep(3), Duration::ZERO);
    }
}
