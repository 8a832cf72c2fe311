//! Error types for the resiliency library.
//!
//! Every component surfaces the wrapped work's own error untouched inside a
//! `Work` variant, and adds only the variants it can produce itself
//! (rejection, cancellation, abandonment). Nothing here ever swallows an
//! error.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A type-erased, thread-safe error.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Error returned by [`Breaker::run`](crate::circuit_breaker::Breaker::run).
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker is open; the work was not executed.
    #[error("circuit breaker is open")]
    Open,

    /// The work ran and failed with its own error.
    #[error("{0}")]
    Work(E),
}

impl<E> BreakerError<E> {
    /// Returns `true` if the call was rejected by an open breaker.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns the work's error, if the work ran.
    pub fn work(&self) -> Option<&E> {
        match self {
            Self::Work(e) => Some(e),
            Self::Open => None,
        }
    }

    /// Consumes the error, returning the work's error if the work ran.
    pub fn into_work(self) -> Option<E> {
        match self {
            Self::Work(e) => Some(e),
            Self::Open => None,
        }
    }
}

/// Error returned by [`Batcher::run`](crate::batcher::Batcher::run).
#[derive(Debug, Clone, Error)]
pub enum BatchError<E> {
    /// The batched work failed; every caller in the batch receives this.
    #[error("{0}")]
    Work(E),

    /// The prefilter refused the parameter before it joined a batch.
    #[error("{0}")]
    Rejected(E),

    /// The batch was torn down before a result was delivered.
    #[error("batch was abandoned before a result was delivered")]
    Abandoned,
}

impl<E> BatchError<E> {
    /// Returns `true` if the prefilter rejected the parameter.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Returns `true` if the batch never delivered a result.
    pub fn is_abandoned(&self) -> bool {
        matches!(self, Self::Abandoned)
    }

    /// Consumes the error, returning the work or prefilter error if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Work(e) | Self::Rejected(e) => Some(e),
            Self::Abandoned => None,
        }
    }
}

/// Error returned by the cancellable [`Retrier`](crate::retrier::Retrier) entry points.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The cancellation token fired while waiting between attempts.
    #[error("retry was cancelled")]
    Cancelled,

    /// The work's own error, returned on Fail or once retries ran out.
    #[error("{0}")]
    Work(E),
}

impl<E> RetryError<E> {
    /// Returns `true` if the retry loop was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the work's error, if any.
    pub fn work(&self) -> Option<&E> {
        match self {
            Self::Work(e) => Some(e),
            Self::Cancelled => None,
        }
    }

    /// Consumes the error, returning the work's error if any.
    pub fn into_work(self) -> Option<E> {
        match self {
            Self::Work(e) => Some(e),
            Self::Cancelled => None,
        }
    }
}

/// Errors produced by the [`LeakyBucket`](crate::limiter::LeakyBucket).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LimiterError {
    /// The bucket was closed and has no tokens left.
    #[error("leaky bucket is closed")]
    Closed,

    /// The burst is larger than a bucket can hold.
    #[error("invalid burst {burst}: at most {max} tokens")]
    InvalidBurst {
        /// The rejected burst.
        burst: usize,
        /// The largest supported burst.
        max: usize,
    },

    /// The drip rate is not a positive, finite number of tokens per second.
    #[error("invalid drip rate {drip}: must be positive and finite")]
    InvalidRate {
        /// The rejected rate.
        drip: f64,
    },
}

/// A panic caught while running work inside a breaker.
///
/// The payload is preserved so that the panic can be resumed unchanged once
/// the breaker has recorded the failure.
pub struct Panic {
    payload: Box<dyn Any + Send + 'static>,
}

impl Panic {
    /// Wraps a payload obtained from `catch_unwind`.
    pub fn new(payload: Box<dyn Any + Send + 'static>) -> Self {
        Self { payload }
    }

    /// Returns the panic message when the payload is a string.
    pub fn message(&self) -> Option<&str> {
        self.payload
            .downcast_ref::<&'static str>()
            .copied()
            .or_else(|| self.payload.downcast_ref::<String>().map(String::as_str))
    }

    /// Returns the raw payload.
    pub fn payload(&self) -> &(dyn Any + Send) {
        &*self.payload
    }

    /// Consumes the wrapper, returning the raw payload.
    pub fn into_payload(self) -> Box<dyn Any + Send + 'static> {
        self.payload
    }

    /// Resumes unwinding with the original payload.
    pub fn resume(self) -> ! {
        std::panic::resume_unwind(self.payload)
    }
}

impl fmt::Debug for Panic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Panic")
            .field("message", &self.message())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Panic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message().unwrap_or("<non-string payload>"))
    }
}

impl StdError for Panic {}

/// An error paired with an explicit wait before the next retry.
///
/// Work can return this (directly, or anywhere in its error's `source()`
/// chain) to override the retrier's schedule, for example with the delay a
/// rate-limited server asked for.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct WithBackoff {
    source: BoxError,
    backoff: Duration,
}

impl WithBackoff {
    /// Pairs `error` with the wait to use before the next attempt.
    pub fn new(error: impl Into<BoxError>, backoff: Duration) -> Self {
        Self {
            source: error.into(),
            backoff,
        }
    }

    /// Returns the requested wait.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Returns the wrapped error.
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.source
    }

    /// Consumes the wrapper, returning the wrapped error.
    pub fn into_inner(self) -> BoxError {
        self.source
    }
}

/// Iterates over `err` and every error reachable through `source()`.
pub fn error_chain<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(err), |&e| e.source())
}

/// A specialized `Result` type for breaker calls.
pub type BreakerResult<T, E> = Result<T, BreakerError<E>>;

/// A specialized `Result` type for batcher calls.
pub type BatchResult<E> = Result<(), BatchError<E>>;

/// A specialized `Result` type for cancellable retrier calls.
pub type RetryResult<T, E> = Result<T, RetryError<E>>;
