//! Classifiers decide what the retrier does with a work result.

use crate::core::{error_chain, BoxError};

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;

/// The verdict a classifier assigns to a work result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// The work succeeded; return its result.
    Succeed,
    /// The work failed in a way worth trying again.
    Retry,
    /// The work failed for good; return its result without retrying.
    Fail,
}

/// Maps the outcome of a unit of work to a [`Classification`].
///
/// `err` is `None` when the work succeeded.
pub trait Classifier: Send + Sync {
    /// Classifies a work outcome.
    fn classify(&self, err: Option<&(dyn StdError + 'static)>) -> Classification;
}

/// Error types the retrier can hand to a [`Classifier`].
///
/// Implemented for every `E: Error + 'static` and for boxed trait objects
/// such as [`BoxError`]. The marker parameter keeps the two families of
/// impls apart and is always inferred.
pub trait AsDynError<Marker> {
    /// Borrows the error as a trait object.
    fn as_dyn_error(&self) -> &(dyn StdError + 'static);
}

/// Marker for concrete error types.
#[derive(Debug)]
pub enum Concrete {}

/// Marker for boxed error trait objects.
#[derive(Debug)]
pub enum Boxed {}

impl<E> AsDynError<Concrete> for E
where
    E: StdError + 'static,
{
    fn as_dyn_error(&self) -> &(dyn StdError + 'static) {
        self
    }
}

impl AsDynError<Boxed> for BoxError {
    fn as_dyn_error(&self) -> &(dyn StdError + 'static) {
        &**self
    }
}

impl AsDynError<Boxed> for Box<dyn StdError + 'static> {
    fn as_dyn_error(&self) -> &(dyn StdError + 'static) {
        &**self
    }
}

/// Succeeds on success and retries every error.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl Classifier for DefaultClassifier {
    fn classify(&self, err: Option<&(dyn StdError + 'static)>) -> Classification {
        match err {
            None => Classification::Succeed,
            Some(_) => Classification::Retry,
        }
    }
}

/// Retries only the listed errors; any other error fails immediately.
///
/// An error matches when it, or any error in its `source()` chain, is a `K`
/// equal to one of the listed values.
#[derive(Debug, Clone)]
pub struct WhitelistClassifier<K> {
    errors: Vec<K>,
}

impl<K> WhitelistClassifier<K> {
    /// Creates a classifier that retries the given errors.
    pub fn new(errors: impl IntoIterator<Item = K>) -> Self {
        Self {
            errors: errors.into_iter().collect(),
        }
    }
}

impl<K> Classifier for WhitelistClassifier<K>
where
    K: StdError + PartialEq + Send + Sync + 'static,
{
    fn classify(&self, err: Option<&(dyn StdError + 'static)>) -> Classification {
        match err {
            None => Classification::Succeed,
            Some(err) if matches_any(err, &self.errors) => Classification::Retry,
            Some(_) => Classification::Fail,
        }
    }
}

/// Fails immediately on the listed errors; any other error is retried.
///
/// Matching works the same way as for [`WhitelistClassifier`].
#[derive(Debug, Clone)]
pub struct BlacklistClassifier<K> {
    errors: Vec<K>,
}

impl<K> BlacklistClassifier<K> {
    /// Creates a classifier that never retries the given errors.
    pub fn new(errors: impl IntoIterator<Item = K>) -> Self {
        Self {
            errors: errors.into_iter().collect(),
        }
    }
}

impl<K> Classifier for BlacklistClassifier<K>
where
    K: StdError + PartialEq + Send + Sync + 'static,
{
    fn classify(&self, err: Option<&(dyn StdError + 'static)>) -> Classification {
        match err {
            None => Classification::Succeed,
            Some(err) if matches_any(err, &self.errors) => Classification::Fail,
            Some(_) => Classification::Retry,
        }
    }
}

fn matches_any<K>(err: &(dyn StdError + 'static), errors: &[K]) -> bool
where
    K: StdError + PartialEq + 'static,
{
    error_chain(err).any(|e| e.downcast_ref::<K>().is_some_and(|k| errors.contains(k)))
}
