//! Circuit breaker state machine.

use crate::circuit_breaker::config::BreakerConfig;

use serde::{Deserialize, Serialize};

/// The current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Circuit is closed; work runs and failures are counted.
    #[default]
    Closed,

    /// Circuit is open; work is rejected until the timeout elapses.
    Open,

    /// Circuit is half-open; work runs and successes are counted.
    HalfOpen,
}

impl BreakerState {
    /// Returns `true` if the circuit is closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns `true` if the circuit is open.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns `true` if the circuit is half-open.
    pub fn is_half_open(&self) -> bool {
        matches!(self, Self::HalfOpen)
    }

    /// Returns the name of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// How a unit of work ended, as far as the breaker cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success,
    Failure,
}

/// Side effect requested by a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// Nothing changed.
    Stay,
    /// The circuit opened; a reset timer must be scheduled for `generation`.
    Opened { generation: u64 },
    /// The reset timer moved the circuit to half-open.
    HalfOpened,
    /// Enough probes succeeded; the circuit closed.
    Closed,
}

/// State plus counters, always mutated as one value under the breaker's lock.
///
/// `generation` increments on every transition so a reset timer can tell
/// whether the opening it was scheduled for is still the current one.
#[derive(Debug, Default)]
pub(crate) struct Machine {
    state: BreakerState,
    errors: u32,
    successes: u32,
    generation: u64,
}

impl Machine {
    pub(crate) fn state(&self) -> BreakerState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn counters(&self) -> (u32, u32) {
        (self.errors, self.successes)
    }

    /// Applies the outcome of a finished call to whatever state is current now.
    pub(crate) fn record(&mut self, outcome: Outcome, config: &BreakerConfig) -> Transition {
        match (self.state, outcome) {
            (BreakerState::Closed, Outcome::Success) => Transition::Stay,
            (BreakerState::Closed, Outcome::Failure) => {
                self.errors += 1;
                if self.errors >= config.error_threshold {
                    self.open()
                } else {
                    Transition::Stay
                }
            }
            (BreakerState::HalfOpen, Outcome::Success) => {
                self.successes += 1;
                if self.successes >= config.success_threshold {
                    self.change(BreakerState::Closed);
                    Transition::Closed
                } else {
                    Transition::Stay
                }
            }
            (BreakerState::HalfOpen, Outcome::Failure) => self.open(),
            // A call admitted before the circuit opened finished late.
            (BreakerState::Open, _) => Transition::Stay,
        }
    }

    /// Fired by the reset timer scheduled for `generation`.
    pub(crate) fn expire(&mut self, generation: u64) -> Transition {
        if self.state.is_open() && self.generation == generation {
            self.change(BreakerState::HalfOpen);
            Transition::HalfOpened
        } else {
            Transition::Stay
        }
    }

    fn open(&mut self) -> Transition {
        self.change(BreakerState::Open);
        Transition::Opened {
            generation: self.generation,
        }
    }

    fn change(&mut self, state: BreakerState) {
        self.errors = 0;
        self.successes = 0;
        self.state = state;
        self.generation = self.generation.wrapping_add(1);
    }
}
