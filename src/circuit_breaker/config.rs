//! Circuit breaker configuration.

use std::time::Duration;

/// Configuration for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Number of failures in the closed state before the circuit opens.
    pub error_threshold: u32,

    /// Number of successes in the half-open state before the circuit closes.
    pub success_threshold: u32,

    /// How long the circuit stays open before it lets a probe through.
    pub timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(30),
        }
    }
}

impl BreakerConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the error threshold. Zero is treated as one.
    pub fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.error_threshold = threshold.max(1);
        self
    }

    /// Sets the success threshold. Zero is treated as one.
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    /// Sets how long the circuit stays open.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Creates a configuration that trips quickly and recovers cautiously.
    ///
    /// This configuration:
    /// - Opens after 3 failures
    /// - Needs 5 successful probes to close again
    /// - Stays open for 60 seconds
    pub fn strict() -> Self {
        Self {
            error_threshold: 3,
            success_threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }

    /// Creates a configuration that tolerates more failures and recovers fast.
    ///
    /// This configuration:
    /// - Opens after 10 failures
    /// - Closes after 2 successful probes
    /// - Stays open for 10 seconds
    pub fn high_availability() -> Self {
        Self {
            error_threshold: 10,
            success_threshold: 2,
            timeout: Duration::from_secs(10),
        }
    }
}
