//! Circuit breaker for failing dependencies.
//!
//! The circuit breaker pattern prevents cascading failures by temporarily
//! stopping traffic to a failing dependency and letting probe calls through
//! once a cooldown has passed.
//!
//! ## States
//!
//! - **Closed**: Normal operation; work runs.
//! - **Open**: Work is rejected immediately.
//! - **Half-Open**: Work runs again to find out whether the dependency recovered.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use resiliency::circuit_breaker::{Breaker, BreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = Breaker::with_config(
//!     BreakerConfig::default()
//!         .with_error_threshold(5)
//!         .with_timeout(Duration::from_secs(30)),
//! );
//!
//! let response = breaker.run(|| client.get(url)).await?;
//! ```

mod breaker;
mod config;
mod state;

pub use breaker::Breaker;
pub use config::BreakerConfig;
pub use state::BreakerState;
