//! Harness error taxonomy.
//!
//! - [`ConfigurationError`]: the harness was used incorrectly. Never retried.
//! - [`CaptureOverflowError`]: a capture sink ran out of room, which means a
//!   test is logging without bound.
//! - [`AssertionFailure`]: a classified error did not match its expectation.
//!
//! A test body's own error is not part of this taxonomy. The retry harness
//! hands it back exactly as the body produced it.

use thiserror::Error;
use trialkit_log::Level;

pub use crate::matcher::AssertionFailure;

/// Invalid harness usage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// Retry was asked for zero attempts.
    #[error("retry requires at least one attempt, got {0}")]
    InvalidAttempts(u32),

    /// Retry was combined with a lifecycle that cannot reset between attempts.
    #[error(
        "retry with {attempts} attempts needs a lifecycle that can reset between attempts, \
         but `{lifecycle}` only supports a single set-up/tear-down pair per test"
    )]
    NonResettableLifecycle {
        /// Name of the offending lifecycle.
        lifecycle: String,
        /// Attempts that were requested.
        attempts: u32,
    },

    /// None of the requested log sources exist.
    #[error("no log sources could be resolved for {requested:?}")]
    NoLogSources {
        /// The names that were asked for (empty means the root source).
        requested: Vec<String>,
    },

    /// A capture sink was created with room for zero events.
    #[error("capture sink capacity must be at least 1")]
    ZeroCapacity,

    /// A configuration value could not be parsed.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidSetting {
        /// Setting name (environment variable or field).
        key: String,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// A capture sink received more qualifying records than its capacity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "log capture overflow: sink holds at most {max_events} events, rejected {level} record \
     from `{logger}`: {message:?}"
)]
pub struct CaptureOverflowError {
    /// Capacity of the sink.
    pub max_events: usize,
    /// Level of the rejected record.
    pub level: Level,
    /// Logger that emitted the rejected record.
    pub logger: String,
    /// Message of the rejected record.
    pub message: String,
}

/// Any error the harness itself raises.
#[derive(Debug, Clone, Error)]
pub enum HarnessError {
    /// See [`ConfigurationError`].
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// See [`CaptureOverflowError`].
    #[error(transparent)]
    CaptureOverflow(#[from] CaptureOverflowError),

    /// See [`AssertionFailure`].
    #[error(transparent)]
    Assertion(#[from] AssertionFailure),
}

/// A specialized [`Result`] type for harness operations.
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;
