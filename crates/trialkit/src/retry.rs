//! Re-running a failing test body with a reset between attempts.
//!
//! [`Retry`] invokes a body up to `total_attempts` times. After every failure
//! but the last it logs the failure, runs the caller's reset hook, emits a
//! `RETRY #k` marker on the [`RETRY_LOGGER`] logger and tries again. The first
//! success is returned at once; if every attempt fails, the error from the
//! last attempt is returned unchanged.

use std::cell::RefCell;
use std::fmt::Display;
use std::sync::Arc;
use trialkit_log::{Logger, LoggerRegistry};

use crate::error::ConfigurationError;
use crate::lifecycle::Fixture;

/// Logger that retry markers and failure notes are emitted on.
pub const RETRY_LOGGER: &str = "trialkit.retry";

/// Whether a lifecycle can be reset between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetSupport {
    /// Set-up and tear-down may run once per attempt.
    #[default]
    PerAttempt,
    /// Set-up and tear-down run exactly once for the whole test.
    Once,
}

/// Per-test retry bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempts_remaining: u32,
    total_attempts: u32,
}

impl RetryState {
    /// Starts bookkeeping for `total_attempts` attempts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidAttempts`] if `total_attempts` is zero.
    pub fn new(total_attempts: u32) -> Result<Self, ConfigurationError> {
        if total_attempts == 0 {
            return Err(ConfigurationError::InvalidAttempts(total_attempts));
        }
        Ok(Self {
            attempts_remaining: total_attempts - 1,
            total_attempts,
        })
    }

    /// Retries left after the current attempt.
    #[must_use]
    pub fn attempts_remaining(&self) -> u32 {
        self.attempts_remaining
    }

    /// Attempts allowed in total.
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.total_attempts
    }

    /// One-based number of the current attempt.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.total_attempts - self.attempts_remaining
    }

    /// Records a failed attempt. Returns whether another attempt is allowed.
    pub fn record_failure(&mut self) -> bool {
        if self.attempts_remaining == 0 {
            return false;
        }
        self.attempts_remaining -= 1;
        true
    }
}

/// A validated retry policy.
#[derive(Debug, Clone)]
pub struct Retry {
    total_attempts: u32,
    logger: Arc<Logger>,
}

impl Retry {
    /// Creates a policy of `total_attempts` attempts logging to the global registry.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidAttempts`] if `total_attempts` is zero.
    pub fn new(total_attempts: u32) -> Result<Self, ConfigurationError> {
        Self::with_logger(total_attempts, LoggerRegistry::global().logger(RETRY_LOGGER))
    }

    /// Creates a policy that emits its markers on `logger`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidAttempts`] if `total_attempts` is zero.
    pub fn with_logger(total_attempts: u32, logger: Arc<Logger>) -> Result<Self, ConfigurationError> {
        RetryState::new(total_attempts)?;
        Ok(Self {
            total_attempts,
            logger,
        })
    }

    /// Attempts allowed in total.
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.total_attempts
    }

    /// Checks that a lifecycle named `lifecycle` can support this policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NonResettableLifecycle`] when more than
    /// one attempt is requested for a lifecycle that cannot reset.
    pub fn require(self, support: ResetSupport, lifecycle: &str) -> Result<Self, ConfigurationError> {
        if self.total_attempts > 1 && support == ResetSupport::Once {
            return Err(ConfigurationError::NonResettableLifecycle {
                lifecycle: lifecycle.to_string(),
                attempts: self.total_attempts,
            });
        }
        Ok(self)
    }

    /// Runs `body` until it succeeds or attempts run out.
    ///
    /// `reset` runs between attempts, never before the first or after the
    /// last. If it fails, its error is returned and no further attempt runs.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error, or the failing reset's error.
    pub fn run<T, E, R, B>(&self, reset: R, body: B) -> Result<T, E>
    where
        E: Display,
        R: FnMut() -> Result<(), E>,
        B: FnMut() -> Result<T, E>,
    {
        self.run_counted(reset, body).0
    }

    /// Like [`run`](Self::run), also returning the number of attempts made.
    pub fn run_counted<T, E, R, B>(&self, mut reset: R, mut body: B) -> (Result<T, E>, u32)
    where
        E: Display,
        R: FnMut() -> Result<(), E>,
        B: FnMut() -> Result<T, E>,
    {
        let mut state = RetryState {
            attempts_remaining: self.total_attempts - 1,
            total_attempts: self.total_attempts,
        };
        let mut retries = 0u32;

        loop {
            let attempt = state.attempt();
            let err = match body() {
                Ok(value) => return (Ok(value), attempt),
                Err(err) => err,
            };

            if !state.record_failure() {
                if self.total_attempts > 1 {
                    tracing::warn!(
                        attempt,
                        total = self.total_attempts,
                        error = %err,
                        "test failed on its final attempt"
                    );
                }
                return (Err(err), attempt);
            }

            let attempt_text = attempt.to_string();
            let total_text = self.total_attempts.to_string();
            self.logger.info(
                &format!("attempt {attempt} of {} failed: {err}", self.total_attempts),
                &[("attempt", attempt_text.as_str()), ("total", total_text.as_str())],
            );
            tracing::info!(
                attempt,
                total = self.total_attempts,
                error = %err,
                "test attempt failed, resetting before retry"
            );

            if let Err(reset_err) = reset() {
                tracing::warn!(attempt, error = %reset_err, "reset between attempts failed");
                return (Err(reset_err), attempt);
            }

            retries += 1;
            let retry_text = retries.to_string();
            self.logger
                .info(&format!("RETRY #{retries}"), &[("retry", retry_text.as_str())]);
            tracing::info!(retry = retries, "RETRY #{retries}");
        }
    }

    /// Runs `body` against `fixture`, tearing it down and setting it up again
    /// between attempts.
    ///
    /// The fixture is expected to be set up already; it is left set up on return.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error, or the error of a failed reset.
    pub fn run_with_fixture<F, T, B>(&self, fixture: &mut F, mut body: B) -> Result<T, F::Error>
    where
        F: Fixture,
        B: FnMut(&mut F) -> Result<T, F::Error>,
    {
        let fixture = RefCell::new(fixture);
        self.run(
            || {
                let mut fixture = fixture.borrow_mut();
                fixture.tear_down()?;
                fixture.set_up()
            },
            || body(&mut **fixture.borrow_mut()),
        )
    }
}
