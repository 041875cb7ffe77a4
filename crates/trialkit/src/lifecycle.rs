//! Per-test lifecycle coordination.
//!
//! A [`Coordinator`] runs each test through the same sequence:
//!
//! 1. normalize the process time zone and locale (first test only);
//! 2. take the thread audit baseline (first test only);
//! 3. set up the [`Fixture`];
//! 4. run the body, retrying with a fixture reset if so configured;
//! 5. on failure, write every [`DiagnosticSource`] dump;
//! 6. tear the fixture down;
//! 7. run the post-test thread audit.
//!
//! Tear-down always runs once set-up has been attempted, including when the
//! body panics, unless a reset between attempts already tore the fixture down
//! and never set it up again. A tear-down error is reported only if nothing failed before
//! it; otherwise it is logged and the earlier failure is returned.

use parking_lot::Mutex;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt::{self, Write as _};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Once};
use tempfile::TempDir;
use thiserror::Error;
use trialkit_log::{Logger, LoggerRegistry};

use crate::audit::{ProcThreadAudit, ThreadAudit};
use crate::config::HarnessConfig;
use crate::environment;
use crate::error::ConfigurationError;
use crate::retry::{RETRY_LOGGER, ResetSupport, Retry};

/// Per-test set-up and tear-down.
pub trait Fixture {
    /// Error raised by set-up, tear-down and the test body.
    type Error: fmt::Debug + fmt::Display;

    /// Name used in logs and configuration errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Prepares state for one attempt.
    fn set_up(&mut self) -> Result<(), Self::Error>;

    /// Releases state from one attempt.
    fn tear_down(&mut self) -> Result<(), Self::Error>;

    /// Whether set-up and tear-down may run more than once per test.
    fn reset_support(&self) -> ResetSupport {
        ResetSupport::PerAttempt
    }
}

/// A fixture with nothing to set up.
pub struct NoFixture<E>(PhantomData<fn() -> E>);

impl<E> NoFixture<E> {
    /// Creates the fixture.
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<E> Default for NoFixture<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for NoFixture<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NoFixture")
    }
}

impl<E: fmt::Debug + fmt::Display> Fixture for NoFixture<E> {
    type Error = E;

    fn name(&self) -> &str {
        "no fixture"
    }

    fn set_up(&mut self) -> Result<(), E> {
        Ok(())
    }

    fn tear_down(&mut self) -> Result<(), E> {
        Ok(())
    }
}

/// State that can explain a failure after the fact.
pub trait DiagnosticSource: Send + Sync {
    /// Heading printed above the dump.
    fn label(&self) -> String;

    /// The dump, or `None` if there is nothing to show.
    fn dump(&self) -> Option<String>;
}

/// Why a coordinated test failed.
#[derive(Debug, Error)]
pub enum TestFailure<E> {
    /// The harness was misconfigured; nothing ran.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Set-up failed; the body did not run.
    #[error("set-up of `{test}` failed: {error}")]
    SetUp {
        /// Test name.
        test: String,
        /// The fixture's error.
        error: E,
    },

    /// Resetting the fixture between attempts failed.
    #[error("reset of `{test}` after attempt {attempt} failed: {error}")]
    Reset {
        /// Test name.
        test: String,
        /// The attempt that had just failed.
        attempt: u32,
        /// The fixture's error.
        error: E,
    },

    /// Every attempt of the body failed.
    #[error("`{test}` failed on attempt {attempts} of {total}: {error}")]
    Body {
        /// Test name.
        test: String,
        /// Attempts made.
        attempts: u32,
        /// Attempts allowed.
        total: u32,
        /// Error from the last attempt.
        error: E,
    },

    /// The body passed but tear-down failed.
    #[error("tear-down of `{test}` failed: {error}")]
    TearDown {
        /// Test name.
        test: String,
        /// The fixture's error.
        error: E,
    },
}

impl<E> TestFailure<E> {
    /// The fixture or body error, if the failure carries one.
    #[must_use]
    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Configuration(_) => None,
            Self::SetUp { error, .. }
            | Self::Reset { error, .. }
            | Self::Body { error, .. }
            | Self::TearDown { error, .. } => Some(error),
        }
    }

    /// Consumes the failure, returning the fixture or body error if any.
    pub fn into_error(self) -> Option<E> {
        match self {
            Self::Configuration(_) => None,
            Self::SetUp { error, .. }
            | Self::Reset { error, .. }
            | Self::Body { error, .. }
            | Self::TearDown { error, .. } => Some(error),
        }
    }
}

/// What a test body sees of its current attempt.
#[derive(Debug)]
pub struct TestScope {
    name: String,
    attempt: u32,
    total_attempts: u32,
    temp_dir: Option<TempDir>,
}

impl TestScope {
    fn new(name: &str, attempt: u32, total_attempts: u32) -> Self {
        Self {
            name: name.to_string(),
            attempt,
            total_attempts,
            temp_dir: None,
        }
    }

    /// Test name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// One-based attempt number.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Attempts allowed in total.
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.total_attempts
    }

    /// A scratch directory private to this attempt, created on first use and
    /// removed when the attempt ends.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the directory cannot be created.
    pub fn temp_dir(&mut self) -> io::Result<&Path> {
        let dir = match self.temp_dir.take() {
            Some(dir) => dir,
            None => {
                let prefix = format!("trialkit-{}-", file_safe(&self.name));
                tempfile::Builder::new().prefix(&prefix).tempdir()?
            }
        };
        Ok(self.temp_dir.insert(dir).path())
    }
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Runs tests through the shared lifecycle.
pub struct Coordinator {
    config: HarnessConfig,
    audit: Option<Arc<dyn ThreadAudit>>,
    audit_started: Once,
    diagnostics: Vec<Arc<dyn DiagnosticSource>>,
    dump_output: Mutex<Box<dyn Write + Send>>,
    retry_logger: Arc<Logger>,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("audit", &self.audit.is_some())
            .field("diagnostics", &self.diagnostics.len())
            .field("retry_logger", &self.retry_logger.name())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Creates a coordinator. Enables [`ProcThreadAudit`] if the config asks for it.
    ///
    /// # Errors
    ///
    /// Returns the config's validation error.
    pub fn new(config: HarnessConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let audit: Option<Arc<dyn ThreadAudit>> = if config.thread_audit {
            Some(Arc::new(ProcThreadAudit::new()))
        } else {
            None
        };
        Ok(Self {
            config,
            audit,
            audit_started: Once::new(),
            diagnostics: Vec::new(),
            dump_output: Mutex::new(Box::new(io::stderr())),
            retry_logger: LoggerRegistry::global().logger(RETRY_LOGGER),
        })
    }

    /// Replaces the thread audit.
    #[must_use]
    pub fn with_thread_audit(mut self, audit: Arc<dyn ThreadAudit>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Adds a source dumped when a test fails.
    #[must_use]
    pub fn with_diagnostics(mut self, source: Arc<dyn DiagnosticSource>) -> Self {
        self.diagnostics.push(source);
        self
    }

    /// Sends failure dumps to `output` instead of stderr.
    #[must_use]
    pub fn with_dump_output<W: Write + Send + 'static>(mut self, output: W) -> Self {
        self.dump_output = Mutex::new(Box::new(output));
        self
    }

    /// Emits retry markers on `logger` instead of the global registry's.
    #[must_use]
    pub fn with_retry_logger(mut self, logger: Arc<Logger>) -> Self {
        self.retry_logger = logger;
        self
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Runs one test with the configured number of attempts.
    ///
    /// # Errors
    ///
    /// See [`TestFailure`].
    ///
    /// # Panics
    ///
    /// Re-raises a panic from the body; see [`run_with_retry`](Self::run_with_retry).
    pub fn run<F, T, B>(&self, name: &str, fixture: &mut F, body: B) -> Result<T, TestFailure<F::Error>>
    where
        F: Fixture,
        B: FnMut(&mut F, &mut TestScope) -> Result<T, F::Error>,
    {
        self.run_with_retry(name, self.config.retry_attempts, fixture, body)
    }

    /// Runs one test with an explicit number of attempts.
    ///
    /// # Errors
    ///
    /// See [`TestFailure`].
    ///
    /// # Panics
    ///
    /// A panic in the body, set-up or tear-down is caught, then re-raised with
    /// its original payload after the failure dump, tear-down and audit have
    /// run. Panicking attempts are not retried.
    pub fn run_with_retry<F, T, B>(
        &self,
        name: &str,
        attempts: u32,
        fixture: &mut F,
        body: B,
    ) -> Result<T, TestFailure<F::Error>>
    where
        F: Fixture,
        B: FnMut(&mut F, &mut TestScope) -> Result<T, F::Error>,
    {
        environment::normalize(&self.config)?;
        self.start_audit();
        let retry = Retry::with_logger(attempts, Arc::clone(&self.retry_logger))?
            .require(fixture.reset_support(), fixture.name())?;

        let span = tracing::info_span!("test", name);
        let _entered = span.enter();

        let set_up = Cell::new(false);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            set_up_and_run(name, &retry, fixture, &set_up, body)
        }));

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                self.dump_diagnostics(name, &format!("panicked: {}", panic_message(&*payload)));
                if set_up.get() {
                    if let Err(err) = fixture.tear_down() {
                        tracing::warn!(error = %err, "tear-down after panic failed");
                    }
                }
                self.finish_audit(name);
                panic::resume_unwind(payload);
            }
        };

        if let Err(failure) = &outcome {
            self.dump_diagnostics(name, &failure.to_string());
        }

        let teardown = if set_up.get() {
            tracing::debug!("tearing down");
            fixture.tear_down()
        } else {
            tracing::debug!("fixture already torn down by a failed reset");
            Ok(())
        };
        self.finish_audit(name);

        match (outcome, teardown) {
            (Ok(value), Ok(())) => {
                tracing::debug!("passed");
                Ok(value)
            }
            (Ok(_), Err(error)) => {
                let failure = TestFailure::TearDown {
                    test: name.to_string(),
                    error,
                };
                self.dump_diagnostics(name, &failure.to_string());
                Err(failure)
            }
            (Err(failure), Ok(())) => Err(failure),
            (Err(failure), Err(error)) => {
                tracing::warn!(error = %error, "tear-down also failed; reporting the earlier failure");
                Err(failure)
            }
        }
    }

    fn start_audit(&self) {
        if let Some(audit) = &self.audit {
            self.audit_started.call_once(|| audit.before_all());
        }
    }

    fn finish_audit(&self, test: &str) {
        if let Some(audit) = &self.audit {
            for note in audit.after_test(test) {
                tracing::warn!(test, "{note}");
            }
        }
    }

    fn dump_diagnostics(&self, test: &str, reason: &str) {
        tracing::error!(test, reason, "test failed");

        let mut text = String::new();
        let _ = writeln!(text, "---- {test} failed: {reason}");
        for source in &self.diagnostics {
            let Some(dump) = source.dump() else {
                continue;
            };
            let label = source.label();
            let _ = writeln!(text, "==== {label} ====");
            text.push_str(&dump);
            if !dump.ends_with('\n') {
                text.push('\n');
            }
            tracing::error!(test, source = %label, "diagnostic dump written");
        }

        let mut output = self.dump_output.lock();
        if let Err(err) = output.write_all(text.as_bytes()).and_then(|()| output.flush()) {
            tracing::warn!(error = %err, "could not write diagnostic dump");
        }
    }
}

/// `set_up` is true while the fixture may hold state that tear-down must
/// release: from the first set-up call until a reset's tear-down starts, and
/// again once the reset calls set-up.
fn set_up_and_run<F, T, B>(
    name: &str,
    retry: &Retry,
    fixture: &mut F,
    set_up: &Cell<bool>,
    mut body: B,
) -> Result<T, TestFailure<F::Error>>
where
    F: Fixture,
    B: FnMut(&mut F, &mut TestScope) -> Result<T, F::Error>,
{
    tracing::debug!("setting up");
    set_up.set(true);
    if let Err(error) = fixture.set_up() {
        return Err(TestFailure::SetUp {
            test: name.to_string(),
            error,
        });
    }

    let total = retry.total_attempts();
    let fixture = RefCell::new(fixture);
    let attempt = Cell::new(0u32);
    let reset_failed = Cell::new(false);

    let (result, attempts) = retry.run_counted(
        || {
            let mut fixture = fixture.borrow_mut();
            set_up.set(false);
            let reset = fixture.tear_down().and_then(|()| {
                set_up.set(true);
                fixture.set_up()
            });
            reset_failed.set(reset.is_err());
            reset
        },
        || {
            attempt.set(attempt.get() + 1);
            let mut scope = TestScope::new(name, attempt.get(), total);
            body(&mut **fixture.borrow_mut(), &mut scope)
        },
    );

    result.map_err(|error| {
        if reset_failed.get() {
            TestFailure::Reset {
                test: name.to_string(),
                attempt: attempts,
                error,
            }
        } else {
            TestFailure::Body {
                test: name.to_string(),
                attempts,
                total,
                error,
            }
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counting {
        set_ups: u32,
        tear_downs: u32,
    }

    impl Fixture for Counting {
        type Error = String;

        fn set_up(&mut self) -> Result<(), String> {
            self.set_ups += 1;
            Ok(())
        }

        fn tear_down(&mut self) -> Result<(), String> {
            self.tear_downs += 1;
            Ok(())
        }
    }

    fn coordinator() -> Coordinator {
        Coordinator::new(HarnessConfig::default())
            .unwrap()
            .with_dump_output(io::sink())
            .with_retry_logger(Arc::new(Logger::new(RETRY_LOGGER)))
    }

    #[test]
    fn test_passing_body() {
        let mut fixture = Counting::default();
        let value = coordinator()
            .run("passes", &mut fixture, |_, scope| {
                assert_eq!(scope.attempt(), 1);
                Ok(7)
            })
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!((fixture.set_ups, fixture.tear_downs), (1, 1));
    }

    #[test]
    fn test_retry_resets_fixture() {
        let mut fixture = Counting::default();
        let value = coordinator()
            .run_with_retry("flaky", 3, &mut fixture, |_, scope| {
                if scope.attempt() < 3 {
                    Err(format!("attempt {}", scope.attempt()))
                } else {
                    Ok(scope.attempt())
                }
            })
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!((fixture.set_ups, fixture.tear_downs), (3, 3));
    }

    #[test]
    fn test_scope_temp_dir_is_per_attempt() {
        let mut fixture = NoFixture::<String>::new();
        let mut seen = Vec::new();
        let _ = coordinator().run_with_retry("dirs", 2, &mut fixture, |_, scope| {
            let dir = scope.temp_dir().map_err(|e| e.to_string())?.to_path_buf();
            assert!(dir.is_dir());
            seen.push(dir);
            Err::<(), _>("again".to_string())
        });
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0], seen[1]);
        assert!(seen.iter().all(|d| !d.exists()));
    }

    #[test]
    fn test_file_safe() {
        assert_eq!(file_safe("io::fsync test"), "io__fsync_test");
    }

    #[test]
    fn test_failure_accessors() {
        let failure: TestFailure<String> = TestFailure::Body {
            test: "t".into(),
            attempts: 2,
            total: 2,
            error: "boom".into(),
        };
        assert_eq!(failure.error().map(String::as_str), Some("boom"));
        assert_eq!(failure.to_string(), "`t` failed on attempt 2 of 2: boom");
        let config: TestFailure<String> = ConfigurationError::ZeroCapacity.into();
        assert!(config.into_error().is_none());
    }
}
