#![forbid(unsafe_code)]
// Allow pedantic lints for early-stage API ergonomics.
#![allow(clippy::nursery)]
#![allow(clippy::pedantic)]

//! # Trialkit
//!
//! Building blocks for test suites that exercise noisy, occasionally flaky
//! systems:
//!
//! - [`retry`]: re-run a failing body, resetting state between attempts.
//! - [`capture`]: collect log records at or above a level, up to a hard cap.
//! - [`matcher`]: check a raised error's class, subclass, SQL state and
//!   message parameters, exactly or by pattern.
//! - [`lifecycle`]: run each test through set-up, body, failure dump,
//!   tear-down and thread audit, in that order.
//!
//! Logging goes through [`trialkit_log`]; `tracing` events reach the same
//! loggers once [`telemetry::init_test_tracing`] has run.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use trialkit::prelude::*;
//! use trialkit_log::{Level, LoggerRegistry};
//!
//! let registry = LoggerRegistry::new();
//! let sink = Arc::new(CaptureSink::new(100, Level::Warn).unwrap());
//! let coordinator = Coordinator::new(HarnessConfig::default().with_retry_attempts(2))
//!     .unwrap()
//!     .with_diagnostics(sink.clone())
//!     .with_dump_output(std::io::sink());
//!
//! let mut fixture = NoFixture::<String>::new();
//! let _guard = sink.attach(&registry, &["wal"], None).unwrap();
//! let result = coordinator.run("checkpoint", &mut fixture, |_, scope| {
//!     registry.logger("wal").warn("fsync slow", &[]);
//!     if scope.attempt() == 1 { Err("flaked".to_string()) } else { Ok(()) }
//! });
//! assert!(result.is_ok());
//! assert_eq!(sink.count_at_least(Level::Warn), 2);
//! ```

pub mod audit;
pub mod capture;
pub mod config;
pub mod environment;
pub mod error;
pub mod lifecycle;
pub mod matcher;
pub mod retry;
pub mod telemetry;

pub use audit::{ProcThreadAudit, ThreadAudit};
pub use capture::{CaptureGuard, CaptureSink, with_capture};
pub use config::HarnessConfig;
pub use environment::Environment;
pub use error::{CaptureOverflowError, ConfigurationError, HarnessError, Result};
pub use lifecycle::{Coordinator, DiagnosticSource, Fixture, NoFixture, TestFailure, TestScope};
pub use matcher::{
    AssertionFailure, ClassifiedError, ExpectedError, RaisedError, assert_error, check_error,
};
pub use retry::{RETRY_LOGGER, ResetSupport, Retry, RetryState};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        AssertionFailure, CaptureGuard, CaptureOverflowError, CaptureSink, ClassifiedError,
        ConfigurationError, Coordinator, DiagnosticSource, ExpectedError, Fixture, HarnessConfig,
        HarnessError, NoFixture, RaisedError, ResetSupport, Retry, RetryState, TestFailure,
        TestScope, ThreadAudit, assert_error, check_error, with_capture,
    };
}
