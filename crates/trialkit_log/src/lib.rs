#![forbid(unsafe_code)]
// Allow pedantic lints for early-stage API ergonomics.
#![allow(clippy::nursery)]
#![allow(clippy::pedantic)]

//! # Trialkit Log
//!
//! Named, observable loggers built for test harnesses.
//!
//! Every [`Logger`] has a name, a minimum [`Level`] (its own, or inherited
//! from its parent) and a list of [`Observer`]s. Observers receive an immutable
//! [`Record`] for every accepted log call, which is what lets a test attach a
//! capture sink to a logger, run code that logs, and then assert on what was
//! logged.
//!
//! Loggers are looked up by name through a [`LoggerRegistry`]. The registry
//! and the loggers it hands out implement the [`SourceResolver`] and
//! [`LogSource`] capability traits, so capture code never depends on the
//! concrete logger type.
//!
//! ## Example
//!
//! ```rust
//! use trialkit_log::{Level, LoggerRegistry};
//!
//! let registry = LoggerRegistry::new();
//! let logger = registry.logger("storage.wal");
//! logger.set_level(Level::Debug);
//! logger.info("checkpoint complete", &[("frames", "42")]);
//! ```
//!
//! ## Tracing
//!
//! [`RegistryLayer`] forwards `tracing` events into the registry, so code
//! that logs through `tracing` macros is observable the same way.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod bridge;
mod logger;
mod record;
mod registry;

pub use bridge::RegistryLayer;
pub use logger::{Logger, Observer, ObserverId, Options};
pub use record::Record;
pub use registry::{LogSource, LoggerRegistry, ROOT_LOGGER_NAME, SourceResolver};

/// Log level for filtering messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum Level {
    /// Trace level (most verbose).
    Trace = -8,
    /// Debug level.
    Debug = -4,
    /// Info level (default).
    Info = 0,
    /// Warning level.
    Warn = 4,
    /// Error level.
    Error = 8,
    /// Fatal level (least verbose).
    Fatal = 12,
}

impl Level {
    /// All levels, least severe first.
    pub const ALL: [Level; 6] = [
        Self::Trace,
        Self::Debug,
        Self::Info,
        Self::Warn,
        Self::Error,
        Self::Fatal,
    ];

    /// Returns the string representation of the level.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }

    /// Returns the uppercase string representation of the level.
    #[must_use]
    pub fn as_upper_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }

    /// Returns true if a record at `self` passes a `threshold` filter.
    #[must_use]
    pub fn is_at_least(&self, threshold: Level) -> bool {
        *self >= threshold
    }
}

impl PartialOrd for Level {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Level {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (*self as i32).cmp(&(*other as i32))
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        if level == tracing::Level::TRACE {
            Self::Trace
        } else if level == tracing::Level::DEBUG {
            Self::Debug
        } else if level == tracing::Level::INFO {
            Self::Info
        } else if level == tracing::Level::WARN {
            Self::Warn
        } else {
            Self::Error
        }
    }
}

/// Error returned when parsing an invalid log level string.
///
/// Accepted strings (case-insensitive): `"trace"`, `"debug"`, `"info"`,
/// `"warn"` (or `"warning"`), `"error"`, `"fatal"`.
///
/// # Example
///
/// ```rust
/// use trialkit_log::Level;
/// use std::str::FromStr;
///
/// assert!(Level::from_str("info").is_ok());
/// assert!(Level::from_str("INFO").is_ok());
/// assert!(Level::from_str("invalid").is_err());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid level: {0:?}")]
pub struct ParseLevelError(String);

impl ParseLevelError {
    /// The input that failed to parse.
    #[must_use]
    pub fn input(&self) -> &str {
        &self.0
    }
}

/// A specialized [`Result`] type for level parsing operations.
pub type ParseResult<T> = std::result::Result<T, ParseLevelError>;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        Level, LogSource, Logger, LoggerRegistry, Observer, ObserverId, Options, ParseLevelError,
        ParseResult, ROOT_LOGGER_NAME, Record, RegistryLayer, SourceResolver,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_level_display() {
        assert_eq!(Level::Trace.to_string(), "trace");
        assert_eq!(Level::Warn.to_string(), "warn");
        assert_eq!(Level::Fatal.as_upper_str(), "FATAL");
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::from_str("TRACE").unwrap(), Level::Trace);
        assert_eq!(Level::from_str(" warning ").unwrap(), Level::Warn);
        assert_eq!(Level::from_str("fatal").unwrap(), Level::Fatal);
        let err = Level::from_str("loud").unwrap_err();
        assert_eq!(err.input(), "loud");
    }

    #[test]
    fn test_is_at_least() {
        assert!(Level::Warn.is_at_least(Level::Warn));
        assert!(Level::Error.is_at_least(Level::Warn));
        assert!(!Level::Info.is_at_least(Level::Warn));
    }

    #[test]
    fn test_from_tracing_level() {
        assert_eq!(Level::from(tracing::Level::TRACE), Level::Trace);
        assert_eq!(Level::from(tracing::Level::DEBUG), Level::Debug);
        assert_eq!(Level::from(tracing::Level::INFO), Level::Info);
        assert_eq!(Level::from(tracing::Level::WARN), Level::Warn);
        assert_eq!(Level::from(tracing::Level::ERROR), Level::Error);
    }

    #[test]
    fn test_level_serde_lowercase() {
        let json = serde_json::to_string(&Level::Warn).unwrap();
        assert_eq!(json, "\"warn\"");
        let back: Level = serde_json::from_str("\"fatal\"").unwrap();
        assert_eq!(back, Level::Fatal);
    }
}
