//! Process-wide time zone and locale normalization.
//!
//! The first call to [`normalize`] fixes the [`Environment`] for the rest of
//! the process. Later calls return the same value, and a differing request is
//! logged and ignored. Rendering code (capture dumps, JSON lines) reads it
//! through [`current`], so every test in a run sees timestamps in the same
//! zone regardless of the host machine.

use chrono::{DateTime, FixedOffset, Offset as _, Utc};
use once_cell::sync::OnceCell;
use std::fmt::Write as _;

use crate::config::{HarnessConfig, parse_utc_offset};
use crate::error::ConfigurationError;

static ENVIRONMENT: OnceCell<Environment> = OnceCell::new();

/// Timestamp format used when rendering records for humans.
pub const DUMP_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f %:z";

/// The normalized time zone and locale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    timezone: String,
    utc_offset: FixedOffset,
    locale: String,
}

impl Environment {
    /// Builds an environment from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured UTC offset is malformed.
    pub fn from_config(config: &HarnessConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            timezone: config.timezone.clone(),
            utc_offset: parse_utc_offset(&config.utc_offset)?,
            locale: config.locale.clone(),
        })
    }

    /// Time zone name.
    #[must_use]
    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    /// Offset applied to rendered timestamps.
    #[must_use]
    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    /// Locale name.
    #[must_use]
    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Converts a UTC timestamp into this environment's offset.
    #[must_use]
    pub fn localize(&self, timestamp: DateTime<Utc>) -> DateTime<FixedOffset> {
        timestamp.with_timezone(&self.utc_offset)
    }

    /// Renders a UTC timestamp in this environment's offset.
    #[must_use]
    pub fn format_timestamp(&self, timestamp: DateTime<Utc>) -> String {
        let mut out = String::new();
        if write!(out, "{}", self.localize(timestamp).format(DUMP_TIME_FORMAT)).is_err() {
            return self.localize(timestamp).to_rfc3339();
        }
        out
    }
}

impl Default for Environment {
    fn default() -> Self {
        let config = HarnessConfig::default();
        Self {
            timezone: config.timezone,
            utc_offset: parse_utc_offset(&config.utc_offset).unwrap_or_else(|_| Utc.fix()),
            locale: config.locale,
        }
    }
}

/// Normalizes the process environment once.
///
/// # Errors
///
/// Returns an error if the first normalization has a malformed UTC offset.
/// Once normalized, later calls always succeed.
pub fn normalize(config: &HarnessConfig) -> Result<&'static Environment, ConfigurationError> {
    if let Some(existing) = ENVIRONMENT.get() {
        warn_if_different(existing, config);
        return Ok(existing);
    }
    let requested = Environment::from_config(config)?;
    let mut installed_now = false;
    let env = ENVIRONMENT.get_or_init(|| {
        installed_now = true;
        requested
    });
    if installed_now {
        tracing::info!(
            timezone = env.timezone(),
            utc_offset = %env.utc_offset(),
            locale = env.locale(),
            "normalized test environment"
        );
    } else {
        warn_if_different(env, config);
    }
    Ok(env)
}

/// The normalized environment, if [`normalize`] has run.
#[must_use]
pub fn current() -> Option<&'static Environment> {
    ENVIRONMENT.get()
}

/// Renders a timestamp with the normalized environment, or the default one.
#[must_use]
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    match current() {
        Some(env) => env.format_timestamp(timestamp),
        None => Environment::default().format_timestamp(timestamp),
    }
}

fn warn_if_different(existing: &Environment, config: &HarnessConfig) {
    if existing.timezone != config.timezone || existing.locale != config.locale {
        tracing::warn!(
            active_timezone = existing.timezone(),
            active_locale = existing.locale(),
            requested_timezone = %config.timezone,
            requested_locale = %config.locale,
            "environment already normalized; ignoring different request"
        );
    }
}
