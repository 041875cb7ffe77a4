//! Harness configuration.
//!
//! [`HarnessConfig`] has sensible defaults, `with_*` builder methods, and can
//! be read from `TRIALKIT_*` environment variables:
//!
//! | Variable                      | Field                | Default               |
//! |-------------------------------|----------------------|-----------------------|
//! | `TRIALKIT_RETRY_ATTEMPTS`     | `retry_attempts`     | `1`                   |
//! | `TRIALKIT_CAPTURE_MAX_EVENTS` | `capture_max_events` | `1000`                |
//! | `TRIALKIT_CAPTURE_LEVEL`      | `capture_level`      | `info`                |
//! | `TRIALKIT_TIMEZONE`           | `timezone`           | `America/Los_Angeles` |
//! | `TRIALKIT_UTC_OFFSET`         | `utc_offset`         | `-08:00`              |
//! | `TRIALKIT_LOCALE`             | `locale`             | `en_US`               |
//! | `TRIALKIT_THREAD_AUDIT`       | `thread_audit`       | `false`               |

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use trialkit_log::Level;

use crate::error::ConfigurationError;

/// Environment variable for [`HarnessConfig::retry_attempts`].
pub const ENV_RETRY_ATTEMPTS: &str = "TRIALKIT_RETRY_ATTEMPTS";
/// Environment variable for [`HarnessConfig::capture_max_events`].
pub const ENV_CAPTURE_MAX_EVENTS: &str = "TRIALKIT_CAPTURE_MAX_EVENTS";
/// Environment variable for [`HarnessConfig::capture_level`].
pub const ENV_CAPTURE_LEVEL: &str = "TRIALKIT_CAPTURE_LEVEL";
/// Environment variable for [`HarnessConfig::timezone`].
pub const ENV_TIMEZONE: &str = "TRIALKIT_TIMEZONE";
/// Environment variable for [`HarnessConfig::utc_offset`].
pub const ENV_UTC_OFFSET: &str = "TRIALKIT_UTC_OFFSET";
/// Environment variable for [`HarnessConfig::locale`].
pub const ENV_LOCALE: &str = "TRIALKIT_LOCALE";
/// Environment variable for [`HarnessConfig::thread_audit`].
pub const ENV_THREAD_AUDIT: &str = "TRIALKIT_THREAD_AUDIT";

/// Settings shared by the retry harness, capture sinks and the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Attempts per test, including the first. `1` disables retry.
    pub retry_attempts: u32,
    /// Capacity of capture sinks built from this config.
    pub capture_max_events: usize,
    /// Threshold of capture sinks built from this config.
    pub capture_level: Level,
    /// Time zone name the process is normalized to.
    pub timezone: String,
    /// UTC offset used when rendering timestamps, e.g. `-08:00`.
    pub utc_offset: String,
    /// Locale the process is normalized to.
    pub locale: String,
    /// Whether the coordinator audits thread counts around each test.
    pub thread_audit: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 1,
            capture_max_events: 1000,
            capture_level: Level::Info,
            timezone: "America/Los_Angeles".to_string(),
            utc_offset: "-08:00".to_string(),
            locale: "en_US".to_string(),
            thread_audit: false,
        }
    }
}

impl HarnessConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads overrides from `TRIALKIT_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidSetting`] for malformed values.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads overrides through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidSetting`] for malformed values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_RETRY_ATTEMPTS) {
            config.retry_attempts = parse_setting(ENV_RETRY_ATTEMPTS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CAPTURE_MAX_EVENTS) {
            config.capture_max_events = parse_setting(ENV_CAPTURE_MAX_EVENTS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CAPTURE_LEVEL) {
            config.capture_level = parse_setting(ENV_CAPTURE_LEVEL, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TIMEZONE) {
            config.timezone = raw.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_UTC_OFFSET) {
            config.utc_offset = raw.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_LOCALE) {
            config.locale = raw.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_THREAD_AUDIT) {
            config.thread_audit = parse_flag(ENV_THREAD_AUDIT, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.retry_attempts == 0 {
            return Err(ConfigurationError::InvalidAttempts(0));
        }
        if self.capture_max_events == 0 {
            return Err(ConfigurationError::ZeroCapacity);
        }
        parse_utc_offset(&self.utc_offset)?;
        Ok(())
    }

    /// Sets the attempts per test.
    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Sets capture sink capacity.
    #[must_use]
    pub fn with_capture_max_events(mut self, max_events: usize) -> Self {
        self.capture_max_events = max_events;
        self
    }

    /// Sets capture sink threshold.
    #[must_use]
    pub fn with_capture_level(mut self, level: Level) -> Self {
        self.capture_level = level;
        self
    }

    /// Sets the time zone name and its UTC offset.
    #[must_use]
    pub fn with_timezone(mut self, name: impl Into<String>, utc_offset: impl Into<String>) -> Self {
        self.timezone = name.into();
        self.utc_offset = utc_offset.into();
        self
    }

    /// Sets the locale.
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Enables or disables the thread audit.
    #[must_use]
    pub fn with_thread_audit(mut self, enabled: bool) -> Self {
        self.thread_audit = enabled;
        self
    }
}

fn parse_setting<T>(key: &str, raw: &str) -> Result<T, ConfigurationError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|err: T::Err| ConfigurationError::InvalidSetting {
            key: key.to_string(),
            value: raw.to_string(),
            reason: err.to_string(),
        })
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigurationError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigurationError::InvalidSetting {
            key: key.to_string(),
            value: raw.to_string(),
            reason: "expected a boolean flag".to_string(),
        }),
    }
}

/// Parses `Z`, `+HH:MM`, `-HH:MM`, `+HHMM` or `-HH` into a fixed offset.
///
/// # Errors
///
/// Returns [`ConfigurationError::InvalidSetting`] if the text is not an offset
/// within +/-23:59.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset, ConfigurationError> {
    let invalid = |reason: &str| ConfigurationError::InvalidSetting {
        key: ENV_UTC_OFFSET.to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let text = raw.trim();
    if text.eq_ignore_ascii_case("z") || text.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| invalid("offset out of range"));
    }

    let (sign, rest) = match text.split_at_checked(1) {
        Some(("+", rest)) => (1, rest),
        Some(("-", rest)) => (-1, rest),
        _ => return Err(invalid("offset must start with '+' or '-'")),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) || !(digits.len() == 2 || digits.len() == 4) {
        return Err(invalid("expected HH, HHMM or HH:MM"));
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid("bad hours"))?;
    let minutes: i32 = if digits.len() == 4 {
        digits[2..].parse().map_err(|_| invalid("bad minutes"))?
    } else {
        0
    };
    if hours > 23 || minutes > 59 {
        return Err(invalid("offset out of range"));
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| invalid("offset out of range"))
}
