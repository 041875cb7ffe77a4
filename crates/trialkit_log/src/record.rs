//! Immutable log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Level;

/// A single log event as delivered to observers.
///
/// Records are immutable: observers receive `&Record` and must clone it to
/// keep it, so a stored copy can never be changed by the code that logged it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    level: Level,
    message: String,
    logger_name: String,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    fields: Vec<(String, String)>,
}

impl Record {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(level: Level, logger_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::at(level, logger_name, message, Utc::now())
    }

    /// Creates a record with an explicit timestamp.
    #[must_use]
    pub fn at(
        level: Level,
        logger_name: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            level,
            message: message.into(),
            logger_name: logger_name.into(),
            timestamp,
            fields: Vec::new(),
        }
    }

    /// Returns a copy of this record with the given key/value fields appended.
    #[must_use]
    pub fn with_fields<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.fields
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Severity of the record.
    #[must_use]
    pub fn level(&self) -> Level {
        self.level
    }

    /// Rendered message text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Name of the logger that emitted the record.
    #[must_use]
    pub fn logger_name(&self) -> &str {
        &self.logger_name
    }

    /// When the record was created.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Structured key/value pairs, in the order they were logged.
    #[must_use]
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Looks up a field value by key.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
