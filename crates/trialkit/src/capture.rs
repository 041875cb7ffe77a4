//! Bounded, level-filtered log capture.
//!
//! A [`CaptureSink`] is an [`Observer`] that keeps the records at or above its
//! threshold, up to a fixed capacity. [`CaptureSink::attach`] hooks it onto
//! one or more [`LogSource`]s and returns a [`CaptureGuard`]; dropping the
//! guard detaches the sink and puts back any level it overrode, even when the
//! test panics.
//!
//! Capacity is a hard limit. A test that logs past it is a runaway, so the
//! record that does not fit fails loudly instead of being dropped:
//! [`CaptureSink::append`] returns a [`CaptureOverflowError`], and on the
//! observer path the logging thread panics with that error.
//!
//! ```
//! use std::sync::Arc;
//! use trialkit::capture::CaptureSink;
//! use trialkit_log::{Level, LoggerRegistry};
//!
//! let registry = LoggerRegistry::new();
//! let sink = Arc::new(CaptureSink::new(100, Level::Warn).unwrap());
//! {
//!     let _guard = sink.attach(&registry, &["pager"], Some(Level::Debug)).unwrap();
//!     registry.logger("pager").warn("evicting dirty page", &[]);
//!     registry.logger("pager").debug("cache stats", &[]);
//! }
//! assert_eq!(sink.messages(), vec!["evicting dirty page".to_string()]);
//! ```

use parking_lot::Mutex;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use trialkit_log::{Level, LogSource, Observer, ObserverId, Record, SourceResolver};

use crate::config::HarnessConfig;
use crate::environment;
use crate::error::{CaptureOverflowError, ConfigurationError};
use crate::lifecycle::DiagnosticSource;

/// Thread-safe, bounded collector of log records.
#[derive(Debug)]
pub struct CaptureSink {
    max_events: usize,
    threshold: Level,
    // Cleared entries stay as `None` so they keep counting toward capacity.
    events: Mutex<Vec<Option<Record>>>,
    overflowed: AtomicBool,
}

impl CaptureSink {
    /// Creates a sink holding at most `max_events` records at or above `threshold`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::ZeroCapacity`] if `max_events` is zero.
    pub fn new(max_events: usize, threshold: Level) -> Result<Self, ConfigurationError> {
        if max_events == 0 {
            return Err(ConfigurationError::ZeroCapacity);
        }
        Ok(Self {
            max_events,
            threshold,
            events: Mutex::new(Vec::new()),
            overflowed: AtomicBool::new(false),
        })
    }

    /// Creates a sink sized and filtered from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::ZeroCapacity`] if the configured capacity is zero.
    pub fn from_config(config: &HarnessConfig) -> Result<Self, ConfigurationError> {
        Self::new(config.capture_max_events, config.capture_level)
    }

    /// Capacity.
    #[must_use]
    pub fn max_events(&self) -> usize {
        self.max_events
    }

    /// Minimum level retained.
    #[must_use]
    pub fn threshold(&self) -> Level {
        self.threshold
    }

    /// Offers a record to the sink.
    ///
    /// Returns `Ok(false)` when the record is below the threshold and
    /// `Ok(true)` when it was stored. Appends from concurrent threads are
    /// serialized, and each thread's records keep their relative order.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureOverflowError`] if storing the record would exceed
    /// capacity. The sink is left unchanged apart from its overflow flag.
    pub fn append(&self, record: &Record) -> Result<bool, CaptureOverflowError> {
        if !record.level().is_at_least(self.threshold) {
            return Ok(false);
        }
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            drop(events);
            self.overflowed.store(true, Ordering::Release);
            return Err(CaptureOverflowError {
                max_events: self.max_events,
                level: record.level(),
                logger: record.logger_name().to_string(),
                message: record.message().to_string(),
            });
        }
        events.push(Some(record.clone()));
        Ok(true)
    }

    /// Whether a record was ever rejected for lack of room.
    #[must_use]
    pub fn overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Acquire)
    }

    /// Copies of the retained records, in arrival order.
    #[must_use]
    pub fn events(&self) -> Vec<Record> {
        self.events.lock().iter().flatten().cloned().collect()
    }

    /// Messages of the retained records, in arrival order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .flatten()
            .map(|r| r.message().to_string())
            .collect()
    }

    /// Number of retained records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().iter().flatten().count()
    }

    /// Whether no records are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots used toward capacity, including cleared ones.
    #[must_use]
    pub fn slots_used(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether a record at exactly `level` has a message containing `needle`.
    #[must_use]
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.events
            .lock()
            .iter()
            .flatten()
            .any(|r| r.level() == level && r.message().contains(needle))
    }

    /// Number of retained records at or above `level`.
    #[must_use]
    pub fn count_at_least(&self, level: Level) -> usize {
        self.events
            .lock()
            .iter()
            .flatten()
            .filter(|r| r.level().is_at_least(level))
            .count()
    }

    /// Forgets the retained records.
    ///
    /// Cleared slots still count toward capacity, so clearing cannot be used
    /// to keep a runaway logger under its limit.
    pub fn clear(&self) {
        for slot in self.events.lock().iter_mut() {
            *slot = None;
        }
    }

    /// Retained records as JSON lines.
    #[must_use]
    pub fn to_jsonl(&self) -> String {
        let mut out = String::new();
        for record in self.events() {
            match serde_json::to_string(&record) {
                Ok(line) => {
                    out.push_str(&line);
                    out.push('\n');
                }
                Err(err) => {
                    tracing::warn!(error = %err, "could not serialize captured record");
                }
            }
        }
        out
    }

    /// Retained records as human-readable lines, timestamps in the normalized zone.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for record in self.events() {
            let _ = write!(
                out,
                "{} {:<5} [{}] {}",
                environment::format_timestamp(record.timestamp()),
                record.level().as_upper_str(),
                record.logger_name(),
                record.message()
            );
            for (key, value) in record.fields() {
                let _ = write!(out, " {key}={value}");
            }
            out.push('\n');
        }
        out
    }

    /// Attaches the sink to the sources named in `names`.
    ///
    /// An empty `names` means the resolver's root source. Names the resolver
    /// does not know are skipped with a warning. When `level_override` is set,
    /// each attached source's minimum level is replaced by it until the guard
    /// detaches, after which the prior level is restored exactly. A source
    /// that was inheriting its level goes back to inheriting. Overriding the
    /// root therefore reaches every named logger without a level of its own.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NoLogSources`] if nothing could be resolved.
    pub fn attach(
        self: &Arc<Self>,
        resolver: &dyn SourceResolver,
        names: &[&str],
        level_override: Option<Level>,
    ) -> Result<CaptureGuard, ConfigurationError> {
        let sources: Vec<(String, Arc<dyn LogSource>)> = if names.is_empty() {
            resolver
                .root_source()
                .map(|s| (s.source_name().to_string(), s))
                .into_iter()
                .collect()
        } else {
            names
                .iter()
                .filter_map(|name| match resolver.resolve(name) {
                    Some(source) => Some(((*name).to_string(), source)),
                    None => {
                        tracing::warn!(source = name, "log source not found; not capturing it");
                        None
                    }
                })
                .collect()
        };

        if sources.is_empty() {
            return Err(ConfigurationError::NoLogSources {
                requested: names.iter().map(|n| (*n).to_string()).collect(),
            });
        }

        let observer: Arc<dyn Observer> = Arc::clone(self) as Arc<dyn Observer>;
        let mut attachments = Vec::with_capacity(sources.len());
        for (name, source) in sources {
            let prior_level = level_override.map(|level| {
                let prior = source.explicit_level();
                source.set_level(level);
                prior
            });
            let id = source.add_observer(Arc::clone(&observer));
            tracing::debug!(source = %name, ?prior_level, "capture attached");
            attachments.push(Attachment {
                name,
                source: Arc::downgrade(&source),
                id,
                prior_level,
            });
        }

        Ok(CaptureGuard {
            sink: Arc::clone(self),
            attachments,
        })
    }
}

impl Observer for CaptureSink {
    fn observe(&self, record: &Record) {
        if let Err(err) = self.append(record) {
            panic!("{err}");
        }
    }
}

impl DiagnosticSource for CaptureSink {
    fn label(&self) -> String {
        format!(
            "captured logs ({} events at {} or above)",
            self.len(),
            self.threshold
        )
    }

    fn dump(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(self.render())
        }
    }
}

#[derive(Debug)]
struct Attachment {
    name: String,
    source: Weak<dyn LogSource>,
    id: ObserverId,
    /// `Some` when the level was overridden; holds the source's own level
    /// from before, `None` inside when it was inherited.
    prior_level: Option<Option<Level>>,
}

/// Keeps a [`CaptureSink`] attached; detaches on drop.
#[derive(Debug)]
#[must_use = "the sink detaches as soon as the guard is dropped"]
pub struct CaptureGuard {
    sink: Arc<CaptureSink>,
    attachments: Vec<Attachment>,
}

impl CaptureGuard {
    /// The attached sink.
    #[must_use]
    pub fn sink(&self) -> &Arc<CaptureSink> {
        &self.sink
    }

    /// Names of the sources still attached.
    #[must_use]
    pub fn source_names(&self) -> Vec<&str> {
        self.attachments.iter().map(|a| a.name.as_str()).collect()
    }

    /// Whether any source is still attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Detaches from every source and restores overridden levels.
    ///
    /// Safe to call more than once, and safe after a source has been dropped.
    pub fn detach(&mut self) {
        // Reverse order so a source attached twice ends at its original level.
        while let Some(attachment) = self.attachments.pop() {
            let Some(source) = attachment.source.upgrade() else {
                tracing::debug!(source = %attachment.name, "capture source already gone");
                continue;
            };
            source.remove_observer(attachment.id);
            if let Some(level) = attachment.prior_level {
                source.restore_level(level);
            }
            tracing::debug!(source = %attachment.name, "capture detached");
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Runs `body` with `sink` attached, detaching afterwards even if `body` panics.
///
/// # Errors
///
/// Returns the attach error; `body` does not run in that case.
pub fn with_capture<R>(
    sink: &Arc<CaptureSink>,
    resolver: &dyn SourceResolver,
    names: &[&str],
    level_override: Option<Level>,
    body: impl FnOnce(&CaptureSink) -> R,
) -> Result<R, ConfigurationError> {
    let guard = sink.attach(resolver, names, level_override)?;
    let result = body(guard.sink());
    drop(guard);
    Ok(result)
}
