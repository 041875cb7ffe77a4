//! Named loggers with observers and level inheritance.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::Level;
use crate::record::Record;

/// Receives every record a logger accepts.
///
/// Observers run on the thread that logged, after the logger has released its
/// own lock. An observer that panics unwinds into the logging call site.
pub trait Observer: Send + Sync {
    /// Called once per accepted record.
    fn observe(&self, record: &Record);
}

/// Handle identifying an attached observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

impl ObserverId {
    fn next() -> Self {
        Self(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Logger options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Minimum log level. Loggers created under a parent ignore this and
    /// inherit the parent's level until one is set explicitly.
    pub level: Level,
    /// Default fields to include in all records.
    pub fields: Vec<(String, String)>,
    /// Whether accepted records are also delivered to the parent's observers.
    pub additive: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            level: Level::Info,
            fields: Vec::new(),
            additive: true,
        }
    }
}

/// Internal logger state.
struct LoggerInner {
    /// `None` means the level is inherited from the parent.
    level: Option<Level>,
    fields: Vec<(String, String)>,
    observers: Vec<(ObserverId, Arc<dyn Observer>)>,
}

/// A named logger.
///
/// Loggers are shared as `Arc<Logger>`; the registry hands out clones of the
/// same `Arc` for the same name.
pub struct Logger {
    name: String,
    inner: RwLock<LoggerInner>,
    parent: Option<Arc<Logger>>,
    additive: AtomicBool,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("level", &inner.level)
            .field("observers", &inner.observers.len())
            .field("additive", &self.is_additive())
            .finish()
    }
}

impl Logger {
    /// Creates a standalone logger with default options and no parent.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_options(name, Options::default())
    }

    /// Creates a standalone logger with the given options.
    #[must_use]
    pub fn with_options(name: impl Into<String>, opts: Options) -> Self {
        let level = Some(opts.level);
        Self::build(name.into(), level, opts, None)
    }

    /// Creates a logger that inherits `parent`'s level and whose accepted
    /// records also reach `parent`'s observers.
    pub(crate) fn child_of(name: impl Into<String>, opts: Options, parent: Arc<Logger>) -> Self {
        Self::build(name.into(), None, opts, Some(parent))
    }

    fn build(name: String, level: Option<Level>, opts: Options, parent: Option<Arc<Logger>>) -> Self {
        Self {
            name,
            inner: RwLock::new(LoggerInner {
                level,
                fields: opts.fields,
                observers: Vec::new(),
            }),
            parent,
            additive: AtomicBool::new(opts.additive),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, LoggerInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, LoggerInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the logger's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the minimum log level, overriding any inherited one.
    pub fn set_level(&self, level: Level) {
        self.write().level = Some(level);
    }

    /// Drops this logger's own level so it follows its parent again.
    ///
    /// Has no effect on a logger without a parent.
    pub fn inherit_level(&self) {
        if self.parent.is_some() {
            self.write().level = None;
        }
    }

    /// The level set on this logger itself, if any.
    #[must_use]
    pub fn explicit_level(&self) -> Option<Level> {
        self.read().level
    }

    /// Returns the effective log level: this logger's own, or else the
    /// nearest ancestor's.
    #[must_use]
    pub fn level(&self) -> Level {
        if let Some(level) = self.explicit_level() {
            return level;
        }
        self.parent
            .as_ref()
            .map_or_else(|| Options::default().level, |parent| parent.level())
    }

    /// Returns true if a record at `level` would be accepted.
    #[must_use]
    pub fn is_enabled(&self, level: Level) -> bool {
        level >= self.level()
    }

    /// Sets whether accepted records also reach the parent's observers.
    pub fn set_additive(&self, additive: bool) {
        self.additive.store(additive, Ordering::Release);
    }

    /// Returns whether accepted records also reach the parent's observers.
    #[must_use]
    pub fn is_additive(&self) -> bool {
        self.additive.load(Ordering::Acquire)
    }

    /// Attaches an observer and returns its handle.
    pub fn add_observer(&self, observer: Arc<dyn Observer>) -> ObserverId {
        let id = ObserverId::next();
        self.write().observers.push((id, observer));
        id
    }

    /// Detaches an observer. Returns false if it was not attached.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut inner = self.write();
        let before = inner.observers.len();
        inner.observers.retain(|(existing, _)| *existing != id);
        inner.observers.len() != before
    }

    /// Number of attached observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.read().observers.len()
    }

    /// Logs a message at the specified level.
    pub fn log(&self, level: Level, msg: &str, keyvals: &[(&str, &str)]) {
        let record = Record::new(level, self.name.as_str(), msg)
            .with_fields(keyvals.iter().map(|(k, v)| (*k, *v)));
        self.emit(record);
    }

    /// Submits a pre-built record, subject to this logger's effective level.
    ///
    /// The logger's default fields are prepended to the record's own fields.
    pub fn emit(&self, record: Record) {
        if !self.is_enabled(record.level()) {
            return;
        }

        let (record, observers) = {
            let inner = self.read();
            let record = if inner.fields.is_empty() {
                record
            } else {
                let own = record.fields().to_vec();
                Record::at(
                    record.level(),
                    record.logger_name(),
                    record.message(),
                    record.timestamp(),
                )
                .with_fields(inner.fields.iter().cloned().chain(own))
            };
            let observers: Vec<Arc<dyn Observer>> = inner
                .observers
                .iter()
                .map(|(_, observer)| Arc::clone(observer))
                .collect();
            (record, observers)
        };

        for observer in &observers {
            observer.observe(&record);
        }
        self.propagate(&record);
    }

    fn propagate(&self, record: &Record) {
        if self.is_additive() {
            if let Some(parent) = &self.parent {
                parent.deliver(record);
            }
        }
    }

    /// Hands `record` to this logger's observers without a level check.
    fn deliver(&self, record: &Record) {
        let observers: Vec<Arc<dyn Observer>> = self
            .read()
            .observers
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in &observers {
            observer.observe(record);
        }
    }

    /// Logs a trace message.
    pub fn trace(&self, msg: &str, keyvals: &[(&str, &str)]) {
        self.log(Level::Trace, msg, keyvals);
    }

    /// Logs a debug message.
    pub fn debug(&self, msg: &str, keyvals: &[(&str, &str)]) {
        self.log(Level::Debug, msg, keyvals);
    }

    /// Logs an info message.
    pub fn info(&self, msg: &str, keyvals: &[(&str, &str)]) {
        self.log(Level::Info, msg, keyvals);
    }

    /// Logs a warning message.
    pub fn warn(&self, msg: &str, keyvals: &[(&str, &str)]) {
        self.log(Level::Warn, msg, keyvals);
    }

    /// Logs an error message.
    pub fn error(&self, msg: &str, keyvals: &[(&str, &str)]) {
        self.log(Level::Error, msg, keyvals);
    }

    /// Logs a fatal message. Does not exit the process.
    pub fn fatal(&self, msg: &str, keyvals: &[(&str, &str)]) {
        self.log(Level::Fatal, msg, keyvals);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Record>>);

    impl Observer for Collect {
        fn observe(&self, record: &Record) {
            self.0.lock().unwrap().push(record.clone());
        }
    }

    #[test]
    fn test_level_filters_observers() {
        let logger = Logger::new("t");
        let sink = Arc::new(Collect::default());
        logger.add_observer(sink.clone());
        logger.debug("hidden", &[]);
        logger.info("shown", &[]);
        let seen = sink.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message(), "shown");
    }

    #[test]
    fn test_remove_observer() {
        let logger = Logger::new("t");
        let sink = Arc::new(Collect::default());
        let id = logger.add_observer(sink.clone());
        assert_eq!(logger.observer_count(), 1);
        assert!(logger.remove_observer(id));
        assert!(!logger.remove_observer(id));
        logger.error("after removal", &[]);
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_default_fields_prepended() {
        let opts = Options {
            fields: vec![("suite".into(), "wal".into())],
            ..Options::default()
        };
        let logger = Logger::with_options("t", opts);
        let sink = Arc::new(Collect::default());
        logger.add_observer(sink.clone());
        logger.warn("x", &[("frame", "3")]);
        let seen = sink.0.lock().unwrap();
        assert_eq!(
            seen[0].fields(),
            &[
                ("suite".to_string(), "wal".to_string()),
                ("frame".to_string(), "3".to_string())
            ]
        );
    }

    #[test]
    fn test_additive_delivery_to_parent() {
        let root = Arc::new(Logger::new("root"));
        let root_sink = Arc::new(Collect::default());
        root.add_observer(root_sink.clone());
        root.set_level(Level::Fatal);

        let child = Logger::child_of("child", Options::default(), Arc::clone(&root));
        child.set_level(Level::Info);
        child.info("through", &[]);
        assert_eq!(root_sink.0.lock().unwrap().len(), 1);

        child.set_additive(false);
        child.info("blocked", &[]);
        assert_eq!(root_sink.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_child_follows_parent_level_until_set() {
        let root = Arc::new(Logger::new("root"));
        let child = Logger::child_of("child", Options::default(), Arc::clone(&root));
        assert_eq!(child.explicit_level(), None);
        assert_eq!(child.level(), Level::Info);

        root.set_level(Level::Debug);
        assert!(child.is_enabled(Level::Debug));

        child.set_level(Level::Error);
        root.set_level(Level::Trace);
        assert_eq!(child.level(), Level::Error);

        child.inherit_level();
        assert_eq!(child.level(), Level::Trace);
    }

    #[test]
    fn test_root_cannot_drop_its_level() {
        let root = Logger::new("root");
        root.set_level(Level::Warn);
        root.inherit_level();
        assert_eq!(root.explicit_level(), Some(Level::Warn));
    }
}
