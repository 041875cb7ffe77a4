//! Name-based logger lookup and the capability traits capture code relies on.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::Level;
use crate::logger::{Logger, Observer, ObserverId, Options};

/// Name under which the registry's root logger is known.
pub const ROOT_LOGGER_NAME: &str = "root";

/// A log source that observers can be attached to.
///
/// This is the whole surface capture code needs: observer management plus
/// get/set of the minimum level. A source may inherit its effective level from
/// an ancestor; [`explicit_level`](Self::explicit_level) and
/// [`restore_level`](Self::restore_level) let an override be undone without
/// pinning the inherited value.
pub trait LogSource: Send + Sync {
    /// Identifier of the source.
    fn source_name(&self) -> &str;

    /// Attaches an observer.
    fn add_observer(&self, observer: Arc<dyn Observer>) -> ObserverId;

    /// Detaches an observer, returning false if it was not attached.
    fn remove_observer(&self, id: ObserverId) -> bool;

    /// Effective minimum level.
    fn level(&self) -> Level;

    /// The level set on this source itself, `None` when inherited.
    fn explicit_level(&self) -> Option<Level>;

    /// Replaces the minimum level.
    fn set_level(&self, level: Level);

    /// Puts back a value previously read from [`explicit_level`](Self::explicit_level).
    fn restore_level(&self, level: Option<Level>);
}

impl LogSource for Logger {
    fn source_name(&self) -> &str {
        Logger::name(self)
    }

    fn add_observer(&self, observer: Arc<dyn Observer>) -> ObserverId {
        Logger::add_observer(self, observer)
    }

    fn remove_observer(&self, id: ObserverId) -> bool {
        Logger::remove_observer(self, id)
    }

    fn level(&self) -> Level {
        Logger::level(self)
    }

    fn explicit_level(&self) -> Option<Level> {
        Logger::explicit_level(self)
    }

    fn set_level(&self, level: Level) {
        Logger::set_level(self, level);
    }

    fn restore_level(&self, level: Option<Level>) {
        match level {
            Some(level) => Logger::set_level(self, level),
            None => Logger::inherit_level(self),
        }
    }
}

/// Resolves source names to [`LogSource`]s.
pub trait SourceResolver: Send + Sync {
    /// Looks up a named source.
    fn resolve(&self, name: &str) -> Option<Arc<dyn LogSource>>;

    /// The root/default source, if the resolver has one.
    fn root_source(&self) -> Option<Arc<dyn LogSource>>;
}

static GLOBAL: Lazy<LoggerRegistry> = Lazy::new(LoggerRegistry::new);

/// Registry of named loggers sharing one root.
///
/// Every named logger is a child of the root: it follows the root's level
/// until given its own, and records it accepts are also delivered to the
/// root's observers unless the logger is made non-additive.
pub struct LoggerRegistry {
    root: Arc<Logger>,
    loggers: RwLock<HashMap<String, Arc<Logger>>>,
    defaults: Options,
    create_on_resolve: bool,
}

impl Default for LoggerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoggerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerRegistry")
            .field("root", &self.root)
            .field("loggers", &self.names())
            .field("create_on_resolve", &self.create_on_resolve)
            .finish()
    }
}

impl LoggerRegistry {
    /// Creates a registry that creates loggers on first lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::with_defaults(Options::default())
    }

    /// Creates a registry whose resolver only returns loggers that already exist.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            create_on_resolve: false,
            ..Self::new()
        }
    }

    /// Creates a registry whose new loggers start from `defaults`.
    #[must_use]
    pub fn with_defaults(defaults: Options) -> Self {
        Self {
            root: Arc::new(Logger::with_options(ROOT_LOGGER_NAME, defaults.clone())),
            loggers: RwLock::new(HashMap::new()),
            defaults,
            create_on_resolve: true,
        }
    }

    /// Process-wide registry.
    #[must_use]
    pub fn global() -> &'static LoggerRegistry {
        &GLOBAL
    }

    /// The root logger.
    #[must_use]
    pub fn root(&self) -> Arc<Logger> {
        Arc::clone(&self.root)
    }

    /// Returns the logger called `name`, creating it if needed.
    ///
    /// An empty name or [`ROOT_LOGGER_NAME`] returns the root logger.
    #[must_use]
    pub fn logger(&self, name: &str) -> Arc<Logger> {
        if is_root_name(name) {
            return self.root();
        }
        if let Some(existing) = self.find(name) {
            return existing;
        }
        let mut loggers = self.loggers.write().unwrap_or_else(|e| e.into_inner());
        let logger = loggers.entry(name.to_string()).or_insert_with(|| {
            Arc::new(Logger::child_of(
                name,
                self.defaults.clone(),
                Arc::clone(&self.root),
            ))
        });
        Arc::clone(logger)
    }

    /// Returns the logger called `name` if it exists.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<Arc<Logger>> {
        if is_root_name(name) {
            return Some(self.root());
        }
        self.loggers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Removes a named logger from the registry. The root cannot be removed.
    pub fn remove(&self, name: &str) -> Option<Arc<Logger>> {
        if is_root_name(name) {
            return None;
        }
        self.loggers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
    }

    /// Names of all registered loggers (excluding the root), sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .loggers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl SourceResolver for LoggerRegistry {
    fn resolve(&self, name: &str) -> Option<Arc<dyn LogSource>> {
        let logger = if self.create_on_resolve {
            Some(self.logger(name))
        } else {
            self.find(name)
        };
        logger.map(|l| l as Arc<dyn LogSource>)
    }

    fn root_source(&self) -> Option<Arc<dyn LogSource>> {
        Some(self.root() as Arc<dyn LogSource>)
    }
}

fn is_root_name(name: &str) -> bool {
    name.is_empty() || name == ROOT_LOGGER_NAME
}
