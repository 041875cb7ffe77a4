//! `tracing` integration.
//!
//! [`RegistryLayer`] turns each `tracing` event into a [`Record`] and emits it
//! on the registry logger named after the event's target, or on the root
//! logger when no such logger exists. Code that logs with `tracing` macros is
//! then visible to any observer attached through the registry.
//!
//! Targets passed to [`RegistryLayer::skip_target`] are not forwarded. A
//! harness that reports on its own loggers skips its own module path so each
//! of its notes is observed once.

use std::fmt;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::Level;
use crate::record::Record;
use crate::registry::LoggerRegistry;

enum Target {
    Global,
    Shared(Arc<LoggerRegistry>),
}

/// A `tracing_subscriber` layer that forwards events into a [`LoggerRegistry`].
pub struct RegistryLayer {
    target: Target,
    skipped: Vec<String>,
}

impl RegistryLayer {
    /// Forwards into [`LoggerRegistry::global`].
    #[must_use]
    pub fn global() -> Self {
        Self {
            target: Target::Global,
            skipped: Vec::new(),
        }
    }

    /// Forwards into the given registry.
    #[must_use]
    pub fn new(registry: Arc<LoggerRegistry>) -> Self {
        Self {
            target: Target::Shared(registry),
            skipped: Vec::new(),
        }
    }

    /// Stops forwarding events whose target is `prefix` or a module below it.
    #[must_use]
    pub fn skip_target(mut self, prefix: impl Into<String>) -> Self {
        self.skipped.push(prefix.into());
        self
    }

    fn is_skipped(&self, target: &str) -> bool {
        self.skipped.iter().any(|prefix| {
            target
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
        })
    }

    fn registry(&self) -> &LoggerRegistry {
        match &self.target {
            Target::Global => LoggerRegistry::global(),
            Target::Shared(registry) => registry.as_ref(),
        }
    }
}

impl fmt::Debug for RegistryLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match self.target {
            Target::Global => "global",
            Target::Shared(_) => "shared",
        };
        f.debug_struct("RegistryLayer")
            .field("target", &target)
            .field("skipped", &self.skipped)
            .finish()
    }
}

/// Collects the `message` field and every other field as strings.
#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let rendered = format!("{value:?}");
        if field.name() == "message" {
            self.message = rendered;
        } else {
            self.fields.push((field.name().to_string(), rendered));
        }
    }
}

impl<S: Subscriber> Layer<S> for RegistryLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if self.is_skipped(meta.target()) {
            return;
        }
        let mut collector = FieldCollector::default();
        event.record(&mut collector);

        let registry = self.registry();
        let logger = registry
            .find(meta.target())
            .unwrap_or_else(|| registry.root());
        let record = Record::new(Level::from(*meta.level()), meta.target(), collector.message)
            .with_fields(collector.fields);
        logger.emit(record);
    }
}
