//! Tracing setup for test binaries.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};
use trialkit_log::RegistryLayer;

/// Environment variable holding the `tracing` filter directive.
pub const LOG_ENV: &str = "TRIALKIT_LOG";

/// Filter used when [`LOG_ENV`] is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Target prefix of this crate's own `tracing` events.
///
/// These are printed but not forwarded into the registry. Retry notes reach
/// it once, through [`crate::retry::RETRY_LOGGER`].
pub const HARNESS_TARGET: &str = "trialkit";

/// Installs a global subscriber for tests.
///
/// Human-readable output goes through the test writer, so it is shown only
/// for failing tests, and is filtered by `TRIALKIT_LOG`. Every event outside
/// [`HARNESS_TARGET`] is also forwarded into
/// [`trialkit_log::LoggerRegistry::global`], where capture sinks can see it.
///
/// Returns `false` if a global subscriber was already installed. Safe to call
/// from every test.
pub fn init_test_tracing() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let installed = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer().with_filter(filter))
        .with(RegistryLayer::global().skip_target(HARNESS_TARGET))
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("test tracing installed");
    }
    installed
}
