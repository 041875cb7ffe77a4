//! Thread leak auditing around tests.

use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;

/// Pre/post checks the coordinator runs around tests.
pub trait ThreadAudit: Send + Sync {
    /// Runs once, before the first test of the coordinator.
    fn before_all(&self) {}

    /// Runs after each test. Returns one note per suspected leak.
    fn after_test(&self, test: &str) -> Vec<String>;
}

/// Compares the process thread count against a baseline taken in
/// [`before_all`](ThreadAudit::before_all), by listing `/proc/self/task`.
///
/// On platforms without that directory the audit is a no-op.
#[derive(Debug)]
pub struct ProcThreadAudit {
    task_dir: PathBuf,
    baseline: Mutex<Option<usize>>,
}

impl Default for ProcThreadAudit {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcThreadAudit {
    /// Audits the current process.
    #[must_use]
    pub fn new() -> Self {
        Self::with_task_dir("/proc/self/task")
    }

    /// Audits by counting the entries of `task_dir`.
    #[must_use]
    pub fn with_task_dir(task_dir: impl Into<PathBuf>) -> Self {
        Self {
            task_dir: task_dir.into(),
            baseline: Mutex::new(None),
        }
    }

    /// Current thread count, if it can be read.
    #[must_use]
    pub fn thread_count(&self) -> Option<usize> {
        match fs::read_dir(&self.task_dir) {
            Ok(entries) => Some(entries.filter_map(Result::ok).count()),
            Err(err) => {
                tracing::debug!(dir = %self.task_dir.display(), error = %err, "thread count unavailable");
                None
            }
        }
    }

    /// Baseline recorded by `before_all`.
    #[must_use]
    pub fn baseline(&self) -> Option<usize> {
        *self.baseline.lock()
    }
}

impl ThreadAudit for ProcThreadAudit {
    fn before_all(&self) {
        let count = self.thread_count();
        *self.baseline.lock() = count;
        tracing::debug!(baseline = ?count, "thread audit baseline");
    }

    fn after_test(&self, test: &str) -> Vec<String> {
        let (Some(baseline), Some(now)) = (self.baseline(), self.thread_count()) else {
            return Vec::new();
        };
        if now > baseline {
            vec![format!(
                "{test}: {} thread(s) still running beyond the baseline of {baseline}",
                now - baseline
            )]
        } else {
            Vec::new()
        }
    }
}
