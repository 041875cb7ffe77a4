//! Property-based tests for retry counting and capture bounds.
//!
//! Invariants:
//! - k failures then success within n attempts gives exactly k resets
//! - An always-failing body runs n times, resets n-1 times, and returns the nth error
//! - A sink never holds more than its capacity, and keeps exactly the
//!   qualifying records that fit

use proptest::prelude::*;
use std::cell::Cell;
use std::sync::Arc;
use trialkit::prelude::*;
use trialkit::retry::RETRY_LOGGER;
use trialkit_log::{Level, Logger, Record};

fn retry(attempts: u32) -> Retry {
    Retry::with_logger(attempts, Arc::new(Logger::new(RETRY_LOGGER))).unwrap()
}

fn level_strategy() -> impl Strategy<Value = Level> {
    prop::sample::select(Level::ALL.to_vec())
}

// ===========================================================================
// Retry
// ===========================================================================

proptest! {
    #[test]
    fn k_failures_then_success_resets_k_times(n in 1u32..12, k_seed in 0u32..12) {
        let k = k_seed % n;
        let calls = Cell::new(0u32);
        let resets = Cell::new(0u32);

        let (result, attempts) = retry(n).run_counted(
            || {
                resets.set(resets.get() + 1);
                Ok::<(), String>(())
            },
            || {
                calls.set(calls.get() + 1);
                if calls.get() <= k { Err(format!("fail {}", calls.get())) } else { Ok(calls.get()) }
            },
        );

        prop_assert_eq!(result, Ok(k + 1));
        prop_assert_eq!(attempts, k + 1);
        prop_assert_eq!(resets.get(), k);
    }

    #[test]
    fn always_failing_returns_last_error(n in 1u32..12) {
        let calls = Cell::new(0u32);
        let resets = Cell::new(0u32);

        let result: Result<(), String> = retry(n).run(
            || {
                resets.set(resets.get() + 1);
                Ok(())
            },
            || {
                calls.set(calls.get() + 1);
                Err(format!("fail {}", calls.get()))
            },
        );

        prop_assert_eq!(result, Err(format!("fail {n}")));
        prop_assert_eq!(calls.get(), n);
        prop_assert_eq!(resets.get(), n - 1);
    }
}

// ===========================================================================
// Capture
// ===========================================================================

proptest! {
    #[test]
    fn sink_never_exceeds_capacity(
        max_events in 1usize..20,
        threshold in level_strategy(),
        levels in prop::collection::vec(level_strategy(), 0..60),
    ) {
        let sink = CaptureSink::new(max_events, threshold).unwrap();
        let mut expected = Vec::new();
        let mut rejected = 0usize;

        for (i, level) in levels.iter().enumerate() {
            let record = Record::new(*level, "prop", i.to_string());
            match sink.append(&record) {
                Ok(true) => expected.push(i.to_string()),
                Ok(false) => {
                    prop_assert!(!level.is_at_least(threshold));
                }
                Err(err) => {
                    prop_assert_eq!(err.max_events, max_events);
                    rejected += 1;
                }
            }
            prop_assert!(sink.len() <= max_events);
        }

        let qualifying = levels.iter().filter(|l| l.is_at_least(threshold)).count();
        prop_assert_eq!(expected.len(), qualifying.min(max_events));
        prop_assert_eq!(rejected, qualifying.saturating_sub(max_events));
        prop_assert_eq!(sink.messages(), expected);
        prop_assert_eq!(sink.overflowed(), rejected > 0);
    }
}
