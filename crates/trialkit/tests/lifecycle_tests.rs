//! Coordinator lifecycle ordering and failure reporting.
//!
//! Tests cover:
//! - Tear-down failures never mask body failures
//! - Set-up failures skip the body but still tear down
//! - A reset whose tear-down failed is not torn down a second time
//! - Panicking bodies are torn down, dumped and re-raised
//! - Diagnostic dumps include captured logs only when a test fails
//! - The thread audit baseline is taken once per coordinator

use parking_lot::Mutex;
use std::io::{self, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use trialkit::prelude::*;
use trialkit::retry::RETRY_LOGGER;
use trialkit_log::{Level, Logger, LoggerRegistry};

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Scripted {
    calls: Vec<&'static str>,
    fail_set_up: bool,
    fail_tear_down: bool,
}

impl Fixture for Scripted {
    type Error = String;

    fn name(&self) -> &str {
        "scripted"
    }

    fn set_up(&mut self) -> Result<(), String> {
        self.calls.push("set_up");
        if self.fail_set_up {
            Err("set-up exploded".to_string())
        } else {
            Ok(())
        }
    }

    fn tear_down(&mut self) -> Result<(), String> {
        self.calls.push("tear_down");
        if self.fail_tear_down {
            Err("tear-down exploded".to_string())
        } else {
            Ok(())
        }
    }
}

fn coordinator(config: HarnessConfig, dump: &SharedBuf) -> Coordinator {
    Coordinator::new(config)
        .unwrap()
        .with_dump_output(dump.clone())
        .with_retry_logger(Arc::new(Logger::new(RETRY_LOGGER)))
}

mod ordering {
    use super::*;

    #[test]
    fn body_failure_wins_over_tear_down_failure() {
        let dump = SharedBuf::default();
        let mut fixture = Scripted {
            fail_tear_down: true,
            ..Scripted::default()
        };
        let failure = coordinator(HarnessConfig::default(), &dump)
            .run("masked", &mut fixture, |f, _| {
                f.calls.push("body");
                Err::<(), _>("body exploded".to_string())
            })
            .unwrap_err();

        assert!(matches!(failure, TestFailure::Body { attempts: 1, .. }));
        assert_eq!(failure.error().map(String::as_str), Some("body exploded"));
        assert_eq!(fixture.calls, vec!["set_up", "body", "tear_down"]);
    }

    #[test]
    fn tear_down_failure_surfaces_when_body_passes() {
        let dump = SharedBuf::default();
        let mut fixture = Scripted {
            fail_tear_down: true,
            ..Scripted::default()
        };
        let failure = coordinator(HarnessConfig::default(), &dump)
            .run("teardown", &mut fixture, |_, _| Ok(()))
            .unwrap_err();
        assert!(matches!(failure, TestFailure::TearDown { .. }));
        assert!(dump.text().contains("tear-down exploded"));
    }

    #[test]
    fn set_up_failure_skips_body_but_tears_down() {
        let dump = SharedBuf::default();
        let mut fixture = Scripted {
            fail_set_up: true,
            ..Scripted::default()
        };
        let failure = coordinator(HarnessConfig::default(), &dump)
            .run("setup", &mut fixture, |f, _| {
                f.calls.push("body");
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(failure, TestFailure::SetUp { .. }));
        assert_eq!(fixture.calls, vec!["set_up", "tear_down"]);
    }

    #[test]
    fn retries_reset_through_the_fixture() {
        let dump = SharedBuf::default();
        let mut fixture = Scripted::default();
        let config = HarnessConfig::default().with_retry_attempts(3);
        let attempts = coordinator(config, &dump)
            .run("flaky", &mut fixture, |f, scope| {
                f.calls.push("body");
                if scope.attempt() < 2 {
                    Err("flake".to_string())
                } else {
                    Ok(scope.attempt())
                }
            })
            .unwrap();
        assert_eq!(attempts, 2);
        assert_eq!(
            fixture.calls,
            vec!["set_up", "body", "tear_down", "set_up", "body", "tear_down"]
        );
        assert!(dump.text().is_empty());
    }

    #[test]
    fn failed_reset_tear_down_is_not_repeated() {
        let dump = SharedBuf::default();
        let mut fixture = Scripted {
            fail_tear_down: true,
            ..Scripted::default()
        };
        let failure = coordinator(HarnessConfig::default(), &dump)
            .run_with_retry("reset", 2, &mut fixture, |f, _| {
                f.calls.push("body");
                Err::<(), _>("flake".to_string())
            })
            .unwrap_err();

        assert!(matches!(failure, TestFailure::Reset { attempt: 1, .. }));
        assert_eq!(failure.error().map(String::as_str), Some("tear-down exploded"));
        assert_eq!(fixture.calls, vec!["set_up", "body", "tear_down"]);
    }

    #[test]
    fn single_shot_fixture_rejects_retry_before_running() {
        struct Suite(bool);
        impl Fixture for Suite {
            type Error = String;
            fn set_up(&mut self) -> Result<(), String> {
                self.0 = true;
                Ok(())
            }
            fn tear_down(&mut self) -> Result<(), String> {
                Ok(())
            }
            fn reset_support(&self) -> ResetSupport {
                ResetSupport::Once
            }
        }

        let dump = SharedBuf::default();
        let mut suite = Suite(false);
        let failure = coordinator(HarnessConfig::default(), &dump)
            .run_with_retry("suite", 2, &mut suite, |_, _| Ok(()))
            .unwrap_err();
        assert!(matches!(
            failure,
            TestFailure::Configuration(ConfigurationError::NonResettableLifecycle { .. })
        ));
        assert!(!suite.0, "set-up must not run on a configuration error");
    }

    #[test]
    fn panicking_body_is_torn_down_and_reraised() {
        let dump = SharedBuf::default();
        let mut fixture = Scripted::default();
        let coordinator = coordinator(HarnessConfig::default(), &dump);

        let result = catch_unwind(AssertUnwindSafe(|| {
            coordinator.run("panics", &mut fixture, |_, _| -> Result<(), String> {
                panic!("assertion inside body")
            })
        }));

        assert!(result.is_err());
        assert_eq!(fixture.calls, vec!["set_up", "tear_down"]);
        assert!(dump.text().contains("panicked: assertion inside body"));
    }
}

mod diagnostics {
    use super::*;

    #[test]
    fn failure_dump_includes_captured_logs() {
        let registry = LoggerRegistry::new();
        let sink = Arc::new(CaptureSink::new(50, Level::Warn).unwrap());
        let _guard = sink.attach(&registry, &["engine"], None).unwrap();
        let dump = SharedBuf::default();
        let coordinator =
            coordinator(HarnessConfig::default(), &dump).with_diagnostics(sink.clone());

        let mut fixture = NoFixture::<String>::new();
        let result = coordinator.run("dumps", &mut fixture, |_, _| {
            registry.logger("engine").warn("compaction stalled", &[("level", "3")]);
            Err::<(), _>("timed out".to_string())
        });

        assert!(result.is_err());
        let text = dump.text();
        assert!(text.contains("---- dumps failed"), "{text}");
        assert!(text.contains("captured logs"), "{text}");
        assert!(text.contains("[engine] compaction stalled level=3"), "{text}");
    }

    #[test]
    fn passing_test_writes_no_dump() {
        let registry = LoggerRegistry::new();
        let sink = Arc::new(CaptureSink::new(50, Level::Info).unwrap());
        let _guard = sink.attach(&registry, &["engine"], None).unwrap();
        let dump = SharedBuf::default();
        let coordinator =
            coordinator(HarnessConfig::default(), &dump).with_diagnostics(sink.clone());

        let mut fixture = NoFixture::<String>::new();
        coordinator
            .run("quiet", &mut fixture, |_, _| {
                registry.logger("engine").info("all good", &[]);
                Ok(())
            })
            .unwrap();
        assert!(dump.text().is_empty());
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn environment_is_normalized_by_first_run() {
        let dump = SharedBuf::default();
        let mut fixture = NoFixture::<String>::new();
        coordinator(HarnessConfig::default(), &dump)
            .run("env", &mut fixture, |_, _| Ok(()))
            .unwrap();
        let env = trialkit::environment::current().unwrap();
        assert_eq!(env.timezone(), "America/Los_Angeles");
        assert_eq!(env.locale(), "en_US");
    }
}

mod audit {
    use super::*;

    #[derive(Default)]
    struct CountingAudit {
        before: AtomicUsize,
        after: AtomicUsize,
    }

    impl ThreadAudit for CountingAudit {
        fn before_all(&self) {
            self.before.fetch_add(1, Ordering::SeqCst);
        }

        fn after_test(&self, test: &str) -> Vec<String> {
            self.after.fetch_add(1, Ordering::SeqCst);
            vec![format!("{test}: pretend leak")]
        }
    }

    #[test]
    fn baseline_once_and_check_after_every_test() {
        let audit = Arc::new(CountingAudit::default());
        let dump = SharedBuf::default();
        let coordinator =
            coordinator(HarnessConfig::default(), &dump).with_thread_audit(audit.clone());

        let mut fixture = NoFixture::<String>::new();
        for name in ["one", "two", "three"] {
            coordinator.run(name, &mut fixture, |_, _| Ok(())).unwrap();
        }
        let _ = coordinator.run("four", &mut fixture, |_, _| Err::<(), _>("x".to_string()));

        assert_eq!(audit.before.load(Ordering::SeqCst), 1);
        assert_eq!(audit.after.load(Ordering::SeqCst), 4);
    }
}
