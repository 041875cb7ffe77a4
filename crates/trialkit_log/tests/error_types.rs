//! Unit tests for trialkit_log error types.
//!
//! Tests verify:
//! - Error creation
//! - Display formatting
//! - Clone derive
//! - FromStr integration
//! - Result type alias

use std::error::Error as StdError;
use std::str::FromStr;
use trialkit_log::{Level, ParseLevelError, ParseResult};

mod creation_tests {
    use super::*;

    #[test]
    fn test_parse_level_error_from_invalid_input() {
        let result = Level::from_str("invalid");
        assert!(result.is_err());
        let e = result.unwrap_err();
        assert!(matches!(e, ParseLevelError { .. }));
    }

    #[test]
    fn test_various_invalid_inputs() {
        let invalid_inputs = ["", "foobar", "123", "VERBOSE", "crit"];

        for input in invalid_inputs {
            let result = Level::from_str(input);
            assert!(result.is_err(), "Expected error for input: {}", input);
        }
    }
}

mod display_tests {
    use super::*;

    #[test]
    fn test_display_contains_invalid_value() {
        let e = Level::from_str("badlevel").unwrap_err();
        let msg = format!("{}", e);
        assert!(msg.contains("invalid level"));
        assert!(msg.contains("badlevel"));
    }

    #[test]
    fn test_debug_impl() {
        let e = Level::from_str("xyz").unwrap_err();
        let debug = format!("{:?}", e);
        assert!(debug.contains("ParseLevelError"));
    }
}

mod derive_tests {
    use super::*;

    #[test]
    fn test_clone_and_eq() {
        let e1 = Level::from_str("bad").unwrap_err();
        let e2 = e1.clone();
        assert_eq!(e1, e2);
        assert_eq!(e1.to_string(), e2.to_string());
    }

    #[test]
    fn test_no_source() {
        let e = Level::from_str("invalid").unwrap_err();
        assert!(e.source().is_none());
    }
}

mod valid_levels_tests {
    use super::*;

    #[test]
    fn test_valid_levels_any_case() {
        let valid = [
            "trace", "DEBUG", "Info", "wArN", "warning", "ERROR", "Fatal",
        ];

        for level in valid {
            let result = Level::from_str(level);
            assert!(result.is_ok(), "Expected OK for level: {}", level);
        }
    }

    #[test]
    fn test_display_roundtrip() {
        for level in Level::ALL {
            assert_eq!(Level::from_str(&level.to_string()).unwrap(), level);
        }
    }
}

mod result_tests {
    use super::*;

    fn parse_level(s: &str) -> ParseResult<Level> {
        Ok(Level::from_str(s)?)
    }

    #[test]
    fn test_parse_result_ok() {
        assert_eq!(parse_level("info").unwrap(), Level::Info);
    }

    #[test]
    fn test_parse_result_err() {
        assert!(parse_level("invalid").is_err());
    }
}
