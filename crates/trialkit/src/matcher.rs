//! Structured comparison of classified errors.
//!
//! [`check_error`] compares what a piece of code raised against an
//! [`ExpectedError`] and returns an [`AssertionFailure`] that spells out the
//! expected and the actual value for the first mismatch it finds.
//!
//! ```rust
//! use trialkit::matcher::{ExpectedError, RaisedError, check_error};
//!
//! let raised = RaisedError::new("DIVIDE_BY_ZERO", "22012", "Division by zero")
//!     .parameter("config", "\"spark.sql.ansi.enabled\"");
//! let expected = ExpectedError::new("DIVIDE_BY_ZERO")
//!     .sql_state("22012")
//!     .parameter("config", "\"spark.sql.ansi.enabled\"");
//! assert!(check_error(&raised, &expected).is_ok());
//! ```

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// An error carrying a class/subclass/state/parameter taxonomy.
pub trait ClassifiedError {
    /// Top-level error class, e.g. `DIVIDE_BY_ZERO`.
    fn error_class(&self) -> &str;

    /// Optional refinement of the class.
    fn error_sub_class(&self) -> Option<&str>;

    /// Five-character state code, e.g. `22012`.
    fn sql_state(&self) -> &str;

    /// Parameter names, parallel to [`parameter_values`](Self::parameter_values).
    fn parameter_names(&self) -> &[String];

    /// Parameter values, parallel to [`parameter_names`](Self::parameter_names).
    fn parameter_values(&self) -> &[String];
}

/// A concrete classified error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{}] {message} SQLSTATE: {sql_state}", qualified_class(.error_class, .error_sub_class))]
pub struct RaisedError {
    error_class: String,
    error_sub_class: Option<String>,
    sql_state: String,
    message: String,
    parameter_names: Vec<String>,
    parameter_values: Vec<String>,
}

fn qualified_class(class: &str, sub_class: &Option<String>) -> String {
    match sub_class {
        Some(sub) => format!("{class}.{sub}"),
        None => class.to_string(),
    }
}

impl RaisedError {
    /// Creates an error with no subclass and no parameters.
    #[must_use]
    pub fn new(
        error_class: impl Into<String>,
        sql_state: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error_class: error_class.into(),
            error_sub_class: None,
            sql_state: sql_state.into(),
            message: message.into(),
            parameter_names: Vec::new(),
            parameter_values: Vec::new(),
        }
    }

    /// Sets the subclass.
    #[must_use]
    pub fn sub_class(mut self, sub_class: impl Into<String>) -> Self {
        self.error_sub_class = Some(sub_class.into());
        self
    }

    /// Appends a parameter.
    #[must_use]
    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameter_names.push(name.into());
        self.parameter_values.push(value.into());
        self
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl ClassifiedError for RaisedError {
    fn error_class(&self) -> &str {
        &self.error_class
    }

    fn error_sub_class(&self) -> Option<&str> {
        self.error_sub_class.as_deref()
    }

    fn sql_state(&self) -> &str {
        &self.sql_state
    }

    fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    fn parameter_values(&self) -> &[String] {
        &self.parameter_values
    }
}

/// What a test expects a classified error to look like.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectedError {
    error_class: String,
    error_sub_class: Option<String>,
    sql_state: Option<String>,
    parameters: BTreeMap<String, String>,
    match_as_pattern: bool,
}

impl ExpectedError {
    /// Expects the given class, any state, and no parameters.
    #[must_use]
    pub fn new(error_class: impl Into<String>) -> Self {
        Self {
            error_class: error_class.into(),
            ..Self::default()
        }
    }

    /// Expects a subclass.
    #[must_use]
    pub fn sub_class(mut self, sub_class: impl Into<String>) -> Self {
        self.error_sub_class = Some(sub_class.into());
        self
    }

    /// Expects a state code. Without this the state is not checked.
    #[must_use]
    pub fn sql_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }

    /// Expects a parameter. In pattern mode `value` is a regular expression.
    #[must_use]
    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Expects all of the given parameters.
    #[must_use]
    pub fn parameters<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.parameters
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Treats expected parameter values as regular expressions that must
    /// match the whole raised value.
    #[must_use]
    pub fn match_as_pattern(mut self, enabled: bool) -> Self {
        self.match_as_pattern = enabled;
        self
    }

    /// Expected parameters.
    #[must_use]
    pub fn expected_parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }
}

/// A classified error did not match its expectation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssertionFailure {
    /// Error classes differ.
    #[error("error class mismatch: expected {expected:?} but found {actual:?}")]
    ErrorClass {
        /// Expected class.
        expected: String,
        /// Raised class.
        actual: String,
    },

    /// The raised error has a subclass and the expectation names a different one, or none.
    #[error("error subclass mismatch: expected {} but found {actual:?}", render_option(.expected))]
    SubClass {
        /// Expected subclass, if any.
        expected: Option<String>,
        /// Raised subclass.
        actual: String,
    },

    /// State codes differ.
    #[error("SQLSTATE mismatch: expected {expected:?} but found {actual:?}")]
    SqlState {
        /// Expected state.
        expected: String,
        /// Raised state.
        actual: String,
    },

    /// The raised error's name and value sequences have different lengths.
    #[error("raised error has {names} parameter names but {values} parameter values")]
    ParameterArity {
        /// Number of names.
        names: usize,
        /// Number of values.
        values: usize,
    },

    /// Exact parameter comparison failed.
    #[error(
        "parameters mismatch: expected {} but found {}",
        render_map(.expected),
        render_map(.actual)
    )]
    Parameters {
        /// Expected parameters.
        expected: BTreeMap<String, String>,
        /// Raised parameters.
        actual: BTreeMap<String, String>,
    },

    /// The raised error has a parameter the expectation does not mention.
    #[error("missing expectation for parameter {key:?} (raised value {actual:?})")]
    MissingExpectation {
        /// Parameter name.
        key: String,
        /// Raised value.
        actual: String,
    },

    /// Pattern mode: the expectation names parameters the raised error lacks.
    #[error("parameter names mismatch: expected {expected:?} but found {actual:?}")]
    ParameterKeys {
        /// Expected names, sorted.
        expected: Vec<String>,
        /// Raised names, sorted.
        actual: Vec<String>,
    },

    /// Pattern mode: a raised value does not match its expected pattern.
    #[error("parameter {key:?} mismatch: expected pattern {pattern:?} but found {actual:?}")]
    PatternMismatch {
        /// Parameter name.
        key: String,
        /// Expected pattern.
        pattern: String,
        /// Raised value.
        actual: String,
    },

    /// Pattern mode: an expected value is not a valid regular expression.
    #[error("parameter {key:?} has invalid pattern {pattern:?}")]
    InvalidPattern {
        /// Parameter name.
        key: String,
        /// The rejected pattern.
        pattern: String,
        /// Why the pattern failed to compile.
        #[source]
        source: regex::Error,
    },
}

fn render_option(value: &Option<String>) -> String {
    match value {
        Some(v) => format!("{v:?}"),
        None => "<none>".to_string(),
    }
}

fn render_map(map: &BTreeMap<String, String>) -> String {
    let body: Vec<String> = map.iter().map(|(k, v)| format!("{k}={v:?}")).collect();
    format!("{{{}}}", body.join(", "))
}

/// Compares a raised classified error with an expectation.
///
/// Checks run in order (class, subclass, state, parameters) and the first
/// mismatch is returned.
///
/// # Errors
///
/// Returns the [`AssertionFailure`] describing the first mismatch.
pub fn check_error<E>(raised: &E, expected: &ExpectedError) -> Result<(), AssertionFailure>
where
    E: ClassifiedError + ?Sized,
{
    if raised.error_class() != expected.error_class {
        return Err(AssertionFailure::ErrorClass {
            expected: expected.error_class.clone(),
            actual: raised.error_class().to_string(),
        });
    }

    if let Some(actual) = raised.error_sub_class() {
        if expected.error_sub_class.as_deref() != Some(actual) {
            return Err(AssertionFailure::SubClass {
                expected: expected.error_sub_class.clone(),
                actual: actual.to_string(),
            });
        }
    }

    if let Some(state) = &expected.sql_state {
        if raised.sql_state() != state {
            return Err(AssertionFailure::SqlState {
                expected: state.clone(),
                actual: raised.sql_state().to_string(),
            });
        }
    }

    let actual = raised_parameters(raised)?;
    if expected.match_as_pattern {
        check_patterns(&actual, &expected.parameters)
    } else if actual != expected.parameters {
        Err(AssertionFailure::Parameters {
            expected: expected.parameters.clone(),
            actual,
        })
    } else {
        Ok(())
    }
}

/// Like [`check_error`], but panics with the diagnostic.
///
/// # Panics
///
/// Panics when the raised error does not match.
#[track_caller]
pub fn assert_error<E>(raised: &E, expected: &ExpectedError)
where
    E: ClassifiedError + ?Sized,
{
    if let Err(failure) = check_error(raised, expected) {
        panic!("{failure}");
    }
}

fn raised_parameters<E>(raised: &E) -> Result<BTreeMap<String, String>, AssertionFailure>
where
    E: ClassifiedError + ?Sized,
{
    let names = raised.parameter_names();
    let values = raised.parameter_values();
    if names.len() != values.len() {
        return Err(AssertionFailure::ParameterArity {
            names: names.len(),
            values: values.len(),
        });
    }
    Ok(names.iter().cloned().zip(values.iter().cloned()).collect())
}

fn check_patterns(
    actual: &BTreeMap<String, String>,
    expected: &BTreeMap<String, String>,
) -> Result<(), AssertionFailure> {
    for (key, value) in actual {
        if !expected.contains_key(key) {
            return Err(AssertionFailure::MissingExpectation {
                key: key.clone(),
                actual: value.clone(),
            });
        }
    }

    if actual.len() != expected.len() {
        return Err(AssertionFailure::ParameterKeys {
            expected: expected.keys().cloned().collect(),
            actual: actual.keys().cloned().collect(),
        });
    }

    for (key, pattern) in expected {
        let Some(value) = actual.get(key) else {
            continue;
        };
        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
            AssertionFailure::InvalidPattern {
                key: key.clone(),
                pattern: pattern.clone(),
                source,
            }
        })?;
        if !regex.is_match(value) {
            return Err(AssertionFailure::PatternMismatch {
                key: key.clone(),
                pattern: pattern.clone(),
                actual: value.clone(),
            });
        }
    }
    Ok(())
}

impl fmt::Display for ExpectedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            qualified_class(&self.error_class, &self.error_sub_class)
        )?;
        if let Some(state) = &self.sql_state {
            write!(f, " SQLSTATE: {state}")?;
        }
        if !self.parameters.is_empty() {
            write!(f, " {}", render_map(&self.parameters))?;
        }
        Ok(())
    }
}
