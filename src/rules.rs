//! Per-field validation rules.
//!
//! Every constraint is normalized into a [`RuleValue`] carrying the constraint
//! and the message reported when it fails. Setters accept either the bare
//! constraint (empty message) or a `(constraint, message)` pair:
//!
//! ```ignore
//! let rules = Rules::new()
//!     .required("Last name is required")
//!     .max_length((5, "At most five characters"))
//!     .pattern(Regex::new("^[A-Za-z]+$")?);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::error::ErrorKind;
use crate::path::FieldPath;
use crate::validation::Check;

/// A constraint together with its failure message.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleValue<T> {
    /// The constraint itself.
    pub value: T,
    /// Message stored in the field error; may be empty.
    pub message: String,
}

impl<T> RuleValue<T> {
    /// Constraint with a message.
    pub fn new(value: T, message: impl Into<String>) -> Self {
        Self {
            value,
            message: message.into(),
        }
    }

    /// Constraint without a message.
    pub fn bare(value: T) -> Self {
        Self::new(value, String::new())
    }
}

impl From<bool> for RuleValue<bool> {
    fn from(value: bool) -> Self {
        Self::bare(value)
    }
}

/// A message alone means "required, with this message".
impl From<&str> for RuleValue<bool> {
    fn from(message: &str) -> Self {
        Self::new(true, message)
    }
}

impl From<String> for RuleValue<bool> {
    fn from(message: String) -> Self {
        Self::new(true, message)
    }
}

impl From<(bool, &str)> for RuleValue<bool> {
    fn from((value, message): (bool, &str)) -> Self {
        Self::new(value, message)
    }
}

impl From<usize> for RuleValue<usize> {
    fn from(value: usize) -> Self {
        Self::bare(value)
    }
}

impl From<(usize, &str)> for RuleValue<usize> {
    fn from((value, message): (usize, &str)) -> Self {
        Self::new(value, message)
    }
}

impl From<Regex> for RuleValue<Regex> {
    fn from(value: Regex) -> Self {
        Self::bare(value)
    }
}

impl From<(Regex, &str)> for RuleValue<Regex> {
    fn from((value, message): (Regex, &str)) -> Self {
        Self::new(value, message)
    }
}

/// Limit used by the `min` and `max` rules.
///
/// Numbers compare numerically. Text limits are parsed as a number first and
/// as a date otherwise, so `"2024-01-01"` bounds a date input.
#[derive(Clone, Debug, PartialEq)]
pub enum Bound {
    /// Numeric limit.
    Number(f64),
    /// Date (or numeric text) limit.
    Text(String),
}

impl From<f64> for Bound {
    fn from(value: f64) -> Self {
        Bound::Number(value)
    }
}

impl From<i64> for Bound {
    fn from(value: i64) -> Self {
        Bound::Number(value as f64)
    }
}

impl From<i32> for Bound {
    fn from(value: i32) -> Self {
        Bound::Number(f64::from(value))
    }
}

impl From<&str> for Bound {
    fn from(value: &str) -> Self {
        Bound::Text(value.to_owned())
    }
}

macro_rules! bare_bound {
    ($($ty:ty),*) => {$(
        impl From<$ty> for RuleValue<Bound> {
            fn from(value: $ty) -> Self {
                Self::bare(value.into())
            }
        }
    )*};
}

bare_bound!(f64, i64, i32, &str);

impl From<Bound> for RuleValue<Bound> {
    fn from(value: Bound) -> Self {
        Self::bare(value)
    }
}

impl<B: Into<Bound>> From<(B, &str)> for RuleValue<Bound> {
    fn from((value, message): (B, &str)) -> Self {
        Self::new(value.into(), message)
    }
}

/// Outcome of a `validate` function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The value is acceptable.
    Pass,
    /// The value is rejected with this message.
    Fail(String),
}

impl From<bool> for Verdict {
    fn from(valid: bool) -> Self {
        if valid {
            Verdict::Pass
        } else {
            Verdict::Fail(String::new())
        }
    }
}

impl From<&str> for Verdict {
    fn from(message: &str) -> Self {
        Verdict::Fail(message.to_owned())
    }
}

impl From<String> for Verdict {
    fn from(message: String) -> Self {
        Verdict::Fail(message)
    }
}

impl From<Option<String>> for Verdict {
    fn from(message: Option<String>) -> Self {
        message.map_or(Verdict::Pass, Verdict::Fail)
    }
}

impl<E: fmt::Display> From<Result<(), E>> for Verdict {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Verdict::Pass,
            Err(err) => Verdict::Fail(err.to_string()),
        }
    }
}

type ValidateFn = dyn Fn(&Value, &Value) -> Check<Verdict> + Send + Sync;

/// A user validation function.
///
/// It receives the field's value and the whole form's values.
#[derive(Clone)]
pub struct Validator(Arc<ValidateFn>);

impl Validator {
    /// Synchronous validator.
    pub fn new<F, V>(f: F) -> Self
    where
        F: Fn(&Value, &Value) -> V + Send + Sync + 'static,
        V: Into<Verdict>,
    {
        Self(Arc::new(move |value, values| Check::Ready(f(value, values).into())))
    }

    /// Asynchronous validator. The future must own what it needs.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(&Value, &Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Verdict> + Send + 'static,
    {
        Self(Arc::new(move |value, values| {
            Check::Pending(Box::pin(f(value, values)))
        }))
    }

    pub(crate) fn call(&self, value: &Value, values: &Value) -> Check<Verdict> {
        (self.0)(value, values)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Validator(..)")
    }
}

type CoerceFn = dyn Fn(Value) -> Value + Send + Sync;

/// Rule set attached to a registered field.
#[derive(Clone, Default)]
pub struct Rules {
    pub(crate) required: Option<RuleValue<bool>>,
    pub(crate) min: Option<RuleValue<Bound>>,
    pub(crate) max: Option<RuleValue<Bound>>,
    pub(crate) min_length: Option<RuleValue<usize>>,
    pub(crate) max_length: Option<RuleValue<usize>>,
    pub(crate) pattern: Option<RuleValue<Regex>>,
    pub(crate) validate: Vec<(ErrorKind, Validator)>,
    pub(crate) value_as_number: bool,
    pub(crate) value_as_date: bool,
    pub(crate) set_value_as: Option<Arc<CoerceFn>>,
    pub(crate) disabled: bool,
    pub(crate) deps: Vec<FieldPath>,
    pub(crate) value: Option<Value>,
    pub(crate) should_unregister: Option<bool>,
}

impl Rules {
    /// No constraints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject empty values (`null`, `""`, `[]`, `false`).
    pub fn required(mut self, rule: impl Into<RuleValue<bool>>) -> Self {
        self.required = Some(rule.into()).filter(|rule| rule.value);
        self
    }

    /// Lower bound for numbers and dates.
    pub fn min(mut self, rule: impl Into<RuleValue<Bound>>) -> Self {
        self.min = Some(rule.into());
        self
    }

    /// Upper bound for numbers and dates.
    pub fn max(mut self, rule: impl Into<RuleValue<Bound>>) -> Self {
        self.max = Some(rule.into());
        self
    }

    /// Minimum length of a string (in characters) or array.
    pub fn min_length(mut self, rule: impl Into<RuleValue<usize>>) -> Self {
        self.min_length = Some(rule.into());
        self
    }

    /// Maximum length of a string (in characters) or array.
    pub fn max_length(mut self, rule: impl Into<RuleValue<usize>>) -> Self {
        self.max_length = Some(rule.into());
        self
    }

    /// Regular expression a non-empty string must match.
    pub fn pattern(mut self, rule: impl Into<RuleValue<Regex>>) -> Self {
        self.pattern = Some(rule.into());
        self
    }

    /// Add an unnamed validator; its failures have kind `validate`.
    pub fn validate(mut self, validator: Validator) -> Self {
        self.validate.push((ErrorKind::Validate, validator));
        self
    }

    /// Add a named validator; its failures carry `name` as their kind.
    pub fn validate_named(mut self, name: &str, validator: Validator) -> Self {
        self.validate.push((ErrorKind::from(name), validator));
        self
    }

    /// Read element values as numbers.
    pub fn value_as_number(mut self) -> Self {
        self.value_as_number = true;
        self
    }

    /// Read element values as dates.
    pub fn value_as_date(mut self) -> Self {
        self.value_as_date = true;
        self
    }

    /// Transform raw element values. Takes precedence over number and date
    /// coercion.
    pub fn set_value_as<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.set_value_as = Some(Arc::new(f));
        self
    }

    /// Exclude the field from validation and submission.
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Fields re-validated whenever this one is validated after a change.
    pub fn deps<I, P>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<FieldPath>,
    {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Initial value, used when neither a value nor a default exists yet.
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Override the form's unregister-on-unmount policy for this field.
    pub fn should_unregister(mut self, should_unregister: bool) -> Self {
        self.should_unregister = Some(should_unregister);
        self
    }

    /// True when any rule would have to run.
    pub fn has_validation(&self) -> bool {
        self.required.is_some()
            || self.min.is_some()
            || self.max.is_some()
            || self.min_length.is_some()
            || self.max_length.is_some()
            || self.pattern.is_some()
            || !self.validate.is_empty()
    }

    pub(crate) fn coerce(&self, raw: Value) -> Value {
        if let Some(set_value_as) = &self.set_value_as {
            return set_value_as(raw);
        }
        if self.value_as_number {
            return number_from(&raw).map_or(Value::Null, Value::from);
        }
        if self.value_as_date {
            return match raw.as_str().and_then(parse_date) {
                Some(date) => Value::String(date.and_utc().to_rfc3339()),
                None => Value::Null,
            };
        }
        raw
    }
}

impl fmt::Debug for Rules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rules")
            .field("required", &self.required)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("min_length", &self.min_length)
            .field("max_length", &self.max_length)
            .field("pattern", &self.pattern.as_ref().map(|p| p.value.as_str()))
            .field("validate", &self.validate.len())
            .field("disabled", &self.disabled)
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}

/// Numeric reading of a value: numbers as-is, non-empty numeric strings
/// parsed.
pub(crate) fn number_from(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts RFC 3339 timestamps, `YYYY-MM-DDTHH:MM[:SS]` and `YYYY-MM-DD`.
pub(crate) fn parse_date(text: &str) -> Option<chrono::NaiveDateTime> {
    let text = text.trim();
    if let Ok(date_time) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(date_time.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| chrono::NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}
