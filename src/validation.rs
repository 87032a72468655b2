//! Built-in rule evaluation.
//!
//! Rules run in a fixed order: `required`, `min`/`max`, `max_length`/
//! `min_length`, `pattern`, then every `validate` function in insertion order.
//! The first failure wins unless [`CriteriaMode::All`] is set, in which case
//! every failure is recorded in [`FieldError::types`].
//!
//! Synchronous rules always run inline. The first validator returning
//! [`Check::Pending`] turns the whole evaluation into a future that awaits it
//! and the validators after it one by one.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::config::CriteriaMode;
use crate::error::{ErrorKind, FieldError};
use crate::path::FieldPath;
use crate::rules::{Bound, Rules, Verdict, number_from, parse_date};

/// A result that is either available now or still being computed.
pub enum Check<T> {
    /// Computed synchronously.
    Ready(T),
    /// Still running.
    Pending(BoxFuture<'static, T>),
}

impl<T: Send + 'static> Check<T> {
    /// True for [`Check::Ready`].
    pub fn is_ready(&self) -> bool {
        matches!(self, Check::Ready(_))
    }

    /// Transform the eventual result.
    pub fn map<U, F>(self, f: F) -> Check<U>
    where
        F: FnOnce(T) -> U + Send + 'static,
        U: Send + 'static,
    {
        match self {
            Check::Ready(value) => Check::Ready(f(value)),
            Check::Pending(future) => Check::Pending(Box::pin(async move { f(future.await) })),
        }
    }

    /// Wait for the result.
    pub async fn resolve(self) -> T {
        match self {
            Check::Ready(value) => value,
            Check::Pending(future) => future.await,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Check<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Check::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Everything needed to validate one field, owned so that evaluation can
/// outlive the form lock.
pub(crate) struct FieldCheck {
    pub(crate) name: FieldPath,
    pub(crate) rules: Arc<Rules>,
    pub(crate) value: Value,
    pub(crate) values: Arc<Value>,
    pub(crate) criteria_mode: CriteriaMode,
}

/// Collects failures according to the criteria mode.
struct Failures {
    all: bool,
    error: Option<FieldError>,
}

impl Failures {
    fn new(criteria_mode: CriteriaMode) -> Self {
        Self {
            all: criteria_mode == CriteriaMode::All,
            error: None,
        }
    }

    /// Record a failure. Returns true when evaluation should stop.
    fn push(&mut self, kind: ErrorKind, message: &str) -> bool {
        match &mut self.error {
            Some(error) => {
                error.types.insert(kind, message.to_owned());
            }
            None => {
                let mut error = FieldError::new(kind.clone(), message);
                if self.all {
                    error = error.with_type(kind, message);
                }
                self.error = Some(error);
            }
        }
        !self.all
    }

    fn verdict(&mut self, kind: ErrorKind, verdict: Verdict) -> bool {
        match verdict {
            Verdict::Pass => false,
            Verdict::Fail(message) => self.push(kind, &message),
        }
    }

    fn finish(self) -> Option<FieldError> {
        self.error
    }
}

/// Values the `required` rule rejects.
pub(crate) fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(checked) => !checked,
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn compare(value: &Value, bound: &Bound) -> Option<Ordering> {
    if let Some(number) = number_from(value) {
        let limit = match bound {
            Bound::Number(limit) => *limit,
            Bound::Text(text) => text.trim().parse().ok()?,
        };
        return number.partial_cmp(&limit);
    }
    let date = value.as_str().and_then(parse_date)?;
    match bound {
        Bound::Text(text) => Some(date.cmp(&parse_date(text)?)),
        Bound::Number(_) => None,
    }
}

fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(text) => Some(text.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

/// Evaluate a field's rules against its current value.
pub(crate) fn validate_field(check: FieldCheck) -> Check<Option<FieldError>> {
    let FieldCheck {
        name,
        rules,
        value,
        values,
        criteria_mode,
    } = check;
    let mut failures = Failures::new(criteria_mode);
    let empty = is_empty_value(&value) && !matches!(value, Value::Bool(_));

    if let Some(rule) = &rules.required {
        if is_empty_value(&value) && failures.push(ErrorKind::Required, &rule.message) {
            return Check::Ready(failures.finish());
        }
    }

    if !empty {
        if let Some(rule) = &rules.max {
            if compare(&value, &rule.value) == Some(Ordering::Greater)
                && failures.push(ErrorKind::Max, &rule.message)
            {
                return Check::Ready(failures.finish());
            }
        }
        if let Some(rule) = &rules.min {
            if compare(&value, &rule.value) == Some(Ordering::Less)
                && failures.push(ErrorKind::Min, &rule.message)
            {
                return Check::Ready(failures.finish());
            }
        }

        let len = length(&value);
        if let (Some(rule), Some(len)) = (&rules.max_length, len) {
            if len > rule.value && failures.push(ErrorKind::MaxLength, &rule.message) {
                return Check::Ready(failures.finish());
            }
        }
        if let (Some(rule), Some(len)) = (&rules.min_length, len) {
            if len < rule.value && failures.push(ErrorKind::MinLength, &rule.message) {
                return Check::Ready(failures.finish());
            }
        }

        if let (Some(rule), Some(text)) = (&rules.pattern, value.as_str()) {
            if !rule.value.is_match(text) && failures.push(ErrorKind::Pattern, &rule.message) {
                return Check::Ready(failures.finish());
            }
        }
    }

    let mut validators = rules.validate.clone().into_iter();
    while let Some((kind, validator)) = validators.next() {
        match validator.call(&value, &values) {
            Check::Ready(verdict) => {
                if failures.verdict(kind, verdict) {
                    return Check::Ready(failures.finish());
                }
            }
            Check::Pending(pending) => {
                tracing::trace!(field = %name, "validator suspended");
                let rest: Vec<_> = validators.collect();
                return Check::Pending(Box::pin(async move {
                    if failures.verdict(kind, pending.await) {
                        return failures.finish();
                    }
                    for (kind, validator) in rest {
                        let verdict = validator.call(&value, &values).resolve().await;
                        if failures.verdict(kind, verdict) {
                            return failures.finish();
                        }
                    }
                    failures.finish()
                }));
            }
        }
    }
    Check::Ready(failures.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Validator;
    use futures::executor::block_on;
    use regex::Regex;
    use serde_json::json;

    fn run(rules: Rules, value: Value, criteria_mode: CriteriaMode) -> Option<FieldError> {
        let check = FieldCheck {
            name: FieldPath::parse("field"),
            rules: Arc::new(rules),
            value,
            values: Arc::new(json!({})),
            criteria_mode,
        };
        block_on(validate_field(check).resolve())
    }

    fn first(rules: Rules, value: Value) -> Option<ErrorKind> {
        run(rules, value, CriteriaMode::FirstError).map(|error| error.kind)
    }

    #[test]
    fn required_rejects_empty_values() {
        for empty in [Value::Null, json!(""), json!([]), json!(false)] {
            assert_eq!(
                first(Rules::new().required(true), empty),
                Some(ErrorKind::Required)
            );
        }
        assert_eq!(first(Rules::new().required(true), json!(0)), None);
    }

    #[test]
    fn length_rules_count_characters_and_items() {
        let rules = || Rules::new().max_length(5_usize).min_length(2_usize);
        assert_eq!(first(rules(), json!("Luotoo")), Some(ErrorKind::MaxLength));
        assert_eq!(first(rules(), json!("L")), Some(ErrorKind::MinLength));
        assert_eq!(first(rules(), json!("Luo")), None);
        assert_eq!(first(rules(), json!([1, 2, 3, 4, 5, 6])), Some(ErrorKind::MaxLength));
        assert_eq!(first(rules(), json!("äöü")), None);
    }

    #[test]
    fn min_and_max_compare_numbers_and_dates() {
        let numbers = || Rules::new().min(1).max(10);
        assert_eq!(first(numbers(), json!(11)), Some(ErrorKind::Max));
        assert_eq!(first(numbers(), json!("0")), Some(ErrorKind::Min));
        assert_eq!(first(numbers(), json!(5)), None);
        assert_eq!(first(numbers(), json!("")), None);

        let dates = || Rules::new().min("2024-01-01").max("2024-12-31");
        assert_eq!(first(dates(), json!("2023-06-01")), Some(ErrorKind::Min));
        assert_eq!(first(dates(), json!("2024-06-01")), None);
        assert_eq!(
            first(dates(), json!("2025-01-01T10:00:00+00:00")),
            Some(ErrorKind::Max)
        );
    }

    #[test]
    fn pattern_only_checks_non_empty_strings() {
        let rules = || Rules::new().pattern((Regex::new("^[a-z]+$").unwrap(), "letters"));
        let error = run(rules(), json!("abc1"), CriteriaMode::FirstError).unwrap();
        assert_eq!(error.kind, ErrorKind::Pattern);
        assert_eq!(error.message, "letters");
        assert_eq!(first(rules(), json!("")), None);
    }

    #[test]
    fn first_failure_wins_in_rule_order() {
        let rules = Rules::new()
            .pattern(Regex::new("^[a-z]+$").unwrap())
            .max_length(2_usize)
            .validate(Validator::new(|_, _| false));
        assert_eq!(first(rules, json!("ABC")), Some(ErrorKind::MaxLength));
    }

    #[test]
    fn all_criteria_collects_every_failure() {
        let rules = Rules::new()
            .max_length((2_usize, "short"))
            .pattern((Regex::new("^[a-z]+$").unwrap(), "lower"))
            .validate_named("noDigits", Validator::new(|v: &Value, _: &Value| {
                !v.as_str().is_some_and(|s| s.contains('1'))
            }));
        let error = run(rules, json!("AB1"), CriteriaMode::All).unwrap();

        assert_eq!(error.kind, ErrorKind::MaxLength);
        let kinds: Vec<_> = error.types.keys().map(ErrorKind::to_string).collect();
        assert_eq!(kinds, ["maxLength", "pattern", "noDigits"]);
    }

    #[test]
    fn validators_see_form_values() {
        let check = FieldCheck {
            name: FieldPath::parse("confirm"),
            rules: Arc::new(Rules::new().validate(Validator::new(|value, values| {
                if Some(value) == values.get("password") {
                    Verdict::Pass
                } else {
                    Verdict::from("passwords differ")
                }
            }))),
            value: json!("b"),
            values: Arc::new(json!({ "password": "a", "confirm": "b" })),
            criteria_mode: CriteriaMode::FirstError,
        };
        let error = block_on(validate_field(check).resolve()).unwrap();
        assert_eq!(error.message, "passwords differ");
    }

    #[test]
    fn async_validators_suspend_and_continue() {
        let rules = Rules::new()
            .validate_named("remote", Validator::future(|_, _| async { Verdict::Pass }))
            .validate_named("local", Validator::new(|_, _| "taken"));
        let check = validate_field(FieldCheck {
            name: FieldPath::parse("user"),
            rules: Arc::new(rules),
            value: json!("bill"),
            values: Arc::new(json!({})),
            criteria_mode: CriteriaMode::FirstError,
        });

        assert!(!check.is_ready());
        let error = block_on(check.resolve()).unwrap();
        assert_eq!(error.kind, ErrorKind::from("local"));
        assert_eq!(error.message, "taken");
    }
}
