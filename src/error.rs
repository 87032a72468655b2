//! Validation errors (data) and operation errors (`Result`).
//!
//! A failed rule is never an `Err`: it becomes a [`FieldError`] stored in the
//! form's [`ErrorTree`] and surfaces through snapshots. [`FormError`] is
//! reserved for operations that genuinely cannot complete.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::hash::FastIndexMap;
use crate::tree::FieldTree;

/// Boxed error returned by user callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which rule produced a [`FieldError`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// `required` rule.
    Required,
    /// `min` rule.
    Min,
    /// `max` rule.
    Max,
    /// `min_length` rule.
    MinLength,
    /// `max_length` rule.
    MaxLength,
    /// `pattern` rule.
    Pattern,
    /// Unnamed `validate` function.
    Validate,
    /// Named validator, resolver output or `set_error` type.
    Custom(String),
}

impl ErrorKind {
    /// Wire name, matching what schema resolvers emit.
    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::Required => "required",
            ErrorKind::Min => "min",
            ErrorKind::Max => "max",
            ErrorKind::MinLength => "minLength",
            ErrorKind::MaxLength => "maxLength",
            ErrorKind::Pattern => "pattern",
            ErrorKind::Validate => "validate",
            ErrorKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "required" => ErrorKind::Required,
            "min" => ErrorKind::Min,
            "max" => ErrorKind::Max,
            "minLength" => ErrorKind::MinLength,
            "maxLength" => ErrorKind::MaxLength,
            "pattern" => ErrorKind::Pattern,
            "validate" => ErrorKind::Validate,
            other => ErrorKind::Custom(other.to_owned()),
        })
    }
}

impl From<&str> for ErrorKind {
    fn from(value: &str) -> Self {
        match value.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Error attached to one field.
///
/// `kind` and `message` describe the first failed rule. With
/// [`CriteriaMode::All`](crate::CriteriaMode::All), `types` additionally holds
/// one message per failed rule.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldError {
    /// Rule that failed first.
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    /// Message of that rule, possibly empty.
    pub message: String,
    /// Every failed rule, only filled in "all criteria" mode.
    #[serde(skip_serializing_if = "indexmap::IndexMap::is_empty")]
    pub types: FastIndexMap<ErrorKind, String>,
}

impl FieldError {
    /// Error of the given kind.
    pub fn new(kind: impl Into<ErrorKind>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            types: FastIndexMap::default(),
        }
    }

    /// Record another failed rule in `types`.
    pub fn with_type(mut self, kind: impl Into<ErrorKind>, message: impl Into<String>) -> Self {
        self.types.insert(kind.into(), message.into());
        self
    }
}

/// Tree of field errors keyed by path.
pub type ErrorTree = FieldTree<FieldError>;

/// Failures of form operations.
#[derive(Debug, thiserror::Error)]
pub enum FormError {
    /// `default_values` must be a JSON object.
    #[error("default values must be an object, got {0}")]
    DefaultValuesNotObject(&'static str),
    /// Async default values could not be produced.
    #[error("loading default values failed")]
    DefaultValues(#[source] BoxError),
    /// The submit callback failed after the form state was settled.
    #[error("submit handler failed")]
    Submit(#[source] BoxError),
    /// The form was disposed before the operation ran.
    #[error("form has been disposed")]
    Disposed,
}

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kinds_round_trip_through_their_wire_names() {
        for name in ["required", "maxLength", "validate", "matchesPassword"] {
            assert_eq!(ErrorKind::from(name).to_string(), name);
        }
        assert_eq!(ErrorKind::from("minLength"), ErrorKind::MinLength);
    }

    #[test]
    fn field_error_serializes_like_a_resolver_error() {
        let error = FieldError::new(ErrorKind::MaxLength, "too long");
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({ "type": "maxLength", "message": "too long" })
        );

        let all = error.with_type(ErrorKind::Pattern, "letters only");
        assert_eq!(
            serde_json::to_value(&all).unwrap()["types"],
            json!({ "pattern": "letters only" })
        );
    }

    #[test]
    fn form_error_messages() {
        assert_eq!(
            FormError::DefaultValuesNotObject("an array").to_string(),
            "default values must be an object, got an array"
        );
        assert_eq!(FormError::Disposed.to_string(), "form has been disposed");
    }
}
