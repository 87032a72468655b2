//! Pluggable whole-form validation.
//!
//! A [`Resolver`] replaces per-field rules: it receives every value and
//! returns the values to submit plus an error tree. The form merges the
//! errors for the fields it asked about and never looks inside them.

use serde_json::Value;

use crate::config::CriteriaMode;
use crate::error::{ErrorTree, FieldError};
use crate::path::FieldPath;
use crate::validation::Check;

/// What the form asks a resolver to check.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolverOptions {
    /// Fields being validated; every mounted field for whole-form checks.
    pub names: Vec<FieldPath>,
    /// Collect the first failure per field or all of them.
    pub criteria_mode: CriteriaMode,
    /// The form reports errors through native element validity.
    pub should_use_native_validation: bool,
    /// Context value from [`FormConfig::context`](crate::FormConfig::context).
    pub context: Option<Value>,
}

/// Resolver output.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resolution {
    /// Values to submit when `errors` is empty. Resolvers may transform them.
    pub values: Value,
    /// Errors keyed by path.
    pub errors: ErrorTree,
}

impl Resolution {
    /// Successful resolution.
    pub fn valid(values: Value) -> Self {
        Self {
            values,
            errors: ErrorTree::new(),
        }
    }

    /// Failed resolution from `(path, error)` pairs.
    pub fn invalid<I, P>(errors: I) -> Self
    where
        I: IntoIterator<Item = (P, FieldError)>,
        P: Into<FieldPath>,
    {
        let mut tree = ErrorTree::new();
        for (path, error) in errors {
            tree.set(&path.into(), error);
        }
        Self {
            values: Value::Object(Default::default()),
            errors: tree,
        }
    }
}

/// External validator for the whole form.
pub trait Resolver: Send + Sync {
    /// Validate `values`.
    fn resolve(&self, values: &Value, options: &ResolverOptions) -> Check<Resolution>;
}

impl<F> Resolver for F
where
    F: Fn(&Value, &ResolverOptions) -> Check<Resolution> + Send + Sync,
{
    fn resolve(&self, values: &Value, options: &ResolverOptions) -> Check<Resolution> {
        self(values, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use futures::executor::block_on;
    use serde_json::json;

    fn options() -> ResolverOptions {
        ResolverOptions {
            names: vec![FieldPath::parse("email")],
            criteria_mode: CriteriaMode::FirstError,
            should_use_native_validation: false,
            context: None,
        }
    }

    #[test]
    fn closures_are_resolvers() {
        let resolver = |values: &Value, _: &ResolverOptions| {
            if values["email"].as_str().is_some_and(|e| e.contains('@')) {
                Check::Ready(Resolution::valid(values.clone()))
            } else {
                Check::Ready(Resolution::invalid([(
                    "email",
                    FieldError::new(ErrorKind::Pattern, "invalid email"),
                )]))
            }
        };

        let bad = block_on(resolver.resolve(&json!({ "email": "x" }), &options()).resolve());
        assert!(bad.errors.contains(&FieldPath::parse("email")));

        let good = block_on(resolver.resolve(&json!({ "email": "a@b" }), &options()).resolve());
        assert!(good.errors.is_empty());
        assert_eq!(good.values, json!({ "email": "a@b" }));
    }
}
