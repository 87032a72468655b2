//! Submission.
//!
//! [`Form::handle_submit`] wraps a callback into a [`SubmitHandler`]. Each
//! [`SubmitHandler::submit`] validates the whole form, then calls `on_valid`
//! with a copy of the values (the resolver's output when a resolver is
//! configured) or `on_invalid` with the error tree.
//!
//! The submit flags are settled by a guard, so `is_submitting` is cleared and
//! `submit_count` incremented even when `on_valid` fails or panics.

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::batch::BatchGuard;
use crate::error::{BoxError, ErrorTree, FormError};
use crate::form::{Form, Outcome};
use crate::path::{self, FieldPath};
use crate::scheduler::Scope;

type OnValid = dyn Fn(Value) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync;
type OnInvalid = dyn Fn(&ErrorTree) + Send + Sync;

/// A form submission bound to its callbacks.
#[derive(Clone)]
pub struct SubmitHandler {
    form: Form,
    on_valid: Arc<OnValid>,
    on_invalid: Option<Arc<OnInvalid>>,
}

impl Form {
    /// Build a submit handler that calls `on_valid` with the submitted values
    /// when validation passes.
    pub fn handle_submit<F, Fut, E>(&self, on_valid: F) -> SubmitHandler
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        SubmitHandler {
            form: self.clone(),
            on_valid: Arc::new(
                move |values: Value| -> BoxFuture<'static, Result<(), BoxError>> {
                    on_valid(values).map(|result| result.map_err(Into::into)).boxed()
                },
            ),
            on_invalid: None,
        }
    }

    fn begin_submit(&self) -> Result<(), FormError> {
        {
            let mut data = self.inner.data.lock();
            if data.disposed {
                return Err(FormError::Disposed);
            }
            data.is_submitting = true;
        }
        self.inner.notify(Scope::All);
        Ok(())
    }
}

impl SubmitHandler {
    /// Called with the error tree when validation fails.
    pub fn on_invalid<F>(mut self, on_invalid: F) -> Self
    where
        F: Fn(&ErrorTree) + Send + Sync + 'static,
    {
        self.on_invalid = Some(Arc::new(on_invalid));
        self
    }

    /// Validate and submit.
    ///
    /// Returns `Ok` after `on_valid` succeeded or after `on_invalid` ran, and
    /// [`FormError::Submit`] when `on_valid` failed.
    pub async fn submit(&self) -> Result<(), FormError> {
        let form = &self.form;
        form.begin_submit()?;
        let mut guard = SubmitGuard {
            form,
            successful: false,
        };
        tracing::debug!("submit started");

        let Some((plan, outcome)) = form.validate(None).await else {
            return Err(FormError::Disposed);
        };
        let (valid, payload, errors) = {
            let _batch = BatchGuard::new(&form.inner);
            form.settle(&plan, &outcome);
            let mut data = form.inner.data.lock();
            data.errors.unset(&FieldPath::root().key("root"));
            let valid = data.errors.is_empty();
            data.is_valid = valid;
            let mut payload = match &outcome {
                Outcome::Resolved(resolution) if valid => resolution.values.clone(),
                _ => data.values.clone(),
            };
            let disabled: Vec<FieldPath> = data
                .fields
                .descriptors()
                .filter(|d| data.disabled || d.is_disabled())
                .map(|d| d.name.clone())
                .collect();
            for name in &disabled {
                path::unset(&mut payload, name);
            }
            let errors = data.errors.clone();
            drop(data);
            form.inner.notify(Scope::All);
            (valid, payload, errors)
        };

        if valid {
            (self.on_valid)(payload).await.map_err(|error| {
                tracing::warn!(%error, "submit handler failed");
                FormError::Submit(error)
            })?;
            guard.successful = true;
        } else {
            tracing::debug!("submit blocked by validation errors");
            if let Some(on_invalid) = &self.on_invalid {
                on_invalid(&errors);
            }
            if form.inner.settings.should_focus_error {
                form.focus_first_error();
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SubmitHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitHandler")
            .field("on_invalid", &self.on_invalid.is_some())
            .finish_non_exhaustive()
    }
}

/// Settles the submit flags when a submission ends, however it ends.
struct SubmitGuard<'a> {
    form: &'a Form,
    successful: bool,
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        {
            let mut data = self.form.inner.data.lock();
            data.is_submitting = false;
            data.is_submitted = true;
            data.submit_count += 1;
            data.is_submit_successful = self.successful;
        }
        self.form.inner.notify(Scope::All);
        tracing::debug!(successful = self.successful, "submit finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FormConfig;
    use crate::error::FieldError;
    use crate::form::{Names, SetValueOptions, create_form};
    use crate::resolver::{Resolution, ResolverOptions};
    use crate::rules::Rules;
    use crate::validation::Check;
    use futures::executor::block_on;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn valid_submit_passes_a_copy_of_the_values() {
        let form = create_form(FormConfig::new().default_values(json!({ "a": "x" }))).unwrap();
        form.register("a", Rules::new().required(true));
        let seen = Arc::new(Mutex::new(None));
        let handler = form.handle_submit({
            let seen = seen.clone();
            move |values| {
                *seen.lock() = Some(values);
                async { Ok::<_, BoxError>(()) }
            }
        });

        block_on(handler.submit()).unwrap();
        assert_eq!(*seen.lock(), Some(json!({ "a": "x" })));
        let state = form.form_state();
        assert!(state.is_submitted && state.is_submit_successful && state.is_valid);
        assert!(!state.is_submitting);
        assert_eq!(state.submit_count, 1);
    }

    #[test]
    fn invalid_submit_reports_errors_and_focuses() {
        use crate::element::FieldRef;
        use crate::element::testing::FakeInput;

        let form = create_form(FormConfig::new()).unwrap();
        let input = FakeInput::with_value("");
        form.register("a", Rules::new().required("needed"))
            .attach(FieldRef::Text(input.clone()));
        let reported = Arc::new(Mutex::new(Vec::new()));
        let handler = form
            .handle_submit(|_| async { Ok::<_, BoxError>(()) })
            .on_invalid({
                let reported = reported.clone();
                move |errors| reported.lock().extend(errors.leaves().into_iter().map(|(p, _)| p))
            });

        cov_mark::check!(first_error_focused);
        block_on(handler.submit()).unwrap();
        assert_eq!(*reported.lock(), [FieldPath::parse("a")]);
        assert_eq!(input.focus_count(), 1);
        let state = form.form_state();
        assert!(!state.is_submit_successful);
        assert_eq!(state.submit_count, 1);
    }

    #[test]
    fn failing_callback_still_settles_the_flags() {
        let form = create_form(FormConfig::new()).unwrap();
        let handler = form.handle_submit(|_| async { Err::<(), _>("server down") });

        let error = block_on(handler.submit()).unwrap_err();
        assert!(matches!(error, FormError::Submit(_)));
        let state = form.form_state();
        assert!(!state.is_submitting);
        assert!(state.is_submitted);
        assert!(!state.is_submit_successful);
        assert_eq!(state.submit_count, 1);
    }

    #[test]
    fn resolver_values_are_submitted_without_disabled_fields() {
        let resolver = |values: &Value, _: &ResolverOptions| {
            let mut values = values.clone();
            values["extra"] = json!(true);
            Check::Ready(Resolution::valid(values))
        };
        let form = create_form(
            FormConfig::new()
                .resolver(resolver)
                .default_values(json!({ "a": 1, "secret": 2 })),
        )
        .unwrap();
        form.register("a", Rules::new());
        form.register("secret", Rules::new().disabled(true));
        let seen = Arc::new(Mutex::new(Value::Null));
        let handler = form.handle_submit({
            let seen = seen.clone();
            move |values| {
                *seen.lock() = values;
                async { Ok::<_, BoxError>(()) }
            }
        });

        block_on(handler.submit()).unwrap();
        assert_eq!(*seen.lock(), json!({ "a": 1, "extra": true }));
    }

    #[test]
    fn errors_of_fields_disabled_after_validation_are_dropped() {
        let form = create_form(FormConfig::new()).unwrap();
        form.register("a", Rules::new().required(true));
        assert!(!block_on(form.trigger(Names::All)));
        assert!(form.form_state().errors.contains(&FieldPath::parse("a")));

        form.register("a", Rules::new().required(true).disabled(true));
        let calls = Arc::new(Mutex::new(0));
        let handler = form.handle_submit({
            let calls = calls.clone();
            move |_| {
                *calls.lock() += 1;
                async { Ok::<_, BoxError>(()) }
            }
        });

        cov_mark::check!(skipped_field_error_cleared);
        block_on(handler.submit()).unwrap();
        assert_eq!(*calls.lock(), 1);
        let state = form.form_state();
        assert!(state.errors.is_empty());
        assert!(state.is_submit_successful);
    }

    #[test]
    fn root_errors_do_not_block_submission() {
        let form = create_form(FormConfig::new()).unwrap();
        form.set_error(
            "root",
            FieldError::new("server", "try again"),
            Default::default(),
        );
        form.set_value("a", 1, SetValueOptions::new());
        let handler = form.handle_submit(|_| async { Ok::<_, BoxError>(()) });
        block_on(handler.submit()).unwrap();
        assert!(form.form_state().is_submit_successful);
    }

    #[test]
    fn disposed_forms_refuse_to_submit() {
        let form = create_form(FormConfig::new()).unwrap();
        let handler = form.handle_submit(|_| async { Ok::<_, BoxError>(()) });
        form.dispose();
        assert!(matches!(block_on(handler.submit()), Err(FormError::Disposed)));
    }
}
