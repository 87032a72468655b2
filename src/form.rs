//! The form context.
//!
//! A [`Form`] owns everything about one logical form: the value tree, the
//! defaults, the field registry, the derived trees, the notification
//! scheduler and the validation bookkeeping. It is a cheap handle around an
//! `Arc`; clones address the same form.
//!
//! ## Locking
//!
//! All mutable state sits behind one `parking_lot` mutex. It is never held
//! while user code runs: element accessors, validators, resolvers and
//! subscriber callbacks are all called after the state they need was cloned
//! out and the lock released. The one exception is
//! [`Focusable::is_disabled`](crate::Focusable::is_disabled), which is
//! queried under the lock. Every mutating operation follows the same shape:
//!
//! 1. Open a batch so that the operation publishes at most one pass.
//! 2. Mutate the state under the lock and collect follow-up work.
//! 3. Release the lock and run the follow-up work (element writes,
//!    validation, focus).
//! 4. Close the batch, which publishes one snapshot.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;

use crate::arena::FieldArena;
use crate::batch::BatchGuard;
use crate::binding::FieldBinding;
use crate::config::{FormConfig, FormSettings};
use crate::dirty::compute_dirty_fields;
use crate::element::FieldRef;
use crate::error::{BoxError, ErrorTree, FieldError, FormError, json_kind};
use crate::executor::{Attempts, Ticket, ValidationQueue};
use crate::field_array::{FieldArray, RowId};
use crate::hash::FastHashMap;
use crate::path::{self, FieldPath};
use crate::resolver::{Resolution, Resolver, ResolverOptions};
use crate::rules::Rules;
use crate::scheduler::{Interest, Scheduler, Scope};
use crate::state::{FieldState, FormState, Slices};
use crate::subject::Subscription;
use crate::tree::FieldTree;
use crate::validation::{Check, FieldCheck, validate_field};

/// Create a form from `config`.
///
/// Fails when the default values are neither an object nor `null`.
pub fn create_form(config: FormConfig) -> Result<Form, FormError> {
    Form::new(config)
}

/// Field names an operation applies to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Names {
    /// Every field.
    #[default]
    All,
    /// The listed fields and everything below them.
    Only(Vec<FieldPath>),
}

impl Names {
    fn into_paths(self) -> Option<Vec<FieldPath>> {
        match self {
            Names::All => None,
            Names::Only(paths) => Some(paths),
        }
    }
}

impl From<&str> for Names {
    fn from(name: &str) -> Self {
        Names::Only(vec![name.into()])
    }
}

impl From<String> for Names {
    fn from(name: String) -> Self {
        Names::Only(vec![name.into()])
    }
}

impl From<FieldPath> for Names {
    fn from(name: FieldPath) -> Self {
        Names::Only(vec![name])
    }
}

impl From<&FieldPath> for Names {
    fn from(name: &FieldPath) -> Self {
        Names::Only(vec![name.clone()])
    }
}

impl<P: Into<FieldPath>> From<Vec<P>> for Names {
    fn from(names: Vec<P>) -> Self {
        Names::Only(names.into_iter().map(Into::into).collect())
    }
}

impl<P: Into<FieldPath>, const N: usize> From<[P; N]> for Names {
    fn from(names: [P; N]) -> Self {
        Names::Only(names.into_iter().map(Into::into).collect())
    }
}

/// Options for [`Form::set_value`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetValueOptions {
    /// Validate the field (and its `deps`) after writing.
    pub should_validate: bool,
    /// Recompute the field's dirty state against its default.
    pub should_dirty: bool,
    /// Mark the field touched.
    pub should_touch: bool,
}

impl SetValueOptions {
    /// Only write the value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default: `false`
    pub fn should_validate(mut self, should_validate: bool) -> Self {
        self.should_validate = should_validate;
        self
    }

    /// Default: `false`
    pub fn should_dirty(mut self, should_dirty: bool) -> Self {
        self.should_dirty = should_dirty;
        self
    }

    /// Default: `false`
    pub fn should_touch(mut self, should_touch: bool) -> Self {
        self.should_touch = should_touch;
        self
    }
}

/// What [`Form::unregister`] leaves in place.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnregisterOptions {
    /// Keep the field's value.
    pub keep_value: bool,
    /// Keep errors at or below the field.
    pub keep_error: bool,
    /// Keep dirty state at or below the field.
    pub keep_dirty: bool,
    /// Keep touched state at or below the field.
    pub keep_touched: bool,
    /// Keep the field's default value.
    pub keep_default_value: bool,
    /// Do not recompute `is_valid`.
    pub keep_is_valid: bool,
}

/// What [`Form::reset`] leaves in place.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResetOptions {
    /// Keep every error.
    pub keep_errors: bool,
    /// Keep the dirty tree.
    pub keep_dirty: bool,
    /// Keep the current value of every dirty field and re-derive dirty state.
    pub keep_dirty_values: bool,
    /// Keep the current values; only defaults and state are reset.
    pub keep_values: bool,
    /// Keep the current defaults.
    pub keep_default_values: bool,
    /// Keep `is_submitted`.
    pub keep_is_submitted: bool,
    /// Keep the touched tree.
    pub keep_touched: bool,
    /// Do not recompute `is_valid`.
    pub keep_is_valid: bool,
    /// Keep `submit_count`.
    pub keep_submit_count: bool,
    /// Keep `is_submit_successful`.
    pub keep_is_submit_successful: bool,
}

/// What [`Form::reset_field`] leaves in place.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResetFieldOptions {
    /// Keep the field's error.
    pub keep_error: bool,
    /// Keep the field's dirty state.
    pub keep_dirty: bool,
    /// Keep the field's touched state.
    pub keep_touched: bool,
    /// New default for the field; the field is reset to it.
    pub default_value: Option<Value>,
}

/// Options for [`Form::set_error`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetErrorOptions {
    /// Focus the field after recording the error.
    pub should_focus: bool,
}

/// Mutable state of one form.
pub(crate) struct FormData {
    pub(crate) values: Value,
    pub(crate) defaults: Value,
    pub(crate) fields: FieldArena,
    pub(crate) errors: ErrorTree,
    pub(crate) dirty: FieldTree<bool>,
    pub(crate) touched: FieldTree<bool>,
    pub(crate) validating: FieldTree<bool>,
    pub(crate) is_valid: bool,
    pub(crate) is_submitted: bool,
    pub(crate) is_submitting: bool,
    pub(crate) is_submit_successful: bool,
    pub(crate) submit_count: u32,
    pub(crate) disabled: bool,
    pub(crate) is_loading: bool,
    pub(crate) focused: Option<FieldPath>,
    /// Row prefix whose first attached field takes focus.
    pub(crate) pending_focus: Option<FieldPath>,
    pub(crate) rows: FastHashMap<FieldPath, Vec<RowId>>,
    pub(crate) disposed: bool,
}

impl FormData {
    fn new(defaults: Value, disabled: bool) -> Self {
        Self {
            values: defaults.clone(),
            defaults,
            fields: FieldArena::new(),
            errors: ErrorTree::new(),
            dirty: FieldTree::new(),
            touched: FieldTree::new(),
            validating: FieldTree::new(),
            is_valid: false,
            is_submitted: false,
            is_submitting: false,
            is_submit_successful: false,
            submit_count: 0,
            disabled,
            is_loading: false,
            focused: None,
            pending_focus: None,
            rows: FastHashMap::default(),
            disposed: false,
        }
    }

    pub(crate) fn snapshot(&self) -> FormState {
        FormState {
            values: self.values.clone(),
            errors: self.errors.clone(),
            dirty_fields: self.dirty.clone(),
            touched_fields: self.touched.clone(),
            validating_fields: self.validating.clone(),
            is_dirty: !self.dirty.is_empty(),
            is_valid: self.is_valid,
            is_validating: !self.validating.is_empty(),
            is_submitted: self.is_submitted,
            is_submitting: self.is_submitting,
            is_submit_successful: self.is_submit_successful,
            submit_count: self.submit_count,
            disabled: self.disabled,
            is_loading: self.is_loading,
            focused_field: self.focused.clone(),
        }
    }

    fn field_state(&self, name: &FieldPath) -> FieldState {
        FieldState {
            invalid: self.errors.contains(name),
            is_dirty: self.dirty.contains(name),
            is_touched: self.touched.contains(name),
            is_validating: self.validating.contains(name),
            error: self.errors.leaf(name).cloned(),
        }
    }

    pub(crate) fn value(&self, name: &FieldPath) -> Value {
        path::get_or(&self.values, name, Value::Null)
    }

    /// Re-derive dirty state for `name`. Inside a field array the whole
    /// array is re-derived.
    pub(crate) fn refresh_dirty(&mut self, name: &FieldPath) {
        let at = self
            .fields
            .array_ancestor(name)
            .cloned()
            .unwrap_or_else(|| name.clone());
        let tree = compute_dirty_fields(path::get(&self.defaults, &at), &self.value(&at));
        self.dirty.set_tree(&at, tree);
    }

    fn is_field_disabled(&self, name: &FieldPath) -> bool {
        self.disabled || self.fields.get(name).is_some_and(|d| d.is_disabled())
    }

    /// Registered but left out of validation: disabled, or without rules
    /// when no resolver decides for it.
    fn skips_validation(&self, name: &FieldPath, with_resolver: bool) -> bool {
        self.fields.get(name).is_some_and(|d| {
            self.disabled || d.is_disabled() || (!with_resolver && !d.rules.has_validation())
        })
    }
}

/// Shared part of a [`Form`].
pub(crate) struct FormInner {
    pub(crate) settings: FormSettings,
    pub(crate) resolver: Option<Arc<dyn Resolver>>,
    pub(crate) context: Option<Value>,
    pub(crate) data: Mutex<FormData>,
    pub(crate) scheduler: Scheduler,
    pub(crate) attempts: Attempts,
    pub(crate) queue: ValidationQueue,
    pub(crate) next_row: AtomicU64,
}

impl FormInner {
    /// Publish a pass for `scope`, or fold it into the open batch.
    pub(crate) fn notify(&self, scope: Scope) {
        if self.scheduler.defer(&scope) {
            return;
        }
        self.publish(scope);
    }

    /// Snapshot the state and hand it to the scheduler.
    pub(crate) fn publish(&self, scope: Scope) {
        let next = self.data.lock().snapshot();
        self.scheduler.publish(scope, next);
    }
}

/// Validation work captured under the lock and run outside of it.
pub(crate) enum Work {
    Rules(Vec<FieldCheck>),
    Resolver {
        resolver: Arc<dyn Resolver>,
        values: Value,
        options: ResolverOptions,
    },
}

impl Work {
    pub(crate) fn start(self) -> Check<Outcome> {
        match self {
            Work::Resolver {
                resolver,
                values,
                options,
            } => resolver.resolve(&values, &options).map(Outcome::Resolved),
            Work::Rules(checks) => {
                let mut ready = Vec::new();
                let mut pending = Vec::new();
                for check in checks {
                    let name = check.name.clone();
                    match validate_field(check) {
                        Check::Ready(error) => ready.push((name, error)),
                        Check::Pending(future) => {
                            pending.push(async move { (name, future.await) })
                        }
                    }
                }
                if pending.is_empty() {
                    return Check::Ready(Outcome::Fields(ready));
                }
                Check::Pending(Box::pin(async move {
                    ready.extend(join_all(pending).await);
                    Outcome::Fields(ready)
                }))
            }
        }
    }
}

/// Result of one validation run.
pub(crate) enum Outcome {
    /// Per-field results of built-in rules.
    Fields(Vec<(FieldPath, Option<FieldError>)>),
    /// Resolver output.
    Resolved(Resolution),
}

impl Outcome {
    pub(crate) fn is_valid(&self, plan: &Plan) -> bool {
        match self {
            Outcome::Fields(results) => results.iter().all(|(_, error)| error.is_none()),
            Outcome::Resolved(resolution) if plan.whole => resolution
                .errors
                .leaves()
                .into_iter()
                .all(|(name, _)| plan.cleared.iter().any(|skipped| name.starts_with(skipped))),
            Outcome::Resolved(resolution) => plan
                .targets
                .iter()
                .all(|name| !resolution.errors.contains(name)),
        }
    }
}

/// Which fields a validation run covers.
pub(crate) struct Plan {
    pub(crate) scope: Scope,
    pub(crate) whole: bool,
    pub(crate) targets: Vec<FieldPath>,
    /// Selected fields that are not validated; their errors are dropped.
    cleared: Vec<FieldPath>,
    tickets: Vec<Ticket>,
}

/// Handle to a form.
///
/// ```ignore
/// let form = create_form(FormConfig::new().mode(Mode::OnChange))?;
/// let email = form.register("email", Rules::new().required("email is required"));
/// email.attach(FieldRef::text(input));
/// email.on_change();
/// ```
#[derive(Clone)]
pub struct Form {
    pub(crate) inner: Arc<FormInner>,
}

impl Form {
    /// Create a form. See [`create_form`].
    pub fn new(config: FormConfig) -> Result<Self, FormError> {
        let FormConfig {
            settings,
            default_values,
            resolver,
            context,
        } = config;
        let defaults = match default_values {
            Value::Null => Value::Object(Default::default()),
            Value::Object(map) => Value::Object(map),
            other => return Err(FormError::DefaultValuesNotObject(json_kind(&other))),
        };
        let data = FormData::new(defaults, settings.disabled);
        let initial = data.snapshot();
        tracing::debug!(mode = %settings.mode, resolver = resolver.is_some(), "form created");
        Ok(Self {
            inner: Arc::new(FormInner {
                settings,
                resolver,
                context,
                data: Mutex::new(data),
                scheduler: Scheduler::new(initial),
                attempts: Attempts::default(),
                queue: ValidationQueue::default(),
                next_row: AtomicU64::new(0),
            }),
        })
    }

    /// Tear the form down.
    ///
    /// Subscribers are dropped, parked validations are discarded and every
    /// later operation is a no-op (submits fail with
    /// [`FormError::Disposed`]).
    pub fn dispose(&self) {
        {
            let mut data = self.inner.data.lock();
            if data.disposed {
                return;
            }
            data.disposed = true;
            data.fields = FieldArena::new();
            data.pending_focus = None;
        }
        self.inner.scheduler.close();
        self.inner.queue.clear();
        self.inner.attempts.forget_under(&FieldPath::root());
        tracing::debug!("form disposed");
    }

    /// True after [`Form::dispose`].
    pub fn is_disposed(&self) -> bool {
        self.inner.data.lock().disposed
    }

    /// Register a field and return its binding.
    ///
    /// Re-registering refreshes the rules and keeps the field's value and
    /// derived state. A value already present at `name` is never
    /// overwritten; otherwise the rules' initial value, then the default
    /// value, seeds it.
    pub fn register(&self, name: impl Into<FieldPath>, rules: Rules) -> FieldBinding {
        let name = name.into();
        let _batch = BatchGuard::new(&self.inner);
        {
            let mut data = self.inner.data.lock();
            if data.disposed {
                return FieldBinding::new(self.clone(), name);
            }
            let initial = rules.value.clone();
            let (_, created) = data.fields.register(&name, rules);
            if path::get(&data.values, &name).is_none() {
                let seed = initial.or_else(|| path::get(&data.defaults, &name).cloned());
                if let Some(seed) = seed {
                    path::set(&mut data.values, &name, seed);
                }
            }
            tracing::debug!(field = %name, created, "field registered");
        }
        self.inner.notify(Scope::field(name.clone()));
        self.update_validity();
        FieldBinding::new(self.clone(), name)
    }

    /// Remove a field.
    ///
    /// The descriptor is always dropped; value, errors, dirty and touched
    /// state go too unless `options` keeps them. Unknown names are ignored,
    /// so unregistering twice is the same as unregistering once.
    pub fn unregister(&self, name: impl Into<FieldPath>, options: UnregisterOptions) {
        let name = name.into();
        let _batch = BatchGuard::new(&self.inner);
        {
            let mut data = self.inner.data.lock();
            if data.disposed {
                return;
            }
            if data.fields.names_under(&name).is_empty() && path::get(&data.values, &name).is_none()
            {
                cov_mark::hit!(unregister_unknown_is_noop);
                return;
            }
            let removed = data.fields.remove(&name);
            data.fields.remove_arrays(&name);
            data.rows.retain(|array, _| !array.starts_with(&name));
            if !options.keep_value {
                path::unset(&mut data.values, &name);
            }
            if !options.keep_error {
                data.errors.unset(&name);
            }
            if !options.keep_dirty {
                data.dirty.unset(&name);
            }
            if !options.keep_touched {
                data.touched.unset(&name);
            }
            data.validating.unset(&name);
            if !self.inner.settings.should_unregister && !options.keep_default_value {
                path::unset(&mut data.defaults, &name);
            }
            self.inner.attempts.forget_under(&name);
            tracing::debug!(field = %name, removed = removed.len(), "field unregistered");
        }
        self.inner.notify(Scope::field(name));
        if !options.keep_is_valid {
            self.update_validity();
        }
    }

    /// Every value.
    pub fn get_values(&self) -> Value {
        self.inner.data.lock().values.clone()
    }

    /// The value at `name`, `null` when absent.
    pub fn get_value(&self, name: impl Into<FieldPath>) -> Value {
        self.inner.data.lock().value(&name.into())
    }

    /// Write `value` at `name`.
    ///
    /// Registered fields at or below `name` get the new value pushed into
    /// their elements. Paths without a field are written all the same.
    pub fn set_value(
        &self,
        name: impl Into<FieldPath>,
        value: impl Into<Value>,
        options: SetValueOptions,
    ) {
        let name = name.into();
        let _batch = BatchGuard::new(&self.inner);
        self.write_value(&name, value.into(), options);
    }

    /// Write several values in one notification pass.
    pub fn set_values<I, P, V>(&self, values: I, options: SetValueOptions)
    where
        I: IntoIterator<Item = (P, V)>,
        P: Into<FieldPath>,
        V: Into<Value>,
    {
        let _batch = BatchGuard::new(&self.inner);
        for (name, value) in values {
            self.write_value(&name.into(), value.into(), options);
        }
    }

    fn write_value(&self, name: &FieldPath, value: Value, options: SetValueOptions) {
        let (writes, validate) = {
            let mut data = self.inner.data.lock();
            if data.disposed {
                return;
            }
            path::set(&mut data.values, name, value);
            data.rows.retain(|array, _| !array.starts_with(name));
            if options.should_dirty {
                data.refresh_dirty(name);
            }
            if options.should_touch {
                data.touched.set(name, true);
            }
            let mut writes = Vec::new();
            let mut validate = Vec::new();
            for descriptor in data.fields.descriptors() {
                if !descriptor.name.starts_with(name) {
                    continue;
                }
                if let Some(field_ref) = &descriptor.field_ref {
                    writes.push((field_ref.clone(), data.value(&descriptor.name)));
                }
                if options.should_validate {
                    validate.push(descriptor.name.clone());
                    validate.extend(descriptor.rules.deps.iter().cloned());
                }
            }
            (writes, validate)
        };
        for (field_ref, value) in writes {
            field_ref.write(&value);
        }
        self.inner.notify(Scope::field(name.clone()));
        if validate.is_empty() {
            self.update_validity();
        } else {
            self.validate_in_background(validate);
        }
    }

    /// Validate `names` (or the whole form) and return whether they are
    /// valid.
    ///
    /// A whole-form trigger also sets `is_valid`. Fields with an async rule
    /// are flagged as validating until the rule settles.
    pub async fn trigger(&self, names: impl Into<Names>) -> bool {
        let names = names.into().into_paths();
        let Some((plan, outcome)) = self.validate(names).await else {
            return false;
        };
        let valid = outcome.is_valid(&plan);
        let _batch = BatchGuard::new(&self.inner);
        self.settle(&plan, &outcome);
        if plan.whole {
            self.inner.data.lock().is_valid = valid;
        }
        self.inner.notify(plan.scope.clone());
        if !plan.whole {
            self.update_validity();
        }
        tracing::debug!(valid, whole = plan.whole, "trigger finished");
        valid
    }

    /// Record an error for `name`. The form becomes invalid.
    pub fn set_error(&self, name: impl Into<FieldPath>, error: FieldError, options: SetErrorOptions) {
        let name = name.into();
        let focus = {
            let mut data = self.inner.data.lock();
            if data.disposed {
                return;
            }
            data.errors.set(&name, error);
            data.is_valid = false;
            options
                .should_focus
                .then(|| data.fields.get(&name).and_then(|d| d.field_ref.clone()))
                .flatten()
        };
        self.inner.notify(Scope::field(name));
        if let Some(field_ref) = focus {
            field_ref.focus();
        }
    }

    /// Drop errors of `names`, or every error.
    pub fn clear_errors(&self, names: impl Into<Names>) {
        let names = names.into();
        {
            let mut data = self.inner.data.lock();
            match &names {
                Names::All => data.errors = ErrorTree::new(),
                Names::Only(paths) => {
                    for name in paths {
                        data.errors.unset(name);
                    }
                }
            }
        }
        let scope = match names {
            Names::All => Scope::All,
            Names::Only(paths) => Scope::Fields(paths),
        };
        self.inner.notify(scope);
    }

    /// Reset values and state.
    ///
    /// `values` (an object) becomes the new values and, unless
    /// `keep_default_values` is set, the new defaults. Without `values` the
    /// form returns to its defaults.
    pub fn reset(&self, values: Option<Value>, options: ResetOptions) {
        let _batch = BatchGuard::new(&self.inner);
        let writes = {
            let mut data = self.inner.data.lock();
            if data.disposed {
                return;
            }
            let next = match values {
                None | Some(Value::Null) => data.defaults.clone(),
                Some(Value::Object(map)) => Value::Object(map),
                Some(other) => {
                    tracing::warn!(kind = json_kind(&other), "reset values must be an object");
                    return;
                }
            };
            if !options.keep_default_values {
                data.defaults = next.clone();
            }
            if !options.keep_values {
                let mut values = next;
                if options.keep_dirty_values {
                    for (name, _) in data.dirty.leaves() {
                        if let Some(current) = path::get(&data.values, &name) {
                            path::set(&mut values, &name, current.clone());
                        }
                    }
                }
                data.values = values;
                data.rows.clear();
            }
            data.dirty = if options.keep_dirty_values || options.keep_default_values {
                compute_dirty_fields(Some(&data.defaults), &data.values)
            } else if options.keep_dirty {
                std::mem::take(&mut data.dirty)
            } else {
                FieldTree::new()
            };
            if !options.keep_touched {
                data.touched = FieldTree::new();
            }
            if !options.keep_errors {
                data.errors = ErrorTree::new();
            }
            data.validating = FieldTree::new();
            if !options.keep_submit_count {
                data.submit_count = 0;
            }
            if !options.keep_is_submitted {
                data.is_submitted = false;
            }
            if !options.keep_is_submit_successful {
                data.is_submit_successful = false;
            }
            data.is_submitting = false;
            data.pending_focus = None;
            self.inner.attempts.forget_under(&FieldPath::root());
            data.fields
                .descriptors()
                .filter_map(|d| Some((d.field_ref.clone()?, data.value(&d.name))))
                .collect::<Vec<_>>()
        };
        for (field_ref, value) in writes {
            field_ref.write(&value);
        }
        self.inner.notify(Scope::All);
        if !options.keep_is_valid {
            self.update_validity();
        }
        tracing::debug!("form reset");
    }

    /// Reset one registered field to its default.
    pub fn reset_field(&self, name: impl Into<FieldPath>, options: ResetFieldOptions) {
        let name = name.into();
        let _batch = BatchGuard::new(&self.inner);
        let writes = {
            let mut data = self.inner.data.lock();
            if data.disposed || data.fields.names_under(&name).is_empty() {
                return;
            }
            if let Some(default) = &options.default_value {
                path::set(&mut data.defaults, &name, default.clone());
            }
            match path::get(&data.defaults, &name).cloned() {
                Some(default) => path::set(&mut data.values, &name, default),
                None => {
                    path::unset(&mut data.values, &name);
                }
            }
            if !options.keep_dirty {
                data.dirty.unset(&name);
            }
            if !options.keep_touched {
                data.touched.unset(&name);
            }
            if !options.keep_error {
                data.errors.unset(&name);
            }
            data.fields
                .descriptors()
                .filter(|d| d.name.starts_with(&name))
                .filter_map(|d| Some((d.field_ref.clone()?, data.value(&d.name))))
                .collect::<Vec<_>>()
        };
        for (field_ref, value) in writes {
            field_ref.write(&value);
        }
        self.inner.notify(Scope::field(name));
        self.update_validity();
    }

    /// Current state of one field.
    pub fn get_field_state(&self, name: impl Into<FieldPath>) -> FieldState {
        self.inner.data.lock().field_state(&name.into())
    }

    /// Current state of the whole form.
    ///
    /// Unlike the snapshots handed to subscribers this reflects changes made
    /// inside a batch that has not closed yet.
    pub fn form_state(&self) -> FormState {
        self.inner.data.lock().snapshot()
    }

    /// Focus the element of `name`.
    pub fn set_focus(&self, name: impl Into<FieldPath>) {
        let name = name.into();
        let field_ref = {
            let data = self.inner.data.lock();
            data.fields.get(&name).and_then(|d| d.field_ref.clone())
        };
        if let Some(field_ref) = field_ref {
            field_ref.focus();
        }
    }

    /// Subscribe to form state.
    ///
    /// The callback runs synchronously at the end of every operation that
    /// changed one of the interest's slices for a matching field. It is not
    /// called for the state at subscription time. Interest in
    /// [`Slices::IS_VALID`] makes the form keep `is_valid` up to date from
    /// then on.
    pub fn subscribe<F>(&self, interest: Interest, callback: F) -> Subscription
    where
        F: Fn(&FormState) + Send + Sync + 'static,
    {
        if interest.slices().contains(Slices::IS_VALID) {
            self.refresh_validity();
        }
        self.inner.scheduler.subscribe(interest, callback)
    }

    /// Call `callback` with every value whenever the values of `names`
    /// change.
    pub fn watch<F>(&self, names: impl Into<Names>, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let interest = match names.into() {
            Names::All => Interest::new(Slices::VALUES),
            Names::Only(paths) => Interest::new(Slices::VALUES).names(paths),
        };
        self.inner
            .scheduler
            .subscribe(interest, move |state: &FormState| callback(&state.values))
    }

    /// Unregister fields whose elements went away, for fields that drop
    /// their value on unmount. Returns how many were removed.
    pub fn remove_unmounted(&self) -> usize {
        let _batch = BatchGuard::new(&self.inner);
        let candidates: Vec<(FieldPath, Option<FieldRef>)> = {
            let mut data = self.inner.data.lock();
            let names = data.fields.take_unmounted();
            names
                .into_iter()
                .filter_map(|name| {
                    let field_ref = data.fields.get(&name)?.field_ref.clone();
                    Some((name, field_ref))
                })
                .collect()
        };
        let mut dead = Vec::new();
        for (name, field_ref) in candidates {
            match field_ref.and_then(|field_ref| field_ref.live()) {
                Some(live) => {
                    let mut data = self.inner.data.lock();
                    if let Some(descriptor) = data.fields.get_mut(&name) {
                        descriptor.field_ref = Some(live);
                    }
                }
                None => dead.push(name),
            }
        }
        for name in &dead {
            self.unregister(name.clone(), UnregisterOptions::default());
        }
        dead.len()
    }

    /// Drive every validation started by change, blur or `set_value` until
    /// none is left. Returns how many completed.
    pub async fn flush_validations(&self) -> usize {
        self.inner.queue.flush().await
    }

    /// Disable or enable the whole form. Disabled fields are not validated
    /// and are left out of submitted values.
    pub fn set_disabled(&self, disabled: bool) {
        {
            let mut data = self.inner.data.lock();
            if data.disposed {
                return;
            }
            data.disabled = disabled;
        }
        self.inner.notify(Scope::All);
        self.update_validity();
    }

    /// Load default values asynchronously.
    ///
    /// `is_loading` is set while `load` runs. On success the form is reset
    /// to the loaded values, which also become the defaults.
    pub async fn load_default_values<F, E>(&self, load: F) -> Result<(), FormError>
    where
        F: Future<Output = Result<Value, E>>,
        E: Into<BoxError>,
    {
        let loading = LoadingGuard::new(self)?;
        let loaded = load.await;
        let _batch = BatchGuard::new(&self.inner);
        drop(loading);
        let values = loaded.map_err(|error| FormError::DefaultValues(error.into()))?;
        if !values.is_object() {
            return Err(FormError::DefaultValuesNotObject(json_kind(&values)));
        }
        self.reset(Some(values), ResetOptions::default());
        Ok(())
    }

    /// Run `f` with notifications deferred; one pass is published when it
    /// returns.
    pub fn batch<R>(&self, f: impl FnOnce(&Form) -> R) -> R {
        let _batch = BatchGuard::new(&self.inner);
        f(self)
    }

    /// Structural operations on the array at `name`.
    pub fn field_array(&self, name: impl Into<FieldPath>) -> FieldArray {
        FieldArray::new(self.clone(), name.into())
    }

    /// Capture the validation of `names` (or everything) and issue tickets.
    fn plan(&self, names: Option<Vec<FieldPath>>) -> Option<(Plan, Work)> {
        let data = self.inner.data.lock();
        if data.disposed {
            return None;
        }
        let (targets, cleared, work) = self.prepare(&data, names.as_deref());
        let tickets = targets
            .iter()
            .map(|name| self.inner.attempts.issue(name, data.value(name)))
            .collect();
        let scope = match &names {
            None => Scope::All,
            Some(names) => {
                let mut scope = Scope::Fields(names.clone());
                scope.merge(Scope::Fields(targets.clone()));
                scope
            }
        };
        tracing::trace!(fields = targets.len(), whole = names.is_none(), "validation planned");
        Some((
            Plan {
                scope,
                whole: names.is_none(),
                targets,
                cleared,
                tickets,
            },
            work,
        ))
    }

    fn prepare(
        &self,
        data: &FormData,
        names: Option<&[FieldPath]>,
    ) -> (Vec<FieldPath>, Vec<FieldPath>, Work) {
        let with_resolver = self.inner.resolver.is_some();
        let (skipped, fields): (Vec<_>, Vec<_>) = data
            .fields
            .descriptors()
            .filter(|d| names.is_none_or(|names| names.iter().any(|n| d.name.starts_with(n))))
            .partition(|d| data.skips_validation(&d.name, with_resolver));
        let cleared = skipped.into_iter().map(|d| d.name.clone()).collect();
        let settings = &self.inner.settings;
        match &self.inner.resolver {
            Some(resolver) => {
                let targets = match names {
                    Some(names) => names.to_vec(),
                    None => fields.iter().map(|d| d.name.clone()).collect(),
                };
                let options = ResolverOptions {
                    names: targets.clone(),
                    criteria_mode: settings.criteria_mode,
                    should_use_native_validation: settings.should_use_native_validation,
                    context: self.inner.context.clone(),
                };
                let work = Work::Resolver {
                    resolver: Arc::clone(resolver),
                    values: data.values.clone(),
                    options,
                };
                (targets, cleared, work)
            }
            None => {
                let values = Arc::new(data.values.clone());
                let checks: Vec<FieldCheck> = fields
                    .iter()
                    .map(|d| FieldCheck {
                        name: d.name.clone(),
                        rules: Arc::clone(&d.rules),
                        value: data.value(&d.name),
                        values: Arc::clone(&values),
                        criteria_mode: settings.criteria_mode,
                    })
                    .collect();
                let targets = checks.iter().map(|check| check.name.clone()).collect();
                (targets, cleared, Work::Rules(checks))
            }
        }
    }

    /// Plan and run a validation, flagging its fields as validating while
    /// it is suspended. The result is not applied yet.
    pub(crate) async fn validate(&self, names: Option<Vec<FieldPath>>) -> Option<(Plan, Outcome)> {
        let (plan, work) = self.plan(names)?;
        let outcome = match work.start() {
            Check::Ready(outcome) => outcome,
            Check::Pending(pending) => {
                self.mark_validating(&plan);
                pending.await
            }
        };
        Some((plan, outcome))
    }

    fn mark_validating(&self, plan: &Plan) {
        {
            let mut data = self.inner.data.lock();
            for name in &plan.targets {
                data.validating.set(name, true);
            }
        }
        self.inner.notify(plan.scope.clone());
    }

    /// Validate `names` without a caller awaiting the result. Suspended
    /// validations are parked on the form's queue.
    pub(crate) fn validate_in_background(&self, names: Vec<FieldPath>) {
        let Some((plan, work)) = self.plan(Some(names)) else {
            return;
        };
        match work.start() {
            Check::Ready(outcome) => {
                self.settle(&plan, &outcome);
                self.inner.notify(plan.scope.clone());
                self.update_validity();
            }
            Check::Pending(pending) => {
                self.mark_validating(&plan);
                let form = Arc::downgrade(&self.inner);
                self.inner.queue.push(Box::pin(async move {
                    let outcome = pending.await;
                    let Some(inner) = form.upgrade() else {
                        return;
                    };
                    let form = Form { inner };
                    let _batch = BatchGuard::new(&form.inner);
                    form.settle(&plan, &outcome);
                    form.inner.notify(plan.scope.clone());
                    form.update_validity();
                }));
            }
        }
    }

    /// Merge a validation result into the error tree.
    ///
    /// Results of superseded attempts, or for fields whose value changed
    /// since the attempt started, are dropped. Does not notify.
    pub(crate) fn settle(&self, plan: &Plan, outcome: &Outcome) {
        let reports = {
            let mut data = self.inner.data.lock();
            if data.disposed {
                return;
            }
            let mut fresh = Vec::with_capacity(plan.tickets.len());
            for ticket in &plan.tickets {
                let current = self.inner.attempts.is_current(ticket, &data.value(&ticket.name));
                if self.inner.attempts.settle(ticket) {
                    data.validating.unset(&ticket.name);
                }
                if current {
                    fresh.push(ticket.name.clone());
                }
            }
            match outcome {
                Outcome::Fields(results) => {
                    for (name, error) in results {
                        if !fresh.contains(name) {
                            continue;
                        }
                        match error {
                            Some(error) => {
                                data.errors.set(name, error.clone());
                            }
                            None => {
                                data.errors.unset(name);
                            }
                        }
                    }
                }
                Outcome::Resolved(resolution) => {
                    if plan.whole && fresh.len() == plan.tickets.len() {
                        data.errors = resolution.errors.clone();
                    } else {
                        for name in &fresh {
                            let subtree = resolution.errors.get(name).cloned().unwrap_or_default();
                            data.errors.set_tree(name, subtree);
                        }
                    }
                }
            }
            let with_resolver = self.inner.resolver.is_some();
            for name in &plan.cleared {
                if data.skips_validation(name, with_resolver) && data.errors.contains(name) {
                    cov_mark::hit!(skipped_field_error_cleared);
                    data.errors.unset(name);
                }
            }
            if self.inner.settings.should_use_native_validation {
                fresh
                    .iter()
                    .filter_map(|name| {
                        let field_ref = data.fields.get(name)?.field_ref.clone()?;
                        let message = data
                            .errors
                            .leaf(name)
                            .map(|error| error.message.clone())
                            .unwrap_or_default();
                        Some((field_ref, message))
                    })
                    .collect()
            } else {
                Vec::new()
            }
        };
        for (field_ref, message) in reports {
            field_ref.report_validity(&message);
        }
    }

    /// Recompute `is_valid` without touching the error tree, but only while
    /// a subscriber tracks it.
    pub(crate) fn update_validity(&self) {
        if self.inner.scheduler.tracks(Slices::IS_VALID) {
            self.refresh_validity();
        }
    }

    fn refresh_validity(&self) {
        let (plan, ticket, work) = {
            let data = self.inner.data.lock();
            if data.disposed {
                return;
            }
            let (targets, cleared, work) = self.prepare(&data, None);
            let ticket = self
                .inner
                .attempts
                .issue(&FieldPath::root(), data.values.clone());
            let plan = Plan {
                scope: Scope::All,
                whole: true,
                targets,
                cleared,
                tickets: Vec::new(),
            };
            (plan, ticket, work)
        };
        match work.start() {
            Check::Ready(outcome) => self.apply_validity(&ticket, outcome.is_valid(&plan)),
            Check::Pending(pending) => {
                let form = Arc::downgrade(&self.inner);
                self.inner.queue.replace_validity(Box::pin(async move {
                    let valid = pending.await.is_valid(&plan);
                    if let Some(inner) = form.upgrade() {
                        Form { inner }.apply_validity(&ticket, valid);
                    }
                }));
            }
        }
    }

    fn apply_validity(&self, ticket: &Ticket, valid: bool) {
        {
            let mut data = self.inner.data.lock();
            let current = self.inner.attempts.is_current(ticket, &data.values);
            self.inner.attempts.settle(ticket);
            if !current || data.disposed {
                return;
            }
            data.is_valid = valid;
        }
        self.inner.notify(Scope::All);
    }

    /// Focus the first field, in registration order, that has an error.
    pub(crate) fn focus_first_error(&self) {
        let target = {
            let data = self.inner.data.lock();
            data.fields
                .descriptors()
                .filter(|d| d.mounted && !data.is_field_disabled(&d.name))
                .filter(|d| data.errors.contains(&d.name))
                .find_map(|d| d.field_ref.clone())
        };
        if let Some(field_ref) = target {
            cov_mark::hit!(first_error_focused);
            field_ref.focus();
        }
    }

    /// Focus an attached field below the pending focus prefix, if any.
    pub(crate) fn focus_pending(&self) {
        let target = {
            let mut data = self.inner.data.lock();
            let Some(prefix) = data.pending_focus.clone() else {
                return;
            };
            let found = data
                .fields
                .descriptors()
                .filter(|d| d.mounted && d.name.starts_with(&prefix))
                .find_map(|d| d.field_ref.clone());
            if found.is_some() {
                data.pending_focus = None;
            }
            found
        };
        if let Some(field_ref) = target {
            field_ref.focus();
        }
    }
}

impl fmt::Debug for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.inner.data.lock();
        f.debug_struct("Form")
            .field("fields", &data.fields.names().count())
            .field("disposed", &data.disposed)
            .finish_non_exhaustive()
    }
}

/// Keeps `is_loading` set while default values load.
struct LoadingGuard<'a> {
    form: &'a Form,
}

impl<'a> LoadingGuard<'a> {
    fn new(form: &'a Form) -> Result<Self, FormError> {
        {
            let mut data = form.inner.data.lock();
            if data.disposed {
                return Err(FormError::Disposed);
            }
            data.is_loading = true;
        }
        form.inner.notify(Scope::All);
        Ok(Self { form })
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.form.inner.data.lock().is_loading = false;
        self.form.inner.notify(Scope::All);
    }
}
