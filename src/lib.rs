#![deny(missing_docs)]

//! Field-state tracking and selective notification for client-side forms.
//!
//! A [`Form`] owns a JSON value tree, the defaults it started from and the
//! registered fields. It derives dirty, touched, error and validating trees
//! from them and pushes state snapshots only to the subscribers whose
//! declared interest actually changed.
//!
//! # Quick Start
//!
//! ```ignore
//! use formwork::{FieldRef, FormConfig, Interest, Mode, Rules, Slices, create_form};
//! use serde_json::json;
//!
//! let form = create_form(
//!     FormConfig::new()
//!         .mode(Mode::OnChange)
//!         .default_values(json!({ "email": "" })),
//! )?;
//!
//! let email = form.register("email", Rules::new().required("email is required"));
//! email.attach(FieldRef::text(my_input));
//!
//! // Only called when the email's errors change
//! let _sub = form.subscribe(Interest::new(Slices::ERRORS).name("email"), |state| {
//!     println!("email error: {:?}", state.errors.leaf(&"email".into()));
//! });
//!
//! email.on_change(); // reads the element, validates, notifies
//! ```
//!
//! # Core Types
//!
//! - [`Form`] - The form context. Cheap to clone; every clone addresses the same form.
//! - [`FieldBinding`] - Returned by [`Form::register`]. Connects an element and forwards its events.
//! - [`FieldArray`] - Structural edits of an array field with stable [`RowId`]s.
//! - [`FormState`] - Immutable snapshot handed to subscribers.
//! - [`FieldTree`] - Sparse tree mirroring the value tree, pruned when empty.
//!
//! # Validation
//!
//! Fields validate with built-in [`Rules`] (`required`, `min`, `max`,
//! `min_length`, `max_length`, `pattern`, `validate`) or, form-wide, with a
//! [`Resolver`]. Both may be asynchronous by returning [`Check::Pending`].
//!
//! ```ignore
//! let name = form.register("username", Rules::new().validate(Validator::future(|value, _| {
//!     let value = value.clone();
//!     async move { Verdict::from(is_available(&value).await) }
//! })));
//!
//! name.on_input("ada");
//! form.flush_validations().await; // drive validations started by events
//! let ok = form.trigger("username").await; // or await one directly
//! ```
//!
//! Results of a validation whose field changed in the meantime are dropped;
//! the latest attempt always wins.
//!
//! # Subscriptions
//!
//! ```ignore
//! // Everything
//! form.subscribe(Interest::all(), |state| { ... });
//!
//! // Only `is_valid`; the form keeps it current from now on
//! form.subscribe(Interest::new(Slices::IS_VALID), |state| { ... });
//!
//! // Values of one field and its children
//! form.watch("address", |values| { ... });
//! ```
//!
//! Subscribers run synchronously when an operation ends. A subscriber may
//! mutate the form; the resulting pass is delivered after the current one.
//!
//! # Batching
//!
//! ```ignore
//! form.batch(|form| {
//!     form.set_value("first", "Ada", SetValueOptions::new());
//!     form.set_value("last", "Lovelace", SetValueOptions::new());
//! }); // one notification pass
//! ```
//!
//! # Submitting
//!
//! ```ignore
//! let submit = form
//!     .handle_submit(|values| async move { save(values).await })
//!     .on_invalid(|errors| log_errors(errors));
//! submit.submit().await?;
//! ```

// Internal modules
pub(crate) mod arena;
mod batch;
mod binding;
mod config;
mod dirty;
mod element;
mod error;
mod executor;
mod field_array;
mod form;
mod hash;
pub mod path;
mod resolver;
mod rules;
mod scheduler;
mod state;
mod subject;
mod submit;
mod tree;
mod validation;

// Core types
pub use binding::FieldBinding;
pub use field_array::{FieldArray, FieldArrayOptions, Row, RowId};
pub use form::{
    Form, Names, ResetFieldOptions, ResetOptions, SetErrorOptions, SetValueOptions,
    UnregisterOptions, create_form,
};
pub use path::{FieldPath, Segment};
pub use state::{FieldState, FormState, Slices};
pub use submit::SubmitHandler;
pub use tree::FieldTree;

// Configuration
pub use config::{CriteriaMode, FormConfig, FormSettings, Mode, ParseModeError, ReValidateMode};

// Validation
pub use error::{BoxError, ErrorKind, ErrorTree, FieldError, FormError};
pub use resolver::{Resolution, Resolver, ResolverOptions};
pub use rules::{Bound, RuleValue, Rules, Validator, Verdict};
pub use validation::Check;

// Elements
pub use element::{
    CheckableElement, FieldRef, FileElement, Focusable, InputElement, SelectElement,
};

// Notification
pub use scheduler::Interest;
pub use subject::{Subject, Subscription};

// Key functions
pub use dirty::{compute_dirty_fields, deep_equal};
