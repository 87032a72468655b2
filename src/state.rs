//! Form state snapshots and slice bookkeeping.
//!
//! A [`FormState`] is an immutable picture of the whole form taken after a
//! mutation. The scheduler diffs consecutive snapshots slice by slice and
//! bumps one revision counter per changed slice; subscribers remember the
//! counters they last saw and are only called when one of theirs moved.

use bitflags::bitflags;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ErrorTree, FieldError};
use crate::path::FieldPath;
use crate::tree::FieldTree;

bitflags! {
    /// Named parts of [`FormState`] a subscriber can be interested in.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Slices: u16 {
        /// [`FormState::values`]
        const VALUES = 1 << 0;
        /// [`FormState::errors`]
        const ERRORS = 1 << 1;
        /// [`FormState::dirty_fields`]
        const DIRTY_FIELDS = 1 << 2;
        /// [`FormState::touched_fields`]
        const TOUCHED_FIELDS = 1 << 3;
        /// [`FormState::validating_fields`]
        const VALIDATING_FIELDS = 1 << 4;
        /// [`FormState::is_dirty`]
        const IS_DIRTY = 1 << 5;
        /// [`FormState::is_valid`]
        const IS_VALID = 1 << 6;
        /// [`FormState::is_validating`]
        const IS_VALIDATING = 1 << 7;
        /// [`FormState::is_submitted`]
        const IS_SUBMITTED = 1 << 8;
        /// [`FormState::is_submitting`]
        const IS_SUBMITTING = 1 << 9;
        /// [`FormState::is_submit_successful`]
        const IS_SUBMIT_SUCCESSFUL = 1 << 10;
        /// [`FormState::submit_count`]
        const SUBMIT_COUNT = 1 << 11;
        /// [`FormState::disabled`]
        const DISABLED = 1 << 12;
        /// [`FormState::is_loading`]
        const IS_LOADING = 1 << 13;
        /// [`FormState::focused_field`]
        const FOCUSED_FIELD = 1 << 14;
    }
}

const SLICE_COUNT: usize = 15;

fn slot(slice: Slices) -> usize {
    slice.bits().trailing_zeros() as usize
}

/// One revision counter per slice.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Revisions([u64; SLICE_COUNT]);

impl Revisions {
    pub(crate) fn bump(&mut self, slices: Slices) {
        for slice in slices.iter() {
            self.0[slot(slice)] += 1;
        }
    }

    /// True when any slice in `interest` has a different revision in `seen`.
    pub(crate) fn differs(&self, seen: &Revisions, interest: Slices) -> bool {
        interest
            .iter()
            .any(|slice| self.0[slot(slice)] != seen.0[slot(slice)])
    }

    /// Copy the revisions of `interest` into `self`.
    pub(crate) fn observe(&mut self, current: &Revisions, interest: Slices) {
        for slice in interest.iter() {
            self.0[slot(slice)] = current.0[slot(slice)];
        }
    }
}

/// Snapshot of a form.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormState {
    /// Every value, including unregistered ones.
    pub values: Value,
    /// Validation errors by path.
    pub errors: ErrorTree,
    /// Fields whose value differs from its default.
    pub dirty_fields: FieldTree<bool>,
    /// Fields that lost focus at least once since the last reset.
    pub touched_fields: FieldTree<bool>,
    /// Fields with an asynchronous validation in flight.
    pub validating_fields: FieldTree<bool>,
    /// Any field is dirty.
    pub is_dirty: bool,
    /// Last known overall validity.
    pub is_valid: bool,
    /// Any validation is in flight.
    pub is_validating: bool,
    /// A submit was attempted.
    pub is_submitted: bool,
    /// A submit is running.
    pub is_submitting: bool,
    /// The last submit passed validation and its handler succeeded.
    pub is_submit_successful: bool,
    /// Number of submit attempts.
    pub submit_count: u32,
    /// The whole form is disabled.
    pub disabled: bool,
    /// Default values are being loaded.
    pub is_loading: bool,
    /// Field that currently has focus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focused_field: Option<FieldPath>,
}

impl Default for FormState {
    fn default() -> Self {
        Self {
            values: Value::Object(Default::default()),
            errors: ErrorTree::new(),
            dirty_fields: FieldTree::new(),
            touched_fields: FieldTree::new(),
            validating_fields: FieldTree::new(),
            is_dirty: false,
            is_valid: false,
            is_validating: false,
            is_submitted: false,
            is_submitting: false,
            is_submit_successful: false,
            submit_count: 0,
            disabled: false,
            is_loading: false,
            focused_field: None,
        }
    }
}

impl FormState {
    /// Slices whose content differs between `self` and `next`.
    pub fn changed(&self, next: &FormState) -> Slices {
        let mut changed = Slices::empty();
        changed.set(Slices::VALUES, self.values != next.values);
        changed.set(Slices::ERRORS, self.errors != next.errors);
        changed.set(Slices::DIRTY_FIELDS, self.dirty_fields != next.dirty_fields);
        changed.set(
            Slices::TOUCHED_FIELDS,
            self.touched_fields != next.touched_fields,
        );
        changed.set(
            Slices::VALIDATING_FIELDS,
            self.validating_fields != next.validating_fields,
        );
        changed.set(Slices::IS_DIRTY, self.is_dirty != next.is_dirty);
        changed.set(Slices::IS_VALID, self.is_valid != next.is_valid);
        changed.set(Slices::IS_VALIDATING, self.is_validating != next.is_validating);
        changed.set(Slices::IS_SUBMITTED, self.is_submitted != next.is_submitted);
        changed.set(Slices::IS_SUBMITTING, self.is_submitting != next.is_submitting);
        changed.set(
            Slices::IS_SUBMIT_SUCCESSFUL,
            self.is_submit_successful != next.is_submit_successful,
        );
        changed.set(Slices::SUBMIT_COUNT, self.submit_count != next.submit_count);
        changed.set(Slices::DISABLED, self.disabled != next.disabled);
        changed.set(Slices::IS_LOADING, self.is_loading != next.is_loading);
        changed.set(Slices::FOCUSED_FIELD, self.focused_field != next.focused_field);
        changed
    }

    /// Per-field view of this snapshot.
    pub fn field(&self, path: &FieldPath) -> FieldState {
        let error = self.errors.leaf(path).cloned();
        FieldState {
            invalid: self.errors.contains(path),
            is_dirty: self.dirty_fields.contains(path),
            is_touched: self.touched_fields.contains(path),
            is_validating: self.validating_fields.contains(path),
            error,
        }
    }
}

/// State of a single field.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldState {
    /// An error exists at or below the field.
    pub invalid: bool,
    /// The field (or something below it) is dirty.
    pub is_dirty: bool,
    /// The field (or something below it) is touched.
    pub is_touched: bool,
    /// A validation of the field is in flight.
    pub is_validating: bool,
    /// The field's own error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FieldError>,
}
