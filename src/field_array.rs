//! Structural operations on array-valued fields.
//!
//! Every row of a field array carries a [`RowId`] that survives reordering,
//! so a UI can key its row components by id. Each operation rewrites the
//! array value and moves everything attached to a row along with it:
//!
//! - errors and touched state follow the row's new index
//! - registered field descriptors are renamed to the row's new index
//! - validation in flight for the array is abandoned
//! - dirty state is re-derived for the whole array against its default
//!
//! Each operation publishes exactly one notification pass.

use std::fmt;
use std::sync::atomic::Ordering;

use serde::Serialize;
use serde_json::Value;

use crate::batch::BatchGuard;
use crate::form::{Form, FormData};
use crate::path::{self, FieldPath};
use crate::scheduler::Scope;
use crate::tree::FieldTree;

/// Stable identity of one row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RowId(u64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row-{}", self.0)
    }
}

/// One row: its id and current value.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Row {
    /// Identity that follows the row through moves.
    pub id: RowId,
    /// The row's value.
    pub value: Value,
}

/// Focus behaviour of inserting operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldArrayOptions {
    pub(crate) should_focus: bool,
    pub(crate) focus_index: Option<usize>,
    pub(crate) focus_name: Option<FieldPath>,
}

impl Default for FieldArrayOptions {
    fn default() -> Self {
        Self {
            should_focus: true,
            focus_index: None,
            focus_name: None,
        }
    }
}

impl FieldArrayOptions {
    /// Focus the first inserted row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Focus a field of the inserted row once its element is attached.
    ///
    /// Default: `true`
    pub fn should_focus(mut self, should_focus: bool) -> Self {
        self.should_focus = should_focus;
        self
    }

    /// Row to focus instead of the first inserted one.
    ///
    /// Default: the first inserted row
    pub fn focus_index(mut self, index: usize) -> Self {
        self.focus_index = Some(index);
        self
    }

    /// Field inside the row to focus, relative to the row.
    ///
    /// Default: the first field of the row that gets an element
    pub fn focus_name(mut self, name: impl Into<FieldPath>) -> Self {
        self.focus_name = Some(name.into());
        self
    }
}

/// Where a row of the rewritten array comes from.
enum Slot {
    /// Row `n` of the old array, unchanged.
    Old(usize),
    /// Row `n` of the old array with a new value and a fresh id.
    Replaced(usize, Value),
    /// A new row.
    New(Value),
}

impl Slot {
    fn source(&self) -> Option<usize> {
        match self {
            Slot::Old(from) | Slot::Replaced(from, _) => Some(*from),
            Slot::New(_) => None,
        }
    }
}

/// Rows of an inserting call: an array value inserts one row per item.
fn rows_of(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        single => vec![single],
    }
}

/// Handle to the array at one path. See [`Form::field_array`].
#[derive(Clone, Debug)]
pub struct FieldArray {
    form: Form,
    name: FieldPath,
}

impl FieldArray {
    pub(crate) fn new(form: Form, name: FieldPath) -> Self {
        form.inner.data.lock().fields.register_array(&name);
        Self { form, name }
    }

    /// The array's path.
    pub fn name(&self) -> &FieldPath {
        &self.name
    }

    /// Current rows.
    pub fn fields(&self) -> Vec<Row> {
        let mut data = self.form.inner.data.lock();
        let items = items(&data, &self.name);
        let ids = self.row_ids(&mut data, items.len());
        ids.into_iter()
            .zip(items)
            .map(|(id, value)| Row { id, value })
            .collect()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        items(&self.form.inner.data.lock(), &self.name).len()
    }

    /// True when the array has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add rows at the end.
    pub fn append(&self, value: impl Into<Value>) {
        self.append_with(value, FieldArrayOptions::default());
    }

    /// [`append`](Self::append) with focus options.
    pub fn append_with(&self, value: impl Into<Value>, options: FieldArrayOptions) {
        let rows = rows_of(value.into());
        self.apply(
            |len| {
                let mut slots: Vec<Slot> = (0..len).map(Slot::Old).collect();
                slots.extend(rows.into_iter().map(Slot::New));
                Some((slots, len))
            },
            Some(options),
        );
    }

    /// Add rows at the start.
    pub fn prepend(&self, value: impl Into<Value>) {
        self.prepend_with(value, FieldArrayOptions::default());
    }

    /// [`prepend`](Self::prepend) with focus options.
    pub fn prepend_with(&self, value: impl Into<Value>, options: FieldArrayOptions) {
        let rows = rows_of(value.into());
        self.apply(
            |len| {
                let mut slots: Vec<Slot> = rows.into_iter().map(Slot::New).collect();
                slots.extend((0..len).map(Slot::Old));
                Some((slots, 0))
            },
            Some(options),
        );
    }

    /// Add rows before `index`. Indices past the end append.
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        self.insert_with(index, value, FieldArrayOptions::default());
    }

    /// [`insert`](Self::insert) with focus options.
    pub fn insert_with(&self, index: usize, value: impl Into<Value>, options: FieldArrayOptions) {
        let rows = rows_of(value.into());
        self.apply(
            |len| {
                let at = index.min(len);
                let mut slots: Vec<Slot> = (0..at).map(Slot::Old).collect();
                slots.extend(rows.into_iter().map(Slot::New));
                slots.extend((at..len).map(Slot::Old));
                Some((slots, at))
            },
            Some(options),
        );
    }

    /// Remove the row at `index`. Out of range indices are ignored.
    pub fn remove(&self, index: usize) {
        self.remove_many([index]);
    }

    /// Remove several rows.
    pub fn remove_many(&self, indices: impl IntoIterator<Item = usize>) {
        let doomed: Vec<usize> = indices.into_iter().collect();
        self.apply(
            |len| {
                if !doomed.iter().any(|&index| index < len) {
                    return None;
                }
                let slots = (0..len)
                    .filter(|index| !doomed.contains(index))
                    .map(Slot::Old)
                    .collect();
                Some((slots, 0))
            },
            None,
        );
    }

    /// Remove every row. The array value stays, empty.
    pub fn remove_all(&self) {
        self.apply(|_| Some((Vec::new(), 0)), None);
    }

    /// Swap two rows.
    pub fn swap(&self, a: usize, b: usize) {
        self.apply(
            |len| {
                if a >= len || b >= len {
                    return None;
                }
                let slots = (0..len)
                    .map(|index| match index {
                        i if i == a => Slot::Old(b),
                        i if i == b => Slot::Old(a),
                        i => Slot::Old(i),
                    })
                    .collect();
                Some((slots, 0))
            },
            None,
        );
    }

    /// Move the row at `from` to `to`, shifting the rows in between.
    pub fn move_row(&self, from: usize, to: usize) {
        self.apply(
            |len| {
                if from >= len {
                    return None;
                }
                let mut order: Vec<usize> = (0..len).collect();
                let row = order.remove(from);
                order.insert(to.min(len - 1), row);
                Some((order.into_iter().map(Slot::Old).collect(), 0))
            },
            None,
        );
    }

    /// Replace the value of the row at `index`. The row gets a fresh id but
    /// keeps its fields, errors and touched state.
    pub fn update(&self, index: usize, value: impl Into<Value>) {
        let value = value.into();
        self.apply(
            |len| {
                if index >= len {
                    return None;
                }
                let mut slots: Vec<Slot> = (0..len).map(Slot::Old).collect();
                slots[index] = Slot::Replaced(index, value);
                Some((slots, 0))
            },
            None,
        );
    }

    /// Replace every row. Every row gets a fresh id.
    pub fn replace(&self, values: impl IntoIterator<Item = Value>) {
        let values: Vec<Value> = values.into_iter().collect();
        self.apply(
            |len| {
                let slots = values
                    .into_iter()
                    .enumerate()
                    .map(|(i, value)| {
                        if i < len {
                            Slot::Replaced(i, value)
                        } else {
                            Slot::New(value)
                        }
                    })
                    .collect();
                Some((slots, 0))
            },
            None,
        );
    }

    fn next_id(&self) -> RowId {
        RowId(self.form.inner.next_row.fetch_add(1, Ordering::Relaxed))
    }

    /// Row ids for an array of `len` rows; regenerated when the array was
    /// rewritten behind the controller's back.
    fn row_ids(&self, data: &mut FormData, len: usize) -> Vec<RowId> {
        if let Some(ids) = data.rows.get(&self.name) {
            if ids.len() == len {
                return ids.clone();
            }
        }
        let ids: Vec<RowId> = (0..len).map(|_| self.next_id()).collect();
        data.rows.insert(self.name.clone(), ids.clone());
        ids
    }

    /// Rewrite the array.
    ///
    /// `edit` receives the current length and returns the new layout plus the
    /// first inserted index, or `None` to leave the array alone.
    fn apply<F>(&self, edit: F, focus: Option<FieldArrayOptions>)
    where
        F: FnOnce(usize) -> Option<(Vec<Slot>, usize)>,
    {
        let name = &self.name;
        let _batch = BatchGuard::new(&self.form.inner);
        let writes = {
            let mut data = self.form.inner.data.lock();
            if data.disposed {
                return;
            }
            let mut old = items(&data, name);
            let Some((slots, inserted_at)) = edit(old.len()) else {
                cov_mark::hit!(array_edit_out_of_range);
                return;
            };
            let old_ids = self.row_ids(&mut data, old.len());

            // 1. Build the new value array and row ids.
            let sources: Vec<Option<usize>> = slots.iter().map(Slot::source).collect();
            let mut moved_to = vec![None; old.len()];
            let mut values = Vec::with_capacity(slots.len());
            let mut ids = Vec::with_capacity(slots.len());
            for (at, slot) in slots.into_iter().enumerate() {
                if let Some(from) = slot.source() {
                    if let Some(target) = moved_to.get_mut(from) {
                        *target = Some(at);
                    }
                }
                match slot {
                    Slot::Old(from) => {
                        let value = old.get_mut(from).map(Value::take).unwrap_or_default();
                        values.push(value);
                        ids.push(old_ids.get(from).copied().unwrap_or_else(|| self.next_id()));
                    }
                    Slot::Replaced(_, value) | Slot::New(value) => {
                        values.push(value);
                        ids.push(self.next_id());
                    }
                }
            }
            tracing::debug!(array = %name, from = old.len(), to = values.len(), "field array edited");
            path::set(&mut data.values, name, Value::Array(values));
            data.rows.retain(|array, _| array == name || !array.starts_with(name));
            data.rows.insert(name.clone(), ids);

            // 2. Move per-row state along with the rows.
            permute(&mut data.errors, name, &sources);
            permute(&mut data.touched, name, &sources);
            data.validating.unset(name);
            self.form.inner.attempts.forget_under(name);
            data.fields.register_array(name);
            data.fields
                .remap_array(name, |row| moved_to.get(row).copied().flatten());

            // 3. Dirty state is derived from the array as a whole.
            data.refresh_dirty(name);

            // 4. Remember which row takes focus once its element shows up.
            if let Some(options) = focus.filter(|options| options.should_focus) {
                let row = options.focus_index.unwrap_or(inserted_at);
                let mut target = name.index(row);
                if let Some(field) = &options.focus_name {
                    target = target.join(field);
                }
                data.pending_focus = Some(target);
            }

            data.fields
                .descriptors()
                .filter(|d| d.name.starts_with(name))
                .filter_map(|d| Some((d.field_ref.clone()?, data.value(&d.name))))
                .collect::<Vec<_>>()
        };
        for (field_ref, value) in writes {
            field_ref.write(&value);
        }
        self.form.inner.notify(Scope::field(name.clone()));
        self.form.focus_pending();
        self.form.update_validity();
    }
}

/// Current items of the array at `name`.
fn items(data: &FormData, name: &FieldPath) -> Vec<Value> {
    path::get(&data.values, name)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Reorder the list at `array` so that slot `n` holds the old slot
/// `sources[n]`.
fn permute<T>(tree: &mut FieldTree<T>, array: &FieldPath, sources: &[Option<usize>]) {
    tree.edit_list(array, |items| {
        let mut old = std::mem::take(items);
        *items = sources
            .iter()
            .map(|source| source.and_then(|from| old.get_mut(from).and_then(Option::take)))
            .collect();
    });
}
