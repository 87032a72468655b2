// Field arena - storage for registered field descriptors
//
// Descriptors live in a slab and are addressed by FieldId. A path index maps
// every registered FieldPath to its id and keeps registration order, which is
// the order whole-form validation and error focusing walk the fields in.
//
// FIELD LIFECYCLE:
// - register:   insert, or refresh rules of an existing descriptor (mount)
// - detach:     element gone; path recorded in the unmount set
// - cleanup:    remove_unmounted() drops descriptors of dead elements
// - unregister: descriptor removed immediately
//
// ARRAY REMAPPING:
// Field-array operations move rows. remap_array() rewrites the index segment
// of every descriptor below the array so that descriptors follow their rows.

use std::sync::Arc;

use slab::Slab;

use crate::element::FieldRef;
use crate::hash::{FastIndexMap, FastIndexSet};
use crate::path::FieldPath;
use crate::rules::Rules;

/// Unique identifier for a field descriptor in the arena.
///
/// This is a zero-cost wrapper around a slab index. Once the descriptor is
/// removed the id is stale and lookups return None.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct FieldId(u32);

impl FieldId {
    /// Convert to usize for slab indexing
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Per-field metadata.
#[derive(Clone, Debug)]
pub(crate) struct FieldDescriptor {
    pub(crate) name: FieldPath,
    pub(crate) field_ref: Option<FieldRef>,
    pub(crate) rules: Arc<Rules>,
    pub(crate) mounted: bool,
}

impl FieldDescriptor {
    /// Field-level override first, then the form's policy.
    pub(crate) fn should_unregister(&self, form_policy: bool) -> bool {
        self.rules.should_unregister.unwrap_or(form_policy)
    }

    pub(crate) fn is_disabled(&self) -> bool {
        self.rules.disabled || self.field_ref.as_ref().is_some_and(FieldRef::is_disabled)
    }
}

/// Registry of the fields of one form.
#[derive(Debug, Default)]
pub(crate) struct FieldArena {
    slab: Slab<FieldDescriptor>,
    index: FastIndexMap<FieldPath, FieldId>,
    unmounted: FastIndexSet<FieldPath>,
    arrays: FastIndexSet<FieldPath>,
}

impl FieldArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn id(&self, name: &FieldPath) -> Option<FieldId> {
        self.index.get(name).copied()
    }

    pub(crate) fn descriptor(&self, id: FieldId) -> Option<&FieldDescriptor> {
        self.slab.get(id.index())
    }

    pub(crate) fn get(&self, name: &FieldPath) -> Option<&FieldDescriptor> {
        self.descriptor(self.id(name)?)
    }

    pub(crate) fn get_mut(&mut self, name: &FieldPath) -> Option<&mut FieldDescriptor> {
        let id = self.id(name)?;
        self.slab.get_mut(id.index())
    }

    pub(crate) fn contains(&self, name: &FieldPath) -> bool {
        self.index.contains_key(name)
    }

    /// Insert a descriptor, or refresh the rules of an existing one.
    ///
    /// Returns the id and whether the descriptor is new. A refreshed
    /// descriptor keeps its element and counts as mounted again.
    pub(crate) fn register(&mut self, name: &FieldPath, rules: Rules) -> (FieldId, bool) {
        self.unmounted.shift_remove(name);
        if let Some(id) = self.id(name) {
            if let Some(descriptor) = self.slab.get_mut(id.index()) {
                descriptor.rules = Arc::new(rules);
                descriptor.mounted = true;
                return (id, false);
            }
        }
        let entry = self.slab.vacant_entry();
        let id = FieldId(entry.key() as u32);
        entry.insert(FieldDescriptor {
            name: name.clone(),
            field_ref: None,
            rules: Arc::new(rules),
            mounted: true,
        });
        self.index.insert(name.clone(), id);
        (id, true)
    }

    /// Remove the descriptor at `name` and every descriptor below it.
    pub(crate) fn remove(&mut self, name: &FieldPath) -> Vec<FieldDescriptor> {
        let doomed: Vec<FieldPath> = self
            .index
            .keys()
            .filter(|path| path.starts_with(name))
            .cloned()
            .collect();
        doomed
            .into_iter()
            .filter_map(|path| {
                self.unmounted.shift_remove(&path);
                let id = self.index.shift_remove(&path)?;
                self.slab.try_remove(id.index())
            })
            .collect()
    }

    /// Registered names in registration order.
    pub(crate) fn names(&self) -> impl Iterator<Item = &FieldPath> {
        self.index.keys()
    }

    /// Descriptors in registration order.
    pub(crate) fn descriptors(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.index
            .values()
            .filter_map(|id| self.slab.get(id.index()))
    }

    /// Registered names at or below `prefix`.
    pub(crate) fn names_under(&self, prefix: &FieldPath) -> Vec<FieldPath> {
        self.names()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Record that the element behind `name` went away.
    pub(crate) fn mark_unmounted(&mut self, name: &FieldPath) {
        if let Some(descriptor) = self.get_mut(name) {
            descriptor.mounted = false;
            self.unmounted.insert(name.clone());
        }
    }

    /// The element behind `name` is connected again.
    pub(crate) fn mark_mounted(&mut self, name: &FieldPath) {
        self.unmounted.shift_remove(name);
        if let Some(descriptor) = self.get_mut(name) {
            descriptor.mounted = true;
        }
    }

    /// Drain the unmount set.
    pub(crate) fn take_unmounted(&mut self) -> Vec<FieldPath> {
        self.unmounted.drain(..).collect()
    }

    pub(crate) fn register_array(&mut self, name: &FieldPath) {
        self.arrays.insert(name.clone());
    }

    /// Forget field arrays at or below `prefix`.
    pub(crate) fn remove_arrays(&mut self, prefix: &FieldPath) {
        self.arrays.retain(|array| !array.starts_with(prefix));
    }

    /// Outermost field array containing `name`, or `name` itself.
    pub(crate) fn array_ancestor(&self, name: &FieldPath) -> Option<&FieldPath> {
        self.arrays
            .iter()
            .filter(|array| name.starts_with(array))
            .min_by_key(|array| array.len())
    }

    /// Move descriptors below `array` to new row indices.
    ///
    /// `map` receives a row's old index and returns its new one, or `None`
    /// when the row was removed. Moved descriptors keep their position in
    /// registration order, sorted by their new path.
    pub(crate) fn remap_array<F>(&mut self, array: &FieldPath, map: F)
    where
        F: Fn(usize) -> Option<usize>,
    {
        let nested: Vec<FieldPath> = self.arrays.iter().cloned().collect();
        self.arrays = nested
            .into_iter()
            .filter_map(|path| match path.index_under(array) {
                Some(row) => Some(path.with_index_under(array, map(row)?)),
                None => Some(path),
            })
            .collect();

        let affected: Vec<(usize, FieldPath, usize)> = self
            .index
            .keys()
            .enumerate()
            .filter_map(|(pos, path)| Some((pos, path.clone(), path.index_under(array)?)))
            .collect();
        let Some(&(anchor, _, _)) = affected.first() else {
            return;
        };

        let mut moved = Vec::with_capacity(affected.len());
        for (_, path, row) in affected {
            let Some(id) = self.index.shift_remove(&path) else {
                continue;
            };
            let was_unmounted = self.unmounted.shift_remove(&path);
            match map(row) {
                Some(new_row) => {
                    let new_path = path.with_index_under(array, new_row);
                    if let Some(descriptor) = self.slab.get_mut(id.index()) {
                        descriptor.name = new_path.clone();
                    }
                    moved.push((new_path, id, was_unmounted));
                }
                None => {
                    cov_mark::hit!(descriptor_dropped_with_row);
                    self.slab.try_remove(id.index());
                }
            }
        }

        moved.sort_by(|a, b| a.0.cmp(&b.0));
        for (offset, (path, id, was_unmounted)) in moved.into_iter().enumerate() {
            if was_unmounted {
                self.unmounted.insert(path.clone());
            }
            let at = (anchor + offset).min(self.index.len());
            self.index.shift_insert(at, path, id);
        }
    }
}
