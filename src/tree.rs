//! Derived state trees.
//!
//! Dirty, touched, validating and error state all mirror the shape of the
//! value tree, with leaves replaced by a flag or an error. [`FieldTree`] keeps
//! those mirrors pruned: a node exists only while at least one leaf below it
//! does, so an empty tree compares equal to a fresh one and serializes to
//! nothing.

use serde::{Serialize, Serializer};

use crate::hash::FastIndexMap;
use crate::path::{FieldPath, Segment};

/// A pruned tree addressed by [`FieldPath`].
#[derive(Clone, Debug, PartialEq)]
pub enum FieldTree<T> {
    /// A terminal value.
    Leaf(T),
    /// Named children.
    Object(FastIndexMap<String, FieldTree<T>>),
    /// Indexed children. `None` marks a hole; trailing holes are trimmed.
    List(Vec<Option<FieldTree<T>>>),
}

impl<T> Default for FieldTree<T> {
    fn default() -> Self {
        FieldTree::Object(FastIndexMap::default())
    }
}

impl<T> FieldTree<T> {
    /// An empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no leaf exists anywhere in the tree.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldTree::Leaf(_) => false,
            FieldTree::Object(children) => children.is_empty(),
            FieldTree::List(items) => items.iter().all(Option::is_none),
        }
    }

    fn child(&self, segment: &Segment) -> Option<&FieldTree<T>> {
        match (self, segment) {
            (FieldTree::Object(children), Segment::Key(key)) => children.get(key),
            (FieldTree::Object(children), Segment::Index(index)) => {
                children.get(&index.to_string())
            }
            (FieldTree::List(items), Segment::Index(index)) => items.get(*index)?.as_ref(),
            _ => None,
        }
    }

    fn child_mut(&mut self, segment: &Segment) -> Option<&mut FieldTree<T>> {
        match (self, segment) {
            (FieldTree::Object(children), Segment::Key(key)) => children.get_mut(key),
            (FieldTree::Object(children), Segment::Index(index)) => {
                children.get_mut(&index.to_string())
            }
            (FieldTree::List(items), Segment::Index(index)) => items.get_mut(*index)?.as_mut(),
            _ => None,
        }
    }

    /// Subtree at `path`.
    pub fn get(&self, path: &FieldPath) -> Option<&FieldTree<T>> {
        path.segments()
            .iter()
            .try_fold(self, |node, segment| node.child(segment))
    }

    pub(crate) fn get_mut(&mut self, path: &FieldPath) -> Option<&mut FieldTree<T>> {
        path.segments()
            .iter()
            .try_fold(self, |node, segment| node.child_mut(segment))
    }

    /// Leaf value at `path`, if the node there is a leaf.
    pub fn leaf(&self, path: &FieldPath) -> Option<&T> {
        match self.get(path)? {
            FieldTree::Leaf(value) => Some(value),
            _ => None,
        }
    }

    /// True when any leaf exists at or below `path`.
    pub fn contains(&self, path: &FieldPath) -> bool {
        self.get(path).is_some_and(|node| !node.is_empty())
    }

    /// Make `self` a container able to hold `segment`, then return its slot.
    fn slot_for(&mut self, segment: &Segment) -> &mut FieldTree<T> {
        if matches!(segment, Segment::Key(_)) {
            if let FieldTree::List(items) = self {
                // Named key on a list: re-key the existing slots.
                let children = std::mem::take(items)
                    .into_iter()
                    .enumerate()
                    .filter_map(|(i, item)| Some((i.to_string(), item?)))
                    .collect();
                *self = FieldTree::Object(children);
            }
        }
        let fits = match (&*self, segment) {
            (FieldTree::Leaf(_), _) => false,
            (FieldTree::Object(children), Segment::Index(_)) => !children.is_empty(),
            (FieldTree::Object(_), Segment::Key(_)) => true,
            (FieldTree::List(_), Segment::Index(_)) => true,
            (FieldTree::List(_), Segment::Key(_)) => false,
        };
        if !fits {
            *self = match segment {
                Segment::Index(_) => FieldTree::List(Vec::new()),
                Segment::Key(_) => FieldTree::Object(FastIndexMap::default()),
            };
        }
        match (self, segment) {
            (FieldTree::Object(children), segment) => {
                let key = match segment {
                    Segment::Key(key) => key.clone(),
                    Segment::Index(index) => index.to_string(),
                };
                children.entry(key).or_default()
            }
            (FieldTree::List(items), Segment::Index(index)) => {
                if items.len() <= *index {
                    items.resize_with(index + 1, || None);
                }
                items[*index].get_or_insert_with(FieldTree::default)
            }
            _ => unreachable!("slot_for prepared a matching container"),
        }
    }

    /// Place `node` at `path`, replacing whatever was there.
    ///
    /// An empty `node` removes the path instead, keeping the tree pruned.
    pub fn set_tree(&mut self, path: &FieldPath, node: FieldTree<T>) {
        if node.is_empty() {
            self.unset(path);
            return;
        }
        let mut current = self;
        for segment in path.segments() {
            current = current.slot_for(segment);
        }
        *current = node;
    }

    /// Remove the subtree at `path` and prune emptied ancestors.
    ///
    /// Returns whether anything was removed.
    pub fn unset(&mut self, path: &FieldPath) -> bool {
        self.take(path).is_some()
    }

    /// Remove and return the subtree at `path`, pruning emptied ancestors.
    pub fn take(&mut self, path: &FieldPath) -> Option<FieldTree<T>> {
        let segments = path.segments();
        if segments.is_empty() {
            let taken = std::mem::take(self);
            return (!taken.is_empty()).then_some(taken);
        }
        self.take_in(segments)
    }

    fn take_in(&mut self, segments: &[Segment]) -> Option<FieldTree<T>> {
        let (first, rest) = segments.split_first()?;
        let taken = if rest.is_empty() {
            self.remove_child(first)
        } else {
            let child = self.child_mut(first)?;
            let taken = child.take_in(rest);
            if taken.is_some() && child.is_empty() {
                self.remove_child(first);
            }
            taken
        };
        if let FieldTree::List(items) = self {
            trim_holes(items);
        }
        taken
    }

    fn remove_child(&mut self, segment: &Segment) -> Option<FieldTree<T>> {
        match (self, segment) {
            (FieldTree::Object(children), Segment::Key(key)) => children.shift_remove(key),
            (FieldTree::Object(children), Segment::Index(index)) => {
                children.shift_remove(&index.to_string())
            }
            (FieldTree::List(items), Segment::Index(index)) => items.get_mut(*index)?.take(),
            _ => None,
        }
    }

    /// Every leaf with its full path, in tree order.
    pub fn leaves(&self) -> Vec<(FieldPath, &T)> {
        let mut out = Vec::new();
        self.collect_leaves(FieldPath::root(), &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, at: FieldPath, out: &mut Vec<(FieldPath, &'a T)>) {
        match self {
            FieldTree::Leaf(value) => out.push((at, value)),
            FieldTree::Object(children) => {
                for (key, child) in children {
                    child.collect_leaves(at.key(key.clone()), out);
                }
            }
            FieldTree::List(items) => {
                for (index, child) in items.iter().enumerate() {
                    if let Some(child) = child {
                        child.collect_leaves(at.index(index), out);
                    }
                }
            }
        }
    }

    /// Run `edit` on the list stored at `path`, then restore the pruning
    /// invariant. Paths holding no list are left untouched.
    pub(crate) fn edit_list<F>(&mut self, path: &FieldPath, edit: F)
    where
        F: FnOnce(&mut Vec<Option<FieldTree<T>>>),
    {
        let Some(FieldTree::List(items)) = self.get_mut(path) else {
            return;
        };
        edit(items);
        trim_holes(items);
        let emptied = items.is_empty();
        if emptied {
            cov_mark::hit!(list_pruned_after_edit);
            self.unset(path);
        }
    }
}

impl<T: PartialEq> FieldTree<T> {
    /// Store `value` at `path`. Returns false when the same leaf was already
    /// there.
    pub fn set(&mut self, path: &FieldPath, value: T) -> bool {
        if self.leaf(path) == Some(&value) {
            return false;
        }
        self.set_tree(path, FieldTree::Leaf(value));
        true
    }
}

fn trim_holes<T>(items: &mut Vec<Option<FieldTree<T>>>) {
    while items.last().is_some_and(|item| item.as_ref().is_none_or(FieldTree::is_empty)) {
        items.pop();
    }
}

impl<T: Serialize> Serialize for FieldTree<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldTree::Leaf(value) => value.serialize(serializer),
            FieldTree::Object(children) => serializer.collect_map(children.iter()),
            FieldTree::List(items) => serializer.collect_seq(items.iter()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> FieldPath {
        FieldPath::parse(s)
    }

    #[test]
    fn numeric_segments_create_lists() {
        let mut tree = FieldTree::new();
        tree.set(&path("users.1.name"), true);

        assert_eq!(
            serde_json::to_value(&tree).unwrap(),
            json!({ "users": [null, { "name": true }] })
        );
        assert_eq!(tree.leaf(&path("users.1.name")), Some(&true));
        assert!(tree.contains(&path("users")));
        assert!(!tree.contains(&path("users.0")));
    }

    #[test]
    fn set_reports_unchanged_leaves() {
        let mut tree = FieldTree::new();
        assert!(tree.set(&path("a"), 1));
        assert!(!tree.set(&path("a"), 1));
        assert!(tree.set(&path("a"), 2));
    }

    #[test]
    fn unset_prunes_up_to_the_root() {
        let mut tree = FieldTree::new();
        tree.set(&path("a.b.0.c"), true);
        tree.set(&path("x"), true);

        assert!(tree.unset(&path("a.b.0.c")));
        assert_eq!(tree.get(&path("a")), None);
        assert_eq!(serde_json::to_value(&tree).unwrap(), json!({ "x": true }));
        assert!(!tree.unset(&path("a.b")));
    }

    #[test]
    fn removing_the_last_list_slot_trims_the_list() {
        let mut tree = FieldTree::new();
        tree.set(&path("list.0"), true);
        tree.set(&path("list.2"), true);

        tree.unset(&path("list.2"));
        assert_eq!(
            serde_json::to_value(&tree).unwrap(),
            json!({ "list": [true] })
        );
    }

    #[test]
    fn leaf_is_replaced_by_container_and_back() {
        let mut tree = FieldTree::new();
        tree.set(&path("a"), 1);
        tree.set(&path("a.b"), 2);
        assert_eq!(tree.leaf(&path("a.b")), Some(&2));

        tree.set(&path("a"), 3);
        assert_eq!(tree.leaf(&path("a")), Some(&3));
        assert_eq!(tree.get(&path("a.b")), None);
    }

    #[test]
    fn empty_set_tree_unsets() {
        let mut tree = FieldTree::new();
        tree.set(&path("a.b"), true);
        tree.set_tree(&path("a"), FieldTree::new());
        assert!(tree.is_empty());
        assert_eq!(tree, FieldTree::new());
    }

    #[test]
    fn edit_list_prunes_emptied_lists() {
        cov_mark::check!(list_pruned_after_edit);
        let mut tree = FieldTree::new();
        tree.set(&path("users.0.name"), true);

        tree.edit_list(&path("users"), |items| {
            items.remove(0);
        });
        assert!(tree.is_empty());
    }

    #[test]
    fn leaves_are_listed_with_paths() {
        let mut tree = FieldTree::new();
        tree.set(&path("b"), 2);
        tree.set(&path("a.0"), 1);

        let leaves: Vec<_> = tree
            .leaves()
            .into_iter()
            .map(|(p, v)| (p.to_string(), *v))
            .collect();
        assert_eq!(leaves, [("b".to_string(), 2), ("a.0".to_string(), 1)]);
    }
}
