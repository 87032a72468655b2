//! Typed field paths and nested value access.
//!
//! Paths are parsed once into a list of [`Segment`]s and then handled as a typed
//! sequence everywhere else. The string form is only used at the API boundary:
//! `"users[0].name"`, `"users.0.name"` and `"users['0'].name"` all parse to the
//! same path, and every path prints in canonical dot notation.
//!
//! The free functions [`get`], [`set`] and [`unset`] operate on
//! [`serde_json::Value`] trees. Arrays and objects are kept apart: a numeric
//! segment creates an array, anything else creates an object.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// One step in a [`FieldPath`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// Object key.
    Key(String),
    /// Array index.
    Index(usize),
}

impl Segment {
    /// Classify a raw fragment. Only canonical integers (`0`, `17`, not `007`)
    /// become indices so that printing and re-parsing is lossless.
    fn from_fragment(fragment: &str) -> Self {
        let canonical = !fragment.is_empty()
            && fragment.bytes().all(|b| b.is_ascii_digit())
            && (fragment.len() == 1 || !fragment.starts_with('0'));
        match canonical.then(|| fragment.parse::<usize>().ok()).flatten() {
            Some(index) => Segment::Index(index),
            None => Segment::Key(fragment.to_owned()),
        }
    }

    /// Returns the index if this segment addresses an array slot.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(index) => Some(*index),
            Segment::Key(_) => None,
        }
    }

    /// The key used when this segment addresses an object.
    fn object_key(&self) -> String {
        match self {
            Segment::Key(key) => key.clone(),
            Segment::Index(index) => index.to_string(),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => f.write_str(key),
            Segment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Address of a field inside the form's value tree.
///
/// The empty path addresses the root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dot/bracket path.
    ///
    /// Quotes and closing brackets are stripped, then the string is split on
    /// `.` and `[`. Empty fragments produced by malformed or repeated brackets
    /// are dropped rather than rejected.
    pub fn parse(input: &str) -> Self {
        let cleaned: String = input
            .chars()
            .filter(|c| !matches!(c, '"' | '\'' | ']'))
            .collect();
        let segments = cleaned
            .split(['.', '['])
            .filter(|fragment| !fragment.is_empty())
            .map(Segment::from_fragment)
            .collect();
        Self { segments }
    }

    /// Build a path from already-typed segments.
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// The typed segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True for the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append an object key.
    pub fn key(&self, key: impl Into<String>) -> Self {
        self.child(Segment::Key(key.into()))
    }

    /// Append an array index.
    pub fn index(&self, index: usize) -> Self {
        self.child(Segment::Index(index))
    }

    /// Append one segment.
    pub fn child(&self, segment: Segment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// Append every segment of `rest`.
    pub fn join(&self, rest: &FieldPath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(rest.segments.iter().cloned());
        Self { segments }
    }

    /// The enclosing path, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.segments.split_last()?;
        Some(Self {
            segments: parent.to_vec(),
        })
    }

    /// Last segment, `None` for the root.
    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// True when `self` equals `prefix` or lies underneath it.
    ///
    /// Matching is per segment, so `user` is not a prefix of `username`.
    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// True when either path is a segment prefix of the other.
    pub fn is_related(&self, other: &FieldPath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// Index directly under `array`, if `self` lies inside that array.
    pub(crate) fn index_under(&self, array: &FieldPath) -> Option<usize> {
        if !self.starts_with(array) {
            return None;
        }
        self.segments.get(array.len())?.as_index()
    }

    /// Replace the index directly under `array` with `index`.
    pub(crate) fn with_index_under(&self, array: &FieldPath, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments[array.len()] = Segment::Index(index);
        Self { segments }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for FieldPath {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<String> for FieldPath {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&String> for FieldPath {
    fn from(value: &String) -> Self {
        Self::parse(value)
    }
}

impl From<&FieldPath> for FieldPath {
    fn from(value: &FieldPath) -> Self {
        value.clone()
    }
}

impl From<Vec<Segment>> for FieldPath {
    fn from(segments: Vec<Segment>) -> Self {
        Self { segments }
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Read the value at `path`.
///
/// Returns `None` when any intermediate node is missing, null or a primitive.
pub fn get<'a>(root: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.segments() {
        current = match (current, segment) {
            (Value::Object(map), segment) => map.get(&segment.object_key())?,
            (Value::Array(items), Segment::Index(index)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Read the value at `path`, or `fallback` when it is absent.
pub fn get_or(root: &Value, path: &FieldPath, fallback: Value) -> Value {
    get(root, path).cloned().unwrap_or(fallback)
}

fn empty_container(next: Option<&Segment>) -> Value {
    match next {
        Some(Segment::Index(_)) => Value::Array(Vec::new()),
        _ => Value::Object(Map::new()),
    }
}

/// Step into `current` at `segment`, creating the slot when missing.
fn child_slot<'a>(current: &'a mut Value, segment: &Segment) -> &'a mut Value {
    if let (Value::Array(items), Segment::Key(_)) = (&*current, segment) {
        // A named key on an array: keep the existing slots as object entries.
        let map = items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.is_null())
            .map(|(i, item)| (i.to_string(), item.clone()))
            .collect();
        *current = Value::Object(map);
    }
    match (current, segment) {
        (Value::Array(items), Segment::Index(index)) => {
            if items.len() <= *index {
                items.resize(index + 1, Value::Null);
            }
            &mut items[*index]
        }
        (Value::Object(map), segment) => map.entry(segment.object_key()).or_insert(Value::Null),
        _ => unreachable!("child_slot called on a primitive"),
    }
}

/// Write `value` at `path`, creating intermediate containers.
///
/// Primitives blocking the path are overwritten.
pub fn set(root: &mut Value, path: &FieldPath, value: Value) {
    let segments = path.segments();
    if segments.is_empty() {
        *root = value;
        return;
    }
    if !root.is_object() && !root.is_array() {
        *root = empty_container(segments.first());
    }
    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        let slot = child_slot(current, segment);
        if i + 1 == segments.len() {
            *slot = value;
            return;
        }
        if !slot.is_object() && !slot.is_array() {
            *slot = empty_container(segments.get(i + 1));
        }
        current = slot;
    }
}

/// True for `{}`, `[]` and arrays holding nothing but nulls.
pub fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.iter().all(Value::is_null),
        _ => false,
    }
}

fn remove_child(container: &mut Value, segment: &Segment) -> bool {
    match (container, segment) {
        (Value::Object(map), segment) => map.remove(&segment.object_key()).is_some(),
        (Value::Array(items), Segment::Index(index)) => match items.get_mut(*index) {
            Some(slot) => {
                *slot = Value::Null;
                true
            }
            None => false,
        },
        _ => false,
    }
}

fn unset_in(current: &mut Value, segments: &[Segment]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return false;
    };
    if rest.is_empty() {
        return remove_child(current, first);
    }
    let child = match (&mut *current, first) {
        (Value::Object(map), segment) => map.get_mut(&segment.object_key()),
        (Value::Array(items), Segment::Index(index)) => items.get_mut(*index),
        _ => None,
    };
    let Some(child) = child else {
        return false;
    };
    let removed = unset_in(child, rest);
    if removed && is_empty_container(child) {
        remove_child(current, first);
    }
    removed
}

/// Delete the value at `path` and prune ancestors left empty.
///
/// Object keys are removed; array slots are nulled so sibling indices keep
/// their positions. Returns whether anything was removed.
pub fn unset(root: &mut Value, path: &FieldPath) -> bool {
    unset_in(root, path.segments())
}
