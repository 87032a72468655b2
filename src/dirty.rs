//! Dirty-field computation.
//!
//! A leaf is dirty when it is not deep-equal to its default. Arrays are
//! compared as a whole: when any element differs, every index of the current
//! array is marked dirty, plus the default indices past its end. Per-element tracking inside arrays is intentionally
//! not attempted; consumers rely on the whole-array behaviour.

use serde_json::Value;

use crate::hash::FastIndexMap;
use crate::tree::FieldTree;

/// Structural equality that treats `1` and `1.0` as the same number.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| deep_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Mark every leaf of `value` dirty.
pub fn mark_all(value: &Value) -> FieldTree<bool> {
    match value {
        Value::Object(map) => FieldTree::Object(
            map.iter()
                .map(|(key, child)| (key.clone(), mark_all(child)))
                .filter(|(_, child)| !child.is_empty())
                .collect::<FastIndexMap<_, _>>(),
        ),
        Value::Array(items) => FieldTree::List(
            items
                .iter()
                .map(|item| Some(mark_all(item)).filter(|child| !child.is_empty()))
                .collect(),
        ),
        _ => FieldTree::Leaf(true),
    }
}

/// Like [`mark_all`], but a removed default without leaves still counts.
fn mark_removed(default: &Value) -> FieldTree<bool> {
    Some(mark_all(default))
        .filter(|tree| !tree.is_empty())
        .unwrap_or(FieldTree::Leaf(true))
}

/// Diff `current` against `defaults` into a pruned dirty tree.
///
/// `defaults` is `None` when no default exists at this position. Keys and
/// indices present only in the defaults are dirty as well.
pub fn compute_dirty_fields(defaults: Option<&Value>, current: &Value) -> FieldTree<bool> {
    match current {
        Value::Object(map) => {
            let Some(default_map) = defaults.map_or(Some(None), |d| d.as_object().map(Some))
            else {
                return mark_all(current);
            };
            let mut children = map
                .iter()
                .map(|(key, child)| {
                    let default = default_map.and_then(|m| m.get(key));
                    (key.clone(), compute_dirty_fields(default, child))
                })
                .filter(|(_, child)| !child.is_empty())
                .collect::<FastIndexMap<_, _>>();
            if let Some(default_map) = default_map {
                children.extend(
                    default_map
                        .iter()
                        .filter(|(key, _)| !map.contains_key(*key))
                        .map(|(key, default)| (key.clone(), mark_removed(default))),
                );
            }
            FieldTree::Object(children)
        }
        Value::Array(items) => match defaults {
            Some(default) if deep_equal(default, current) => FieldTree::new(),
            Some(Value::Array(default_items)) if default_items.len() > items.len() => {
                let kept = items
                    .iter()
                    .map(|item| Some(mark_all(item)).filter(|child| !child.is_empty()));
                let removed = default_items[items.len()..]
                    .iter()
                    .map(|default| Some(mark_removed(default)));
                FieldTree::List(kept.chain(removed).collect())
            }
            _ => mark_all(current),
        },
        _ => {
            if deep_equal(defaults.unwrap_or(&Value::Null), current) {
                FieldTree::new()
            } else {
                FieldTree::Leaf(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::FieldPath;
    use proptest::prelude::*;
    use serde_json::json;

    fn dirty(defaults: Value, current: Value) -> Value {
        serde_json::to_value(compute_dirty_fields(Some(&defaults), &current)).unwrap()
    }

    #[test]
    fn changed_leaves_are_dirty() {
        assert_eq!(
            dirty(
                json!({ "a": 1, "b": { "c": "x", "d": "y" } }),
                json!({ "a": 1, "b": { "c": "x", "d": "z" } })
            ),
            json!({ "b": { "d": true } })
        );
    }

    #[test]
    fn one_changed_element_marks_the_whole_array() {
        assert_eq!(
            dirty(
                json!({ "tags": ["a", "b", "c"] }),
                json!({ "tags": ["a", "x", "c"] })
            ),
            json!({ "tags": [true, true, true] })
        );
        assert_eq!(
            dirty(
                json!({ "users": [{ "name": "a" }] }),
                json!({ "users": [{ "name": "a" }, { "name": "" }] })
            ),
            json!({ "users": [{ "name": true }, { "name": true }] })
        );
    }

    #[test]
    fn new_keys_without_defaults_are_dirty() {
        let tree = compute_dirty_fields(None, &json!({ "users": [{ "name": "" }] }));
        assert_eq!(tree.leaf(&FieldPath::parse("users.0.name")), Some(&true));
    }

    #[test]
    fn empty_array_without_default_is_clean() {
        assert!(compute_dirty_fields(None, &json!({ "users": [] })).is_empty());
    }

    #[test]
    fn entries_missing_from_current_are_dirty() {
        assert_eq!(
            dirty(json!({ "users": ["a", "b"] }), json!({ "users": [] })),
            json!({ "users": [true, true] })
        );
        assert_eq!(
            dirty(json!({ "tags": ["a", "b", "c"] }), json!({ "tags": ["a"] })),
            json!({ "tags": [true, true, true] })
        );
        assert_eq!(
            dirty(
                json!({ "user": { "a": 1, "b": { "c": 2 }, "d": [] } }),
                json!({ "user": { "a": 1 } })
            ),
            json!({ "user": { "b": { "c": true }, "d": true } })
        );
    }

    #[test]
    fn numbers_compare_by_value() {
        assert!(deep_equal(&json!(1), &json!(1.0)));
        assert!(!deep_equal(&json!({ "a": 1 }), &json!({ "a": 1, "b": 2 })));
    }

    fn json_strategy() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i32>().prop_map(Value::from),
            "[a-z]{0,4}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,3}", inner, 0..4)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn values_equal_to_their_defaults_are_clean(value in json_strategy()) {
            prop_assert!(compute_dirty_fields(Some(&value), &value).is_empty());
        }
    }
}
