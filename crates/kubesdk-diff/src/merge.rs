//!
//! # Merge patch computation
//!
//! Produces the body of an `application/merge-patch+json` request from two
//! snapshots of the same resource. Fields removed in the desired snapshot are
//! emitted as `null` deletion markers. List fields are replaced wholesale
//! unless the declared shape carries a merge key, in which case elements are
//! matched by key and merged recursively in the desired order.
//!
//! A keyed element present in the original but omitted from the desired
//! snapshot is left alone; deletion of keyed elements is not expressed by
//! omission.
//!
use serde_json::{Map, Value};

use kubesdk_types::Shape;

use crate::path::{Path, PathStep};

/// full merge patch; an empty object means the snapshots are identical
pub fn diff(shape: &Shape, original: &Value, desired: &Value) -> Value {
    node_diff(shape, original, desired).unwrap_or_else(|| Value::Object(Map::new()))
}

/// difference at one node, `None` when the node is unchanged
fn node_diff(shape: &Shape, original: &Value, desired: &Value) -> Option<Value> {
    if original == desired {
        return None;
    }
    match (original, desired) {
        (Value::Object(old), Value::Object(new)) => object_diff(shape, old, new),
        (Value::Array(old), Value::Array(new)) => list_diff(shape, old, new),
        _ => Some(desired.clone()),
    }
}

fn object_diff(
    shape: &Shape,
    old: &Map<String, Value>,
    new: &Map<String, Value>,
) -> Option<Value> {
    let mut patch = Map::new();

    for (key, new_val) in new {
        match old.get(key) {
            Some(old_val) => {
                let child_shape = child_shape(shape, key);
                if let Some(change) = node_diff(child_shape, old_val, new_val) {
                    patch.insert(key.clone(), change);
                }
            }
            None => {
                patch.insert(key.clone(), new_val.clone());
            }
        }
    }

    // deletion markers for fields dropped from the desired snapshot
    for key in old.keys() {
        if !new.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    if patch.is_empty() {
        None
    } else {
        Some(Value::Object(patch))
    }
}

fn list_diff(shape: &Shape, old: &[Value], new: &[Value]) -> Option<Value> {
    let Some(merge_key) = shape.merge_key() else {
        // no merge key declared: lists change wholesale
        return Some(Value::Array(new.to_vec()));
    };
    let item_shape = shape.item().unwrap_or(&Shape::Any);

    let mut patch_items = Vec::new();
    for new_elem in new {
        let Some(key_val) = new_elem.get(merge_key) else {
            // element without its merge key cannot be matched; send it whole
            patch_items.push(new_elem.clone());
            continue;
        };
        let matched = old.iter().find(|e| e.get(merge_key) == Some(key_val));
        match matched {
            Some(old_elem) => match node_diff(item_shape, old_elem, new_elem) {
                None => {}
                Some(Value::Object(mut change)) => {
                    change.insert(merge_key.to_owned(), key_val.clone());
                    patch_items.push(Value::Object(change));
                }
                // element changed type entirely, send the new one whole
                Some(_) => patch_items.push(new_elem.clone()),
            },
            None => patch_items.push(new_elem.clone()),
        }
    }

    if patch_items.is_empty() {
        None
    } else {
        Some(Value::Array(patch_items))
    }
}

fn child_shape<'a>(shape: &'a Shape, key: &str) -> &'a Shape {
    shape
        .field(key)
        .or_else(|| shape.value())
        .unwrap_or(&Shape::Any)
}

/// Intersects a computed merge patch with a set of scoped paths. Only
/// sub-trees addressed by at least one path survive; everything else is
/// dropped. A patch that deletes or retypes an ancestor of a scoped path is
/// narrowed to deletion markers at the scoped leaves, so siblings outside
/// the scope are never touched. Paths that descend into list interiors keep
/// the whole list node, since merge patches address lists as units.
pub fn prune_to_scope(patch: Value, original: &Value, scope: &[Path]) -> Value {
    let mut current = Vec::new();
    prune_node(patch, original, scope, &mut current).unwrap_or_else(|| Value::Object(Map::new()))
}

fn prune_node(
    patch: Value,
    original: &Value,
    scope: &[Path],
    current: &mut Vec<String>,
) -> Option<Value> {
    if covered_by_scope(scope, current) {
        return Some(patch);
    }
    let on_scope_line = scope
        .iter()
        .any(|path| path_continues(path, current));
    if !on_scope_line {
        return None;
    }

    match patch {
        Value::Object(map) => {
            let mut kept = Map::new();
            for (key, child) in map {
                current.push(key.clone());
                let child_original = original.get(&key).unwrap_or(&Value::Null);
                if let Some(child) = prune_node(child, child_original, scope, current) {
                    kept.insert(key, child);
                }
                current.pop();
            }
            if kept.is_empty() {
                None
            } else {
                Some(Value::Object(kept))
            }
        }
        // lists are merge-patch units; scope naming an element keeps the list
        list @ Value::Array(_) => Some(list),
        // the patch deletes or retypes this node wholesale, but the scope
        // only addresses part of it: keep deletion markers at the scoped
        // leaves and leave the out-of-scope siblings alone
        _ => narrowed_markers(Some(original), scope, current),
    }
}

/// deletion markers at the scoped leaves below `current`, limited to what
/// the original actually holds there
fn narrowed_markers(
    original: Option<&Value>,
    scope: &[Path],
    current: &mut Vec<String>,
) -> Option<Value> {
    let original = original?;
    if covered_by_scope(scope, current) {
        return Some(Value::Null);
    }
    let mut fields: Vec<&str> = Vec::new();
    for path in scope {
        if !path_continues(path, current) {
            continue;
        }
        match &path.steps()[current.len()] {
            PathStep::Field(name) => {
                if !fields.contains(&name.as_str()) {
                    fields.push(name);
                }
            }
            // scope descends into a list interior: the list is the unit
            _ => return Some(Value::Null),
        }
    }
    let mut kept = Map::new();
    for name in fields {
        current.push(name.to_owned());
        let marker = narrowed_markers(original.get(name), scope, current);
        current.pop();
        if let Some(marker) = marker {
            kept.insert(name.to_owned(), marker);
        }
    }
    if kept.is_empty() {
        None
    } else {
        Some(Value::Object(kept))
    }
}

/// the node at `current` sits at or below one of the scoped paths
fn covered_by_scope(scope: &[Path], current: &[String]) -> bool {
    scope.iter().any(|path| {
        path.steps().len() <= current.len()
            && path
                .steps()
                .iter()
                .zip(current.iter())
                .all(|(step, token)| step_matches(step, token))
    })
}

/// some scoped path passes through the node at `current`
fn path_continues(path: &Path, current: &[String]) -> bool {
    path.steps().len() > current.len()
        && path
            .steps()
            .iter()
            .zip(current.iter())
            .all(|(step, token)| step_matches(step, token))
}

fn step_matches(step: &PathStep, token: &str) -> bool {
    match step {
        PathStep::Field(name) | PathStep::Key(name) => name == token,
        PathStep::Index(index) => index.to_string() == token,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::path::PathBuilder;
    use serde_json::json;

    fn any_path(tokens: &[&str]) -> Path {
        let shape = Shape::Any;
        let mut builder = PathBuilder::from_shape(&shape);
        for token in tokens {
            builder = builder.field(token).expect("any shape accepts all steps");
        }
        builder.build()
    }

    #[test]
    fn test_flat_field_diff() {
        // original {a:1,b:2}, desired {a:1,b:3,c:4} => {b:3,c:4}
        let patch = diff(
            &Shape::Any,
            &json!({"a": 1, "b": 2}),
            &json!({"a": 1, "b": 3, "c": 4}),
        );
        assert_eq!(patch, json!({"b": 3, "c": 4}));
    }

    #[test]
    fn test_identical_snapshots_give_empty_patch() {
        let doc = json!({"a": 1, "nested": {"x": [1, 2]}});
        assert_eq!(diff(&Shape::Any, &doc, &doc), json!({}));
    }

    #[test]
    fn test_removed_field_emits_deletion_marker() {
        let patch = diff(&Shape::Any, &json!({"a": 1, "b": 2}), &json!({"a": 1}));
        assert_eq!(patch, json!({"b": null}));
    }

    #[test]
    fn test_nested_objects_merge_recursively() {
        let patch = diff(
            &Shape::Any,
            &json!({"spec": {"replicas": 2, "paused": false}}),
            &json!({"spec": {"replicas": 3, "paused": false}}),
        );
        assert_eq!(patch, json!({"spec": {"replicas": 3}}));
    }

    #[test]
    fn test_unkeyed_list_replaced_wholesale() {
        let patch = diff(
            &Shape::Any,
            &json!({"tags": ["a", "b"]}),
            &json!({"tags": ["a", "c", "d"]}),
        );
        assert_eq!(patch, json!({"tags": ["a", "c", "d"]}));
    }

    #[test]
    fn test_keyed_list_merges_by_key() {
        let shape = Shape::record([(
            "containers",
            Shape::keyed_list(
                "name",
                Shape::record([
                    ("name", Shape::Scalar),
                    ("image", Shape::Scalar),
                    ("tag", Shape::Scalar),
                ]),
            ),
        )]);
        let original = json!({"containers": [
            {"name": "web", "image": "nginx:1.25", "tag": "stable"},
            {"name": "sidecar", "image": "envoy:1.30"}
        ]});
        let desired = json!({"containers": [
            {"name": "web", "image": "nginx:1.27", "tag": "stable"},
            {"name": "sidecar", "image": "envoy:1.30"},
            {"name": "init", "image": "busybox"}
        ]});

        let patch = diff(&shape, &original, &desired);
        // changed element carries its merge key plus changed fields only;
        // unchanged sidecar is omitted; new element is sent whole
        assert_eq!(
            patch,
            json!({"containers": [
                {"name": "web", "image": "nginx:1.27"},
                {"name": "init", "image": "busybox"}
            ]})
        );
    }

    #[test]
    fn test_keyed_list_omitted_element_left_alone() {
        let shape = Shape::record([(
            "containers",
            Shape::keyed_list("name", Shape::Any),
        )]);
        let original = json!({"containers": [
            {"name": "web", "image": "nginx"},
            {"name": "sidecar", "image": "envoy"}
        ]});
        let desired = json!({"containers": [
            {"name": "web", "image": "nginx"}
        ]});

        // nothing changed in the surviving element, nothing to send
        assert_eq!(diff(&shape, &original, &desired), json!({}));
    }

    #[test]
    fn test_prune_to_scope_keeps_only_scoped_subtrees() {
        // original {a:1,b:2}, desired {a:1,b:3,c:4}, scope=[b] => {b:3}
        let original = json!({"a": 1, "b": 2});
        let desired = json!({"a": 1, "b": 3, "c": 4});
        let patch = diff(&Shape::Any, &original, &desired);
        let scoped = prune_to_scope(patch, &original, &[any_path(&["b"])]);
        assert_eq!(scoped, json!({"b": 3}));
    }

    #[test]
    fn test_prune_keeps_ancestor_chains_for_deep_scope() {
        let original = json!({"metadata": {"labels": {"app": "a", "tier": "t"}}, "data": {"k": "v"}});
        let desired = json!({"metadata": {"labels": {"app": "b", "tier": "x"}}, "data": {"k": "w"}});
        let patch = diff(&Shape::Any, &original, &desired);
        let scope = [any_path(&["metadata", "labels", "app"])];
        let scoped = prune_to_scope(patch, &original, &scope);
        assert_eq!(scoped, json!({"metadata": {"labels": {"app": "b"}}}));
    }

    #[test]
    fn test_prune_narrows_ancestor_deletion_to_scoped_leaf() {
        // the desired snapshot drops all of `m`, but only m.a is in scope;
        // m.b must survive the scoped patch
        let original = json!({"m": {"a": 1, "b": 2}});
        let desired = json!({});
        let patch = diff(&Shape::Any, &original, &desired);
        assert_eq!(patch, json!({"m": null}));
        let scoped = prune_to_scope(patch, &original, &[any_path(&["m", "a"])]);
        assert_eq!(scoped, json!({"m": {"a": null}}));
    }

    #[test]
    fn test_prune_narrows_ancestor_type_change_to_scoped_leaf() {
        let original = json!({"m": {"a": 1, "b": 2}});
        let desired = json!({"m": 5});
        let patch = diff(&Shape::Any, &original, &desired);
        let scoped = prune_to_scope(patch, &original, &[any_path(&["m", "a"])]);
        assert_eq!(scoped, json!({"m": {"a": null}}));
    }

    #[test]
    fn test_prune_skips_scoped_leaf_missing_from_original() {
        let original = json!({"m": {"b": 2}});
        let patch = diff(&Shape::Any, &original, &json!({}));
        let scoped = prune_to_scope(patch, &original, &[any_path(&["m", "a"])]);
        assert_eq!(scoped, json!({}));
    }

    #[test]
    fn test_prune_with_empty_match_gives_empty_patch() {
        let original = json!({"a": 1});
        let desired = json!({"a": 2});
        let patch = diff(&Shape::Any, &original, &desired);
        let scoped = prune_to_scope(patch, &original, &[any_path(&["unrelated"])]);
        assert_eq!(scoped, json!({}));
    }
}
