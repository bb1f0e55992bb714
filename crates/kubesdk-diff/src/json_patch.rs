//!
//! # JSON patch computation
//!
//! RFC 6902 operation sequences transforming one snapshot into another.
//! List diffs trim the common prefix and suffix, recurse over the overlap
//! and then remove or insert the remainder, so the emitted sequence always
//! replays cleanly against the original document.
//!
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::{escape_pointer_token, lookup, unescape_pointer_token, Path, PathError};
use crate::DiffError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Test { path: String, value: Value },
}

impl PatchOp {
    pub fn path(&self) -> &str {
        match self {
            PatchOp::Add { path, .. }
            | PatchOp::Remove { path }
            | PatchOp::Replace { path, .. }
            | PatchOp::Test { path, .. } => path,
        }
    }
}

/// ordered operations transforming `original` into `desired`
pub fn diff(original: &Value, desired: &Value) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    node_diff(original, desired, "", &mut ops);
    ops
}

/// Scoped variant: one `test` op per scoped path asserting the value
/// observed in `original`, followed by the operations whose target lies at
/// or below a scoped path. An operation that removes or replaces an ancestor
/// of a scoped path is narrowed to the scoped leaf itself, so siblings
/// outside the scope stay untouched. Everything else is dropped.
pub fn diff_scoped(
    original: &Value,
    desired: &Value,
    scope: &[Path],
) -> Result<Vec<PatchOp>, DiffError> {
    let mut ops = Vec::new();
    for path in scope {
        let observed = lookup(original, path)
            .ok_or_else(|| PathError::MissingKey(path.to_string()))?;
        ops.push(PatchOp::Test {
            path: path.pointer(),
            value: observed.clone(),
        });
    }

    let pointers: Vec<String> = scope.iter().map(|p| p.pointer()).collect();
    for op in diff(original, desired) {
        if pointers.iter().any(|scoped| within(scoped, op.path())) {
            ops.push(op);
            continue;
        }
        for scoped in &pointers {
            if let Some(narrowed) = narrow_to_leaf(&op, scoped) {
                ops.push(narrowed);
            }
        }
    }
    Ok(ops)
}

/// op path at or below the scoped pointer
fn within(scoped: &str, op_path: &str) -> bool {
    let scoped = tokens(scoped);
    let op = tokens(op_path);
    op.len() >= scoped.len() && scoped[..] == op[..scoped.len()]
}

/// Rewrites an operation targeting a strict ancestor of `scoped` to the
/// scoped leaf. A removed ancestor removes the leaf; a replaced ancestor
/// keeps the leaf's new value when the replacement still carries one and
/// removes the leaf otherwise.
fn narrow_to_leaf(op: &PatchOp, scoped: &str) -> Option<PatchOp> {
    let op_tokens = tokens(op.path());
    let scoped_tokens = tokens(scoped);
    if op_tokens.len() >= scoped_tokens.len() || op_tokens[..] != scoped_tokens[..op_tokens.len()] {
        return None;
    }
    match op {
        PatchOp::Remove { .. } => Some(PatchOp::Remove {
            path: scoped.to_owned(),
        }),
        PatchOp::Replace { value, .. } => {
            match descend(value, &scoped_tokens[op_tokens.len()..]) {
                Some(leaf) => Some(PatchOp::Replace {
                    path: scoped.to_owned(),
                    value: leaf.clone(),
                }),
                None => Some(PatchOp::Remove {
                    path: scoped.to_owned(),
                }),
            }
        }
        _ => None,
    }
}

fn descend<'v>(value: &'v Value, remainder: &[String]) -> Option<&'v Value> {
    let mut current = value;
    for token in remainder {
        current = match current {
            Value::Object(map) => map.get(token)?,
            Value::Array(items) => items.get(token.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn tokens(pointer: &str) -> Vec<String> {
    if pointer.is_empty() {
        return Vec::new();
    }
    pointer
        .split('/')
        .skip(1)
        .map(unescape_pointer_token)
        .collect()
}

fn join(base: &str, token: &str) -> String {
    format!("{base}/{}", escape_pointer_token(token))
}

fn node_diff(original: &Value, desired: &Value, path: &str, ops: &mut Vec<PatchOp>) {
    if original == desired {
        return;
    }
    match (original, desired) {
        (Value::Object(old), Value::Object(new)) => {
            for key in old.keys() {
                if !new.contains_key(key) {
                    ops.push(PatchOp::Remove {
                        path: join(path, key),
                    });
                }
            }
            for (key, new_val) in new {
                match old.get(key) {
                    Some(old_val) => node_diff(old_val, new_val, &join(path, key), ops),
                    None => ops.push(PatchOp::Add {
                        path: join(path, key),
                        value: new_val.clone(),
                    }),
                }
            }
        }
        (Value::Array(old), Value::Array(new)) => list_diff(old, new, path, ops),
        _ => ops.push(PatchOp::Replace {
            path: path.to_owned(),
            value: desired.clone(),
        }),
    }
}

fn list_diff(old: &[Value], new: &[Value], path: &str, ops: &mut Vec<PatchOp>) {
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = old.len().min(new.len()) - prefix;
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count()
        .min(max_suffix);

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];
    let overlap = old_mid.len().min(new_mid.len());

    for offset in 0..overlap {
        node_diff(
            &old_mid[offset],
            &new_mid[offset],
            &join(path, &(prefix + offset).to_string()),
            ops,
        );
    }
    // back-to-front so indices stay valid while removing
    for index in (overlap..old_mid.len()).rev() {
        ops.push(PatchOp::Remove {
            path: join(path, &(prefix + index).to_string()),
        });
    }
    for index in overlap..new_mid.len() {
        ops.push(PatchOp::Add {
            path: join(path, &(prefix + index).to_string()),
            value: new_mid[index].clone(),
        });
    }
}

/// Applies an operation sequence to a document. Used by tests to prove a
/// computed patch replays, and by callers that keep local caches in sync.
pub fn apply_patch(doc: &Value, ops: &[PatchOp]) -> Result<Value, DiffError> {
    let mut doc = doc.clone();
    for op in ops {
        match op {
            PatchOp::Add { path, value } => apply_add(&mut doc, path, value.clone())?,
            PatchOp::Remove { path } => apply_remove(&mut doc, path)?,
            PatchOp::Replace { path, value } => apply_replace(&mut doc, path, value.clone())?,
            PatchOp::Test { path, value } => {
                let target = resolve(&doc, path)?;
                if target != Some(value) {
                    return Err(DiffError::TestFailed { path: path.clone() });
                }
            }
        }
    }
    Ok(doc)
}

fn split_parent(pointer: &str) -> Result<(Vec<String>, String), PathError> {
    let mut parts = tokens(pointer);
    let last = parts
        .pop()
        .ok_or_else(|| PathError::BadPointer(pointer.to_owned()))?;
    Ok((parts, last))
}

fn navigate<'d>(doc: &'d mut Value, parts: &[String]) -> Result<&'d mut Value, PathError> {
    let mut current = doc;
    for part in parts {
        current = match current {
            Value::Object(map) => map
                .get_mut(part)
                .ok_or_else(|| PathError::MissingKey(part.clone()))?,
            Value::Array(items) => {
                let index: usize = part
                    .parse()
                    .map_err(|_| PathError::BadPointer(part.clone()))?;
                let len = items.len();
                items
                    .get_mut(index)
                    .ok_or(PathError::IndexOutOfBounds(len))?
            }
            _ => return Err(PathError::NotTraversable(part.clone())),
        };
    }
    Ok(current)
}

fn resolve<'d>(doc: &'d Value, pointer: &str) -> Result<Option<&'d Value>, PathError> {
    let mut current = doc;
    for part in tokens(pointer) {
        current = match current {
            Value::Object(map) => match map.get(&part) {
                Some(v) => v,
                None => return Ok(None),
            },
            Value::Array(items) => {
                let index: usize = part
                    .parse()
                    .map_err(|_| PathError::BadPointer(part.clone()))?;
                match items.get(index) {
                    Some(v) => v,
                    None => return Ok(None),
                }
            }
            _ => return Ok(None),
        };
    }
    Ok(Some(current))
}

fn apply_add(doc: &mut Value, pointer: &str, value: Value) -> Result<(), DiffError> {
    if pointer.is_empty() {
        *doc = value;
        return Ok(());
    }
    let (parts, last) = split_parent(pointer)?;
    let parent = navigate(doc, &parts)?;
    match parent {
        Value::Object(map) => {
            map.insert(last, value);
        }
        Value::Array(items) => {
            if last == "-" {
                items.push(value);
            } else {
                let index: usize = last.parse().map_err(|_| PathError::BadPointer(last))?;
                if index > items.len() {
                    return Err(PathError::IndexOutOfBounds(index).into());
                }
                items.insert(index, value);
            }
        }
        _ => return Err(PathError::NotTraversable(last).into()),
    }
    Ok(())
}

fn apply_remove(doc: &mut Value, pointer: &str) -> Result<(), DiffError> {
    if pointer.is_empty() {
        return Err(PathError::BadPointer("cannot remove the root".to_owned()).into());
    }
    let (parts, last) = split_parent(pointer)?;
    let parent = navigate(doc, &parts)?;
    match parent {
        // removing an absent mapping key is a no-op
        Value::Object(map) => {
            map.remove(&last);
        }
        Value::Array(items) => {
            let index: usize = last.parse().map_err(|_| PathError::BadPointer(last))?;
            if index >= items.len() {
                return Err(PathError::IndexOutOfBounds(index).into());
            }
            items.remove(index);
        }
        _ => return Err(PathError::NotTraversable(last).into()),
    }
    Ok(())
}

fn apply_replace(doc: &mut Value, pointer: &str, value: Value) -> Result<(), DiffError> {
    if pointer.is_empty() {
        *doc = value;
        return Ok(());
    }
    let (parts, last) = split_parent(pointer)?;
    let parent = navigate(doc, &parts)?;
    match parent {
        Value::Object(map) => match map.get_mut(&last) {
            Some(slot) => *slot = value,
            None => return Err(PathError::MissingKey(last).into()),
        },
        Value::Array(items) => {
            let index: usize = last.parse().map_err(|_| PathError::BadPointer(last))?;
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or(PathError::IndexOutOfBounds(len))?;
            *slot = value;
        }
        _ => return Err(PathError::NotTraversable(last).into()),
    }
    Ok(())
}
