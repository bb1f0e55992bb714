//!
//! # Diff and patch engine
//!
//! Computes patch request bodies from two snapshots of the same resource.
//! Three dialects are supported: merge patches, RFC 6902 operation lists and
//! full replacement. [`compute_patch`] is the single entry point; it checks
//! the dialect against the resource's declared capabilities and hands off to
//! the dialect module.
//!
mod json_patch;
mod merge;
mod path;

pub use json_patch::{apply_patch, PatchOp};
pub use path::{
    escape_pointer_token, lookup, replace_at, unescape_pointer_token, Path, PathBuilder,
    PathError, PathStep,
};

use serde_json::Value;

use kubesdk_types::{PatchDialect, Shape};

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("dialect {0:?} is not supported by this resource")]
    DialectUnsupported(PatchDialect),
    #[error("replacement requires metadata.resourceVersion on the desired snapshot")]
    MissingPrecondition,
    #[error("test failed at `{path}`")]
    TestFailed { path: String },
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// A computed patch ready to be sent: the dialect picks the content type,
/// the body is the serialized request payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchDescriptor {
    pub dialect: PatchDialect,
    pub body: Value,
}

impl PatchDescriptor {
    pub fn content_type(&self) -> &'static str {
        self.dialect.content_type()
    }

    /// nothing to send; the snapshots are identical within scope
    pub fn is_empty(&self) -> bool {
        match self.dialect {
            PatchDialect::Merge => self
                .body
                .as_object()
                .map(|m| m.is_empty())
                .unwrap_or(false),
            PatchDialect::JsonPatch => self
                .body
                .as_array()
                .map(|ops| {
                    ops.iter()
                        .all(|op| op.get("op").and_then(Value::as_str) == Some("test"))
                })
                .unwrap_or(false),
            PatchDialect::Replace => false,
        }
    }
}

/// Computes the patch body carrying `original` to `desired` in the requested
/// dialect. `scope`, when given, restricts the patch to the listed paths:
/// merge bodies are pruned to the scoped sub-trees, json patches carry a
/// `test` guard per scoped path and only scoped operations.
///
/// A replacement needs no diffing but does need `metadata.resourceVersion`
/// on the desired snapshot, so the server can reject a stale write.
pub fn compute_patch(
    shape: &Shape,
    supported: &[PatchDialect],
    dialect: PatchDialect,
    original: &Value,
    desired: &Value,
    scope: Option<&[Path]>,
) -> Result<PatchDescriptor, DiffError> {
    if !supported.contains(&dialect) {
        return Err(DiffError::DialectUnsupported(dialect));
    }

    let body = match dialect {
        PatchDialect::Merge => {
            let patch = merge::diff(shape, original, desired);
            match scope {
                Some(scope) => merge::prune_to_scope(patch, original, scope),
                None => patch,
            }
        }
        PatchDialect::JsonPatch => {
            let ops = match scope {
                Some(scope) => json_patch::diff_scoped(original, desired, scope)?,
                None => json_patch::diff(original, desired),
            };
            serde_json::to_value(ops)?
        }
        PatchDialect::Replace => {
            let version = desired
                .pointer("/metadata/resourceVersion")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if version.is_empty() {
                return Err(DiffError::MissingPrecondition);
            }
            desired.clone()
        }
    };

    Ok(PatchDescriptor { dialect, body })
}
