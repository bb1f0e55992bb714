//!
//! # Resource type definitions
//!
//! Static description of an API resource: group/version naming, declared
//! shape and the patch dialects the API server accepts for it.
//!
use crate::shape::Shape;

#[derive(Debug, PartialEq, Eq)]
pub struct Crd {
    pub group: &'static str,
    pub version: &'static str,
    pub names: CrdNames,
}

#[derive(Debug, PartialEq, Eq)]
pub struct CrdNames {
    pub kind: &'static str,
    pub plural: &'static str,
    pub singular: &'static str,
}

impl Crd {
    /// core group resources live under `/api`, everything else under `/apis`
    pub fn api_prefix(&self) -> String {
        if self.group.is_empty() {
            format!("/api/{}", self.version)
        } else {
            format!("/apis/{}/{}", self.group, self.version)
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_owned()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// wire dialect used for update bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchDialect {
    Merge,
    JsonPatch,
    Replace,
}

impl PatchDialect {
    /// content type selecting the dialect on the wire; replace is a full-body PUT
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Merge => "application/merge-patch+json",
            Self::JsonPatch => "application/json-patch+json",
            Self::Replace => "application/json",
        }
    }
}

/// Typed resource known to the generated schema layer.
///
/// Implementations come from the schema compiler, which lives outside this
/// workspace; tests declare small resources by hand.
pub trait Resource {
    fn crd() -> &'static Crd;

    /// declared field tree used by path validation and diffing
    fn shape() -> Shape;

    /// patch dialects the API server supports for this type
    fn dialects() -> &'static [PatchDialect] {
        &[
            PatchDialect::Merge,
            PatchDialect::JsonPatch,
            PatchDialect::Replace,
        ]
    }

    fn kind() -> &'static str {
        Self::crd().names.kind
    }

    fn plural() -> &'static str {
        Self::crd().names.plural
    }
}

/// collection path, without query: `{prefix}/namespaces/{ns}/{plural}`
pub fn items_path<S: Resource>(namespace: &str) -> String {
    let crd = S::crd();
    if namespace.is_empty() {
        format!("{}/{}", crd.api_prefix(), crd.names.plural)
    } else {
        format!(
            "{}/namespaces/{}/{}",
            crd.api_prefix(),
            namespace,
            crd.names.plural
        )
    }
}

/// singular resource path, with an optional sub-resource suffix such as `/status`
pub fn item_path<S: Resource>(namespace: &str, name: &str, sub_resource: Option<&str>) -> String {
    format!(
        "{}/{}{}",
        items_path::<S>(namespace),
        name,
        sub_resource.unwrap_or("")
    )
}
