mod crd;
mod metadata;
mod options;
mod shape;

pub use crd::{item_path, items_path, Crd, CrdNames, PatchDialect, Resource};
pub use metadata::{K8List, K8Meta, K8Status, ListMeta, ObjectMeta};
pub use options::{
    DeleteOptions, FieldOperator, FieldSelector, FieldSelectorRequirement, LabelOperator,
    LabelSelector, LabelSelectorRequirement, ListOptions, PropagationPolicy,
};
pub use shape::{object_meta_shape, Shape};
