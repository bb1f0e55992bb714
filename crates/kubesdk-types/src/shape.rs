//!
//! # Declared shapes
//!
//! A [`Shape`] describes the declared structure of a resource's field tree
//! without holding any data. Path validation and the diff engine walk it to
//! decide which navigation steps are legal and how list fields merge.
//!
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// fixed set of named fields
    Record(BTreeMap<&'static str, Shape>),
    /// free-form string keyed mapping
    Map(Box<Shape>),
    /// sequence; a merge key turns wholesale replacement into merge-by-key
    List {
        item: Box<Shape>,
        merge_key: Option<&'static str>,
    },
    Scalar,
    /// schema opted out, anything goes
    Any,
}

impl Shape {
    pub fn record<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, Shape)>,
    {
        Shape::Record(fields.into_iter().collect())
    }

    pub fn map(value: Shape) -> Self {
        Shape::Map(Box::new(value))
    }

    pub fn list(item: Shape) -> Self {
        Shape::List {
            item: Box::new(item),
            merge_key: None,
        }
    }

    pub fn keyed_list(merge_key: &'static str, item: Shape) -> Self {
        Shape::List {
            item: Box::new(item),
            merge_key: Some(merge_key),
        }
    }

    /// shape of a named field, if this shape can be navigated by field name
    pub fn field(&self, name: &str) -> Option<&Shape> {
        match self {
            Shape::Record(fields) => fields.get(name),
            Shape::Any => Some(self),
            _ => None,
        }
    }

    /// shape of a mapping value, if this shape can be navigated by key
    pub fn value(&self) -> Option<&Shape> {
        match self {
            Shape::Map(value) => Some(value),
            Shape::Any => Some(self),
            _ => None,
        }
    }

    /// shape of a sequence element, if this shape can be navigated by index
    pub fn item(&self) -> Option<&Shape> {
        match self {
            Shape::List { item, .. } => Some(item),
            Shape::Any => Some(self),
            _ => None,
        }
    }

    /// merge key declared for this list field, if any
    pub fn merge_key(&self) -> Option<&'static str> {
        match self {
            Shape::List { merge_key, .. } => *merge_key,
            _ => None,
        }
    }
}

/// declared shape of standard object metadata
pub fn object_meta_shape() -> Shape {
    Shape::record([
        ("name", Shape::Scalar),
        ("namespace", Shape::Scalar),
        ("uid", Shape::Scalar),
        ("resourceVersion", Shape::Scalar),
        ("creationTimestamp", Shape::Scalar),
        ("labels", Shape::map(Shape::Scalar)),
        ("annotations", Shape::map(Shape::Scalar)),
    ])
}
