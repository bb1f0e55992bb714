//!
//! # Path picker
//!
//! A [`Path`] is an immutable description of one field's location inside a
//! resource's declared shape. Paths are recorded against the shape with
//! [`PathBuilder`], never against live data; every step is validated when it
//! is taken, so a finalized path is known to exist in the schema.
//!
use std::fmt;

use serde_json::Value;

use kubesdk_types::Shape;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("field `{0}` is not declared in the shape")]
    UnknownField(String),
    #[error("step `{0}` cannot traverse this shape")]
    NotTraversable(String),
    #[error("index {0} is past the end of the sequence")]
    IndexOutOfBounds(usize),
    #[error("key `{0}` is missing from the value")]
    MissingKey(String),
    #[error("invalid json pointer `{0}`")]
    BadPointer(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathStep {
    Field(String),
    Key(String),
    Index(usize),
}

impl PathStep {
    /// token used for json pointer rendering and patch-node matching
    pub fn token(&self) -> String {
        match self {
            PathStep::Field(name) => name.clone(),
            PathStep::Key(key) => key.clone(),
            PathStep::Index(index) => index.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path {
    steps: Vec<PathStep>,
}

impl Path {
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// RFC 6901 pointer, with `/` and `~` escaped in tokens
    pub fn pointer(&self) -> String {
        let mut out = String::new();
        for step in &self.steps {
            out.push('/');
            out.push_str(&escape_pointer_token(&step.token()));
        }
        out
    }

    /// true when every step of `self` matches the head of `other`
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        other.steps.starts_with(&self.steps)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pos, step) in self.steps.iter().enumerate() {
            match step {
                PathStep::Field(name) => {
                    if pos > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{name}")?;
                }
                PathStep::Key(key) => write!(f, "[\"{key}\"]")?,
                PathStep::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

pub fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

pub fn unescape_pointer_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Navigable stand-in for a resource type. Each step validates against the
/// declared shape and returns a new accumulator; `build` finalizes the trace.
#[derive(Debug, Clone)]
pub struct PathBuilder<'a> {
    current: &'a Shape,
    steps: Vec<PathStep>,
}

impl<'a> PathBuilder<'a> {
    pub fn from_shape(shape: &'a Shape) -> Self {
        Self {
            current: shape,
            steps: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str) -> Result<Self, PathError> {
        let next = match self.current {
            Shape::Record(_) | Shape::Any => self
                .current
                .field(name)
                .ok_or_else(|| PathError::UnknownField(name.to_owned()))?,
            _ => return Err(PathError::NotTraversable(name.to_owned())),
        };
        self.steps.push(PathStep::Field(name.to_owned()));
        Ok(Self {
            current: next,
            steps: self.steps,
        })
    }

    pub fn key(mut self, key: &str) -> Result<Self, PathError> {
        let next = self
            .current
            .value()
            .ok_or_else(|| PathError::NotTraversable(key.to_owned()))?;
        self.steps.push(PathStep::Key(key.to_owned()));
        Ok(Self {
            current: next,
            steps: self.steps,
        })
    }

    pub fn index(mut self, index: usize) -> Result<Self, PathError> {
        let next = self
            .current
            .item()
            .ok_or_else(|| PathError::NotTraversable(index.to_string()))?;
        self.steps.push(PathStep::Index(index));
        Ok(Self {
            current: next,
            steps: self.steps,
        })
    }

    pub fn build(self) -> Path {
        Path { steps: self.steps }
    }
}

/// value at `path` inside `value`, if present
pub fn lookup<'v>(value: &'v Value, path: &Path) -> Option<&'v Value> {
    let mut current = value;
    for step in path.steps() {
        current = match step {
            PathStep::Field(name) => current.as_object()?.get(name)?,
            PathStep::Key(key) => current.as_object()?.get(key)?,
            PathStep::Index(index) => current.as_array()?.get(*index)?,
        };
    }
    Some(current)
}

/// Returns a value identical to `value` except the node at `path` is replaced
/// by `leaf`. Every ancestor along the path is reconstructed from the leaf
/// outward; sibling substructure is carried over untouched.
///
/// The final step may name a mapping entry that does not exist yet, which
/// inserts it. Intermediate steps must resolve against the concrete value.
pub fn replace_at(value: &Value, path: &Path, leaf: Value) -> Result<Value, PathError> {
    rebuild(value, path.steps(), leaf)
}

fn rebuild(value: &Value, steps: &[PathStep], leaf: Value) -> Result<Value, PathError> {
    let Some((head, rest)) = steps.split_first() else {
        return Ok(leaf);
    };

    match head {
        PathStep::Field(name) | PathStep::Key(name) => {
            let map = value
                .as_object()
                .ok_or_else(|| PathError::NotTraversable(name.clone()))?;
            let child = match map.get(name) {
                Some(child) => rebuild(child, rest, leaf)?,
                None if rest.is_empty() => leaf,
                None => return Err(PathError::MissingKey(name.clone())),
            };
            let mut next = map.clone();
            next.insert(name.clone(), child);
            Ok(Value::Object(next))
        }
        PathStep::Index(index) => {
            let items = value
                .as_array()
                .ok_or_else(|| PathError::NotTraversable(index.to_string()))?;
            let child = items
                .get(*index)
                .ok_or(PathError::IndexOutOfBounds(*index))?;
            let child = rebuild(child, rest, leaf)?;
            let mut next = items.clone();
            next[*index] = child;
            Ok(Value::Array(next))
        }
    }
}
