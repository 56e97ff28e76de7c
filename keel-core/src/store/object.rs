//! Stored objects and property values.

use std::collections::BTreeMap;
use std::fmt;

/// Stable identity of an object for its whole life.
///
/// Keys are allocated monotonically and never reused, so the graph can hold
/// them as non-owning back-references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey(pub u64);

impl ObjectKey {
    /// Raw key value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Unset.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Float or double scalar.
    Float(f64),
    /// String scalar.
    String(String),
    /// Float or double list; the payload of a vector index.
    FloatList(Vec<f32>),
    /// Any other list.
    List(Vec<Value>),
}

impl Value {
    /// The vector payload, if this value is a non-empty float list.
    ///
    /// Empty lists count as unpopulated and are never indexed.
    #[must_use]
    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            Self::FloatList(v) if !v.is_empty() => Some(v),
            _ => None,
        }
    }

    /// Whether this is [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Self::FloatList(v)
    }
}

impl From<&[f32]> for Value {
    fn from(v: &[f32]) -> Self {
        Self::FloatList(v.to_vec())
    }
}

/// Property values of one object, keyed by property name.
pub type Properties = BTreeMap<String, Value>;

static NULL: Value = Value::Null;

/// One stored object.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub(crate) key: ObjectKey,
    pub(crate) entity: String,
    pub(crate) properties: Properties,
}

impl Object {
    /// The object's key.
    #[must_use]
    pub const fn key(&self) -> ObjectKey {
        self.key
    }

    /// The object's entity type.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// A property value; unset properties read as [`Value::Null`].
    #[must_use]
    pub fn get(&self, property: &str) -> &Value {
        self.properties.get(property).unwrap_or(&NULL)
    }

    /// All set properties.
    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }
}
