//! Entity and property declarations.

use std::collections::BTreeMap;
use std::fmt;

use super::object::Value;

/// Scalar kind of a property (the element kind for collections).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// Single precision float.
    Float,
    /// Double precision float.
    Double,
    /// UTF-8 string.
    String,
}

impl PropertyKind {
    pub(crate) const fn tag(self) -> u8 {
        match self {
            Self::Bool => 0,
            Self::Int => 1,
            Self::Float => 2,
            Self::Double => 3,
            Self::String => 4,
        }
    }

    pub(crate) const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Bool),
            1 => Some(Self::Int),
            2 => Some(Self::Float),
            3 => Some(Self::Double),
            4 => Some(Self::String),
            _ => None,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
        }
    }

    const fn is_floating(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }
}

/// Declared type of one property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertySchema {
    /// Scalar kind, or element kind when `is_collection` is set.
    pub kind: PropertyKind,
    /// Whether the property holds a variable-length list.
    pub is_collection: bool,
}

impl PropertySchema {
    /// A single value of `kind`.
    #[must_use]
    pub const fn scalar(kind: PropertyKind) -> Self {
        Self { kind, is_collection: false }
    }

    /// A variable-length list of `kind`.
    #[must_use]
    pub const fn list(kind: PropertyKind) -> Self {
        Self { kind, is_collection: true }
    }

    /// Element kind of a collection property.
    #[must_use]
    pub const fn element_kind(&self) -> Option<PropertyKind> {
        if self.is_collection { Some(self.kind) } else { None }
    }

    /// Whether a vector index can be built on this property.
    #[must_use]
    pub const fn is_float_vector(&self) -> bool {
        self.is_collection && self.kind.is_floating()
    }

    /// Whether `value` may be stored in a property of this type.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::FloatList(_) => self.is_float_vector(),
            Value::List(items) => {
                self.is_collection
                    && items.iter().all(|item| Self::scalar(self.kind).accepts_scalar(item))
            }
            scalar => !self.is_collection && self.accepts_scalar(scalar),
        }
    }

    fn accepts_scalar(&self, value: &Value) -> bool {
        matches!(
            (self.kind, value),
            (PropertyKind::Bool, Value::Bool(_))
                | (PropertyKind::Int, Value::Int(_))
                | (PropertyKind::Float | PropertyKind::Double, Value::Float(_))
                | (PropertyKind::String, Value::String(_))
        )
    }
}

impl fmt::Display for PropertySchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_collection {
            write!(f, "list<{}>", self.kind.name())
        } else {
            f.write_str(self.kind.name())
        }
    }
}

/// Declared properties of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    name: String,
    properties: BTreeMap<String, PropertySchema>,
}

impl EntitySchema {
    /// Start declaring an entity type.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), properties: BTreeMap::new() }
    }

    /// Declare a property (builder style).
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Entity type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a property declaration.
    #[must_use]
    pub fn get(&self, property: &str) -> Option<PropertySchema> {
        self.properties.get(property).copied()
    }

    /// Iterate over declared properties in name order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, PropertySchema)> + '_ {
        self.properties.iter().map(|(name, schema)| (name.as_str(), *schema))
    }
}

/// The set of entity types known to a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    entities: BTreeMap<String, EntitySchema>,
}

impl Schema {
    /// An empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity type (builder style). Redeclaring a name replaces it.
    #[must_use]
    pub fn entity(mut self, entity: EntitySchema) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// Look up an entity type.
    #[must_use]
    pub fn get(&self, entity: &str) -> Option<&EntitySchema> {
        self.entities.get(entity)
    }

    /// Look up a property declaration.
    #[must_use]
    pub fn property(&self, entity: &str, property: &str) -> Option<PropertySchema> {
        self.entities.get(entity)?.get(property)
    }

    /// Iterate over entity types in name order.
    pub fn entities(&self) -> impl Iterator<Item = &EntitySchema> + '_ {
        self.entities.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new().entity(
            EntitySchema::new("Document")
                .property("title", PropertySchema::scalar(PropertyKind::String))
                .property("embedding", PropertySchema::list(PropertyKind::Float))
                .property("tags", PropertySchema::list(PropertyKind::String)),
        )
    }

    #[test]
    fn test_property_lookup() {
        let schema = schema();
        assert!(schema.property("Document", "embedding").unwrap().is_float_vector());
        assert!(!schema.property("Document", "tags").unwrap().is_float_vector());
        assert!(schema.property("Document", "missing").is_none());
        assert!(schema.property("Missing", "title").is_none());
    }

    #[test]
    fn test_accepts() {
        let vector = PropertySchema::list(PropertyKind::Double);
        assert!(vector.accepts(&Value::FloatList(vec![1.0])));
        assert!(vector.accepts(&Value::Null));
        assert!(!vector.accepts(&Value::Float(1.0)));

        let title = PropertySchema::scalar(PropertyKind::String);
        assert!(title.accepts(&Value::from("hello")));
        assert!(!title.accepts(&Value::Int(3)));

        let tags = PropertySchema::list(PropertyKind::String);
        assert!(tags.accepts(&Value::List(vec![Value::from("a"), Value::from("b")])));
        assert!(!tags.accepts(&Value::List(vec![Value::Int(1)])));
        assert!(!tags.accepts(&Value::FloatList(vec![1.0])));
    }

    #[test]
    fn test_display() {
        assert_eq!(PropertySchema::list(PropertyKind::Float).to_string(), "list<float>");
        assert_eq!(PropertySchema::scalar(PropertyKind::Int).to_string(), "int");
    }

    #[test]
    fn test_kind_tags() {
        for kind in [
            PropertyKind::Bool,
            PropertyKind::Int,
            PropertyKind::Float,
            PropertyKind::Double,
            PropertyKind::String,
        ] {
            assert_eq!(PropertyKind::from_tag(kind.tag()), Some(kind));
        }
    }
}
