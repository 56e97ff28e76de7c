//! The object store the vector index lives in.
//!
//! [`ObjectStore`] is the interface the index consumes: schema lookups,
//! keyed reads, iteration, mutation and the write-scope flag.
//! [`MemoryStore`] is the embedded implementation used by
//! [`Database`](crate::Database). It journals first-touch before-images
//! while a write scope is open so that a rollback restores every object
//! exactly.

mod object;
mod schema;

pub use object::{Object, ObjectKey, Properties, Value};
pub use schema::{EntitySchema, PropertyKind, PropertySchema, Schema};

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Object store operations the vector index depends on.
pub trait ObjectStore {
    /// Whether a write scope is currently open.
    fn in_write_scope(&self) -> bool;

    /// Whether the entity type is declared.
    fn has_entity(&self, entity: &str) -> bool;

    /// Declared type of a property, `None` if the entity or property is unknown.
    fn property_schema(&self, entity: &str, property: &str) -> Option<PropertySchema>;

    /// Look up an object by key.
    fn object(&self, key: ObjectKey) -> Option<&Object>;

    /// Visit every object of `entity` in ascending key order.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first error produced by `visit`.
    fn for_each_object(
        &self,
        entity: &str,
        visit: &mut dyn FnMut(&Object) -> Result<()>,
    ) -> Result<()>;

    /// Insert a new object and return its key.
    ///
    /// # Errors
    ///
    /// Fails outside a write scope, for unknown entities or properties, and
    /// for values that do not match the schema.
    fn add_object(&mut self, entity: &str, properties: Properties) -> Result<ObjectKey>;

    /// Replace one property value, returning the previous value.
    ///
    /// # Errors
    ///
    /// Fails outside a write scope, for unknown objects or properties, and
    /// for values that do not match the schema.
    fn update_property(&mut self, key: ObjectKey, property: &str, value: Value) -> Result<Value>;

    /// Remove an object, returning it.
    ///
    /// # Errors
    ///
    /// Fails outside a write scope or if the object does not exist.
    fn delete_object(&mut self, key: ObjectKey) -> Result<Object>;
}

/// Before-images recorded while a write scope is open.
#[derive(Debug)]
struct StoreJournal {
    before: BTreeMap<ObjectKey, Option<Object>>,
    next_key: u64,
}

/// In-memory object store with journaled write scopes.
#[derive(Debug)]
pub struct MemoryStore {
    schema: Schema,
    objects: BTreeMap<ObjectKey, Object>,
    next_key: u64,
    journal: Option<StoreJournal>,
}

impl MemoryStore {
    /// An empty store for `schema`.
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self { schema, objects: BTreeMap::new(), next_key: 1, journal: None }
    }

    /// Rebuild a store from persisted parts.
    pub(crate) fn from_parts(schema: Schema, next_key: u64, objects: Vec<Object>) -> Self {
        let objects = objects.into_iter().map(|o| (o.key, o)).collect();
        Self { schema, objects, next_key, journal: None }
    }

    /// The store's schema.
    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Next key to be allocated.
    pub(crate) const fn next_key(&self) -> u64 {
        self.next_key
    }

    /// Total number of objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of objects of one entity type.
    #[must_use]
    pub fn count(&self, entity: &str) -> usize {
        self.objects.values().filter(|o| o.entity == entity).count()
    }

    /// Iterate over all objects in key order.
    pub fn objects(&self) -> impl Iterator<Item = &Object> + '_ {
        self.objects.values()
    }

    /// Open a write scope. Nested scopes are not supported.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if a scope is already open.
    pub fn begin_write(&mut self) -> Result<()> {
        if self.journal.is_some() {
            return Err(Error::invalid("a write scope is already open"));
        }
        self.journal = Some(StoreJournal { before: BTreeMap::new(), next_key: self.next_key });
        Ok(())
    }

    /// Close the write scope, keeping all changes.
    pub fn commit(&mut self) {
        self.journal = None;
    }

    /// Close the write scope, restoring every touched object.
    pub fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        for (key, before) in journal.before {
            match before {
                Some(object) => {
                    self.objects.insert(key, object);
                }
                None => {
                    self.objects.remove(&key);
                }
            }
        }
        self.next_key = journal.next_key;
    }

    /// Check that `properties` are valid for a new `entity` object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntityNotFound`], [`Error::PropertyNotFound`] or
    /// [`Error::TypeMismatch`].
    pub fn check_properties(&self, entity: &str, properties: &Properties) -> Result<()> {
        let schema = self.schema.get(entity).ok_or_else(|| Error::EntityNotFound(entity.to_owned()))?;
        for (name, value) in properties {
            check_value(entity, name, schema.get(name), value)?;
        }
        Ok(())
    }

    fn require_scope(&self) -> Result<()> {
        if self.journal.is_none() {
            return Err(Error::NotInWriteScope);
        }
        Ok(())
    }

    fn record(&mut self, key: ObjectKey) {
        if let Some(journal) = self.journal.as_mut() {
            journal.before.entry(key).or_insert_with(|| self.objects.get(&key).cloned());
        }
    }
}

fn check_value(
    entity: &str,
    property: &str,
    schema: Option<PropertySchema>,
    value: &Value,
) -> Result<()> {
    let schema = schema.ok_or_else(|| Error::PropertyNotFound {
        entity: entity.to_owned(),
        property: property.to_owned(),
    })?;
    if !schema.accepts(value) {
        return Err(Error::TypeMismatch {
            entity: entity.to_owned(),
            property: property.to_owned(),
            expected: schema.to_string(),
        });
    }
    Ok(())
}

impl ObjectStore for MemoryStore {
    fn in_write_scope(&self) -> bool {
        self.journal.is_some()
    }

    fn has_entity(&self, entity: &str) -> bool {
        self.schema.get(entity).is_some()
    }

    fn property_schema(&self, entity: &str, property: &str) -> Option<PropertySchema> {
        self.schema.property(entity, property)
    }

    fn object(&self, key: ObjectKey) -> Option<&Object> {
        self.objects.get(&key)
    }

    fn for_each_object(
        &self,
        entity: &str,
        visit: &mut dyn FnMut(&Object) -> Result<()>,
    ) -> Result<()> {
        for object in self.objects.values().filter(|o| o.entity == entity) {
            visit(object)?;
        }
        Ok(())
    }

    fn add_object(&mut self, entity: &str, properties: Properties) -> Result<ObjectKey> {
        self.require_scope()?;
        self.check_properties(entity, &properties)?;

        let key = ObjectKey(self.next_key);
        self.next_key += 1;
        self.record(key);

        let properties = properties.into_iter().filter(|(_, v)| !v.is_null()).collect();
        self.objects.insert(key, Object { key, entity: entity.to_owned(), properties });
        Ok(key)
    }

    fn update_property(&mut self, key: ObjectKey, property: &str, value: Value) -> Result<Value> {
        self.require_scope()?;
        let entity = self.objects.get(&key).ok_or(Error::ObjectNotFound(key))?.entity.clone();
        check_value(&entity, property, self.schema.property(&entity, property), &value)?;

        self.record(key);
        let object = self.objects.get_mut(&key).ok_or(Error::ObjectNotFound(key))?;
        let previous = if value.is_null() {
            object.properties.remove(property)
        } else {
            object.properties.insert(property.to_owned(), value)
        };
        Ok(previous.unwrap_or(Value::Null))
    }

    fn delete_object(&mut self, key: ObjectKey) -> Result<Object> {
        self.require_scope()?;
        if !self.objects.contains_key(&key) {
            return Err(Error::ObjectNotFound(key));
        }
        self.record(key);
        self.objects.remove(&key).ok_or(Error::ObjectNotFound(key))
    }
}
