//! The embedded database: object store, vector indexes and persistence
//! behind one single-writer transactional boundary.
//!
//! # Write Scopes
//!
//! Every mutation goes through a [`WriteScope`], obtained from
//! [`Database::begin_write`]. The scope borrows the database mutably, so no
//! search can run while a write is in flight and searches never observe a
//! half-applied graph mutation. [`WriteScope::commit`] publishes the
//! changes; dropping the scope without committing rolls back every object
//! and graph change made inside it.
//!
//! # Durability
//!
//! A database opened with [`Database::open`] writes a full snapshot on
//! [`Database::flush`] (or after every commit with
//! [`DatabaseOptions::sync_on_commit`]). Unflushed commits are lost when
//! the process exits.

use std::path::Path;

use crate::error::Result;
use crate::index::{IndexManager, IndexStats, VectorIndexConfig};
use crate::persist::{self, SnapshotFile};
use crate::search::{self, SearchHit};
use crate::store::{MemoryStore, Object, ObjectKey, ObjectStore, Properties, Schema, Value};

/// Configuration options for a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// Default search quality for KNN and radius queries (efSearch).
    pub ef_search: usize,

    /// Default cap on radius results.
    pub radius_max_results: usize,

    /// Write a snapshot after every successful commit.
    pub sync_on_commit: bool,

    /// Seed for layer assignment. `None` uses the thread-local RNG.
    pub layer_seed: Option<u64>,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self { ef_search: 50, radius_max_results: 100, sync_on_commit: false, layer_seed: None }
    }
}

/// An embedded object database with HNSW vector indexes.
///
/// # Example
///
/// ```
/// use keel_core::{
///     Database, DatabaseOptions, EntitySchema, PropertyKind, PropertySchema, Schema, Value,
///     VectorIndexConfig,
/// };
///
/// # fn main() -> keel_core::Result<()> {
/// let schema = Schema::new().entity(
///     EntitySchema::new("Doc").property("embedding", PropertySchema::list(PropertyKind::Float)),
/// );
/// let mut db = Database::in_memory(schema, DatabaseOptions::default());
///
/// db.write(|scope| {
///     scope.create_vector_index("Doc", "embedding", VectorIndexConfig::default())?;
///     scope.add_object("Doc", [("embedding", Value::from(vec![1.0, 0.0]))])?;
///     scope.add_object("Doc", [("embedding", Value::from(vec![0.0, 1.0]))])?;
///     Ok(())
/// })?;
///
/// let hits = db.knn("Doc", "embedding", &[0.9, 0.1], 1)?;
/// assert_eq!(hits[0].object.get("embedding"), &Value::from(vec![1.0, 0.0]));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Database {
    store: MemoryStore,
    indexes: IndexManager,
    options: DatabaseOptions,
    file: Option<SnapshotFile>,
}

impl Database {
    /// A database that lives only in memory.
    #[must_use]
    pub fn in_memory(schema: Schema, options: DatabaseOptions) -> Self {
        Self { store: MemoryStore::new(schema), indexes: IndexManager::new(options.layer_seed), options, file: None }
    }

    /// Open or create a database file.
    ///
    /// An existing snapshot must have been written with an equal schema.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The database is already open ([`crate::Error::Storage`])
    /// - The file cannot be read or mapped ([`crate::Error::Storage`])
    /// - The header or payload is malformed, the stored schema differs, or
    ///   a graph fails its integrity check ([`crate::Error::Corrupted`])
    pub fn open<P: AsRef<Path>>(path: P, schema: Schema, options: DatabaseOptions) -> Result<Self> {
        let file = SnapshotFile::lock(path)?;

        let (store, indexes) = match file.read().map_err(persist::classify)? {
            Some((header, payload)) => persist::decode(&header, &payload, schema, options.layer_seed)?,
            None => (MemoryStore::new(schema), IndexManager::new(options.layer_seed)),
        };

        tracing::info!(
            path = %file.path().display(),
            objects = store.len(),
            indexes = indexes.len(),
            "opened database"
        );
        Ok(Self { store, indexes, options, file: Some(file) })
    }

    /// Write a snapshot of all committed state. No-op for in-memory databases.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the snapshot cannot be written.
    pub fn flush(&mut self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };

        let (header, payload) = persist::encode(&self.store, &self.indexes);
        file.write(&header, &payload)?;

        tracing::info!(
            path = %file.path().display(),
            bytes = payload.len(),
            objects = header.object_count,
            indexes = header.index_count,
            "flushed snapshot"
        );
        Ok(())
    }

    /// Open a write scope.
    ///
    /// # Errors
    ///
    /// Fails only if a previous scope was leaked without being dropped.
    pub fn begin_write(&mut self) -> Result<WriteScope<'_>> {
        self.store.begin_write()?;
        self.indexes.begin();
        Ok(WriteScope { db: self, committed: false })
    }

    /// Run `f` in a write scope, committing if it returns `Ok` and rolling
    /// back otherwise.
    ///
    /// # Errors
    ///
    /// Whatever `f` returns, or a commit failure.
    pub fn write<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut WriteScope<'_>) -> Result<T>,
    {
        let mut scope = self.begin_write()?;
        let value = f(&mut scope)?;
        scope.commit()?;
        Ok(value)
    }

    #[must_use]
    pub const fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    #[must_use]
    pub const fn schema(&self) -> &Schema {
        self.store.schema()
    }

    /// Path of the backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(SnapshotFile::path)
    }

    #[must_use]
    pub fn object(&self, key: ObjectKey) -> Option<&Object> {
        self.store.object(key)
    }

    /// Objects of one entity type in key order.
    pub fn objects<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a Object> + 'a {
        self.store.objects().filter(move |o| o.entity() == entity)
    }

    #[must_use]
    pub fn object_count(&self, entity: &str) -> usize {
        self.store.count(entity)
    }

    #[must_use]
    pub fn has_vector_index(&self, entity: &str, property: &str) -> bool {
        self.indexes.has_index(entity, property)
    }

    /// Index statistics, or `None` if the property is not indexed.
    #[must_use]
    pub fn vector_index_stats(&self, entity: &str, property: &str) -> Option<IndexStats> {
        self.indexes.stats(entity, property)
    }

    /// The index catalog.
    #[must_use]
    pub const fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    /// The `k` nearest objects, using the default efSearch.
    ///
    /// # Errors
    ///
    /// See [`search::knn`].
    pub fn knn(&self, entity: &str, property: &str, query: &[f32], k: usize) -> Result<Vec<SearchHit<'_>>> {
        self.knn_with_ef(entity, property, query, k, self.options.ef_search)
    }

    /// The `k` nearest objects with an explicit efSearch.
    ///
    /// # Errors
    ///
    /// See [`search::knn`].
    pub fn knn_with_ef(
        &self,
        entity: &str,
        property: &str,
        query: &[f32],
        k: usize,
        ef_search: usize,
    ) -> Result<Vec<SearchHit<'_>>> {
        search::knn(&self.store, &self.indexes, entity, property, query, k, ef_search)
    }

    /// Objects within `max_distance`, capped at the default result limit.
    ///
    /// # Errors
    ///
    /// See [`search::radius`].
    pub fn radius(
        &self,
        entity: &str,
        property: &str,
        query: &[f32],
        max_distance: f32,
    ) -> Result<Vec<SearchHit<'_>>> {
        self.radius_with_limit(entity, property, query, max_distance, self.options.radius_max_results)
    }

    /// Objects within `max_distance`, at most `max_results`.
    ///
    /// # Errors
    ///
    /// See [`search::radius`].
    pub fn radius_with_limit(
        &self,
        entity: &str,
        property: &str,
        query: &[f32],
        max_distance: f32,
        max_results: usize,
    ) -> Result<Vec<SearchHit<'_>>> {
        search::radius(
            &self.store,
            &self.indexes,
            entity,
            property,
            query,
            max_distance,
            max_results,
            self.options.ef_search,
        )
    }
}

/// An open write scope. See the [module docs](self).
///
/// A failed operation leaves the scope as it was before the call, so the
/// caller may carry on or drop the scope to discard everything.
#[derive(Debug)]
pub struct WriteScope<'db> {
    db: &'db mut Database,
    committed: bool,
}

impl WriteScope<'_> {
    /// Add an object and index its populated vector properties.
    ///
    /// # Errors
    ///
    /// Schema errors from the store, or vector errors from any index on
    /// `entity`. Nothing is added on error.
    pub fn add_object<I, K>(&mut self, entity: &str, properties: I) -> Result<ObjectKey>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let properties: Properties = properties.into_iter().map(|(k, v)| (k.into(), v)).collect();

        self.db.store.check_properties(entity, &properties)?;
        self.db.indexes.validate_object(entity, &properties)?;

        let key = self.db.store.add_object(entity, properties)?;
        self.db.indexes.on_object_added(&self.db.store, key)?;
        tracing::trace!(entity, key = %key, "added object");
        Ok(key)
    }

    /// Set one property. Changing an indexed vector re-inserts its node.
    ///
    /// # Errors
    ///
    /// [`crate::Error::ObjectNotFound`], schema errors, or vector errors. Nothing
    /// changes on error.
    pub fn update_property(&mut self, key: ObjectKey, property: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.db.indexes.validate_update(&self.db.store, key, property, &value)?;

        let previous = self.db.store.update_property(key, property, value)?;
        self.db.indexes.on_property_updated(&self.db.store, key, property, &previous)?;
        Ok(())
    }

    /// Delete an object and its nodes in every index.
    ///
    /// # Errors
    ///
    /// [`crate::Error::ObjectNotFound`] if there is no such object.
    pub fn delete_object(&mut self, key: ObjectKey) -> Result<()> {
        let removed = self.db.store.delete_object(key)?;
        self.db.indexes.on_object_deleted(&self.db.store, &removed)?;
        tracing::trace!(key = %key, "deleted object");
        Ok(())
    }

    /// Create a vector index on `entity.property` and build it from the
    /// objects that already exist.
    ///
    /// # Errors
    ///
    /// See [`IndexManager::create_index`].
    pub fn create_vector_index(&mut self, entity: &str, property: &str, config: VectorIndexConfig) -> Result<()> {
        self.db.indexes.create_index(&self.db.store, entity, property, config)
    }

    /// Remove the vector index on `entity.property`. Property values stay.
    ///
    /// # Errors
    ///
    /// See [`IndexManager::remove_index`].
    pub fn remove_vector_index(&mut self, entity: &str, property: &str) -> Result<()> {
        self.db.indexes.remove_index(&self.db.store, entity, property)
    }

    /// Read an object, including uncommitted changes.
    #[must_use]
    pub fn object(&self, key: ObjectKey) -> Option<&Object> {
        self.db.store.object(key)
    }

    /// Index statistics, including uncommitted changes.
    #[must_use]
    pub fn vector_index_stats(&self, entity: &str, property: &str) -> Option<IndexStats> {
        self.db.indexes.stats(entity, property)
    }

    #[must_use]
    pub fn has_vector_index(&self, entity: &str, property: &str) -> bool {
        self.db.indexes.has_index(entity, property)
    }

    /// Publish every change made in this scope.
    ///
    /// # Errors
    ///
    /// With [`DatabaseOptions::sync_on_commit`], a snapshot write failure.
    /// The commit itself has already happened in that case.
    pub fn commit(mut self) -> Result<()> {
        self.db.store.commit();
        self.db.indexes.commit();
        self.committed = true;
        tracing::debug!("write scope committed");

        if self.db.options.sync_on_commit {
            self.db.flush()?;
        }
        Ok(())
    }
}

impl Drop for WriteScope<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.db.store.rollback();
            self.db.indexes.rollback();
            tracing::debug!("write scope rolled back");
        }
    }
}
