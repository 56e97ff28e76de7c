//! Vector index lifecycle and object-mutation hooks.
//!
//! The [`IndexManager`] owns one HNSW graph per indexed `(entity, property)`
//! pair and keeps it consistent with the object store: every object add,
//! property update and delete is forwarded here inside the same write
//! scope. The manager journals catalog changes (index created or removed)
//! and asks each graph to journal its own nodes, so a rollback discards
//! both.
//!
//! # Validation
//!
//! The `validate_*` hooks run before the store is mutated. A vector that
//! would be rejected by a graph (wrong dimension, NaN, zero norm under
//! cosine) is reported before anything changes, so a failed mutation never
//! leaves the store and the graph out of step.

use std::collections::BTreeMap;

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::hnsw::{HnswBuilder, HnswGraph, HnswParams, LevelGenerator};
use crate::persist::codec::{ByteReader, ByteWriter};
use crate::store::{Object, ObjectKey, ObjectStore, Properties, Value};

/// Configuration for one vector index.
///
/// # Example
///
/// ```
/// use keel_core::{DistanceMetric, VectorIndexConfig};
///
/// let config = VectorIndexConfig::new(DistanceMetric::Cosine)
///     .max_connections(32)
///     .ef_construction(400);
/// assert_eq!(config.max_connections, 32);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorIndexConfig {
    /// Distance metric, immutable after creation.
    pub metric: DistanceMetric,

    /// Maximum links per node above layer 0 (M). Layer 0 allows 2M.
    pub max_connections: usize,

    /// Candidate list size during construction (efConstruction).
    pub ef_construction: usize,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self { metric: DistanceMetric::Euclidean, max_connections: 16, ef_construction: 200 }
    }
}

impl VectorIndexConfig {
    /// Default parameters with the given metric.
    #[must_use]
    pub fn new(metric: DistanceMetric) -> Self {
        Self { metric, ..Self::default() }
    }

    #[must_use]
    pub const fn max_connections(mut self, m: usize) -> Self {
        self.max_connections = m;
        self
    }

    #[must_use]
    pub const fn ef_construction(mut self, ef: usize) -> Self {
        self.ef_construction = ef;
        self
    }

    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `max_connections` or `ef_construction` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::invalid("max_connections (m) must be greater than 0"));
        }
        if self.ef_construction == 0 {
            return Err(Error::invalid("ef_construction must be greater than 0"));
        }
        Ok(())
    }

    pub(crate) fn params(&self) -> HnswParams {
        HnswParams::new(self.max_connections, self.ef_construction)
    }
}

/// Point-in-time statistics for one vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    /// Number of indexed vectors.
    pub num_vectors: usize,
    /// Highest populated layer (0 when empty).
    pub max_layer: usize,
    /// Vector length, `None` until the first vector is indexed.
    pub dimension: Option<usize>,
    pub metric: DistanceMetric,
    pub max_connections: usize,
    pub ef_construction: usize,
}

/// One vector index bound to an `(entity, property)` pair.
#[derive(Debug)]
pub struct VectorIndex {
    entity: String,
    property: String,
    config: VectorIndexConfig,
    graph: HnswGraph,
}

impl VectorIndex {
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }

    #[must_use]
    pub const fn config(&self) -> VectorIndexConfig {
        self.config
    }

    /// The underlying graph.
    #[must_use]
    pub const fn graph(&self) -> &HnswGraph {
        &self.graph
    }

    #[must_use]
    pub fn stats(&self) -> IndexStats {
        let graph = self.graph.stats();
        IndexStats {
            num_vectors: graph.num_vectors,
            max_layer: graph.max_layer,
            dimension: graph.dimension,
            metric: self.config.metric,
            max_connections: self.config.max_connections,
            ef_construction: self.config.ef_construction,
        }
    }
}

type IndexId = (String, String);

fn index_id(entity: &str, property: &str) -> IndexId {
    (entity.to_owned(), property.to_owned())
}

/// Catalog change recorded while a write scope is open.
#[derive(Debug)]
enum CatalogUndo {
    Created(IndexId),
    Removed(IndexId, Box<VectorIndex>),
}

/// Owner of every vector index in a database.
#[derive(Debug, Default)]
pub struct IndexManager {
    indexes: BTreeMap<IndexId, VectorIndex>,
    journal: Option<Vec<CatalogUndo>>,
    layer_seed: Option<u64>,
}

impl IndexManager {
    /// An empty catalog. With `layer_seed` set, every index draws layers
    /// from a seeded generator derived from the seed and its own binding.
    #[must_use]
    pub fn new(layer_seed: Option<u64>) -> Self {
        Self { indexes: BTreeMap::new(), journal: None, layer_seed }
    }

    /// Create an index and bulk-build it from existing objects.
    ///
    /// Objects are inserted in store iteration order. Objects whose
    /// property is unset or empty are skipped.
    ///
    /// # Errors
    ///
    /// - [`Error::NotInWriteScope`] outside a write scope
    /// - [`Error::InvalidArgument`] for a zero `m` or `ef_construction`
    /// - [`Error::EntityNotFound`] / [`Error::PropertyNotFound`] for unknown names
    /// - [`Error::UnsupportedPropertyType`] unless the property is a float list
    /// - [`Error::AlreadyExists`] if the property is already indexed; the
    ///   existing index is left untouched
    /// - any vector error raised while building; nothing is created then
    pub fn create_index(
        &mut self,
        store: &dyn ObjectStore,
        entity: &str,
        property: &str,
        config: VectorIndexConfig,
    ) -> Result<()> {
        require_scope(store)?;
        config.validate()?;

        if !store.has_entity(entity) {
            return Err(Error::EntityNotFound(entity.to_owned()));
        }
        let schema = store.property_schema(entity, property).ok_or_else(|| Error::PropertyNotFound {
            entity: entity.to_owned(),
            property: property.to_owned(),
        })?;
        if !schema.is_float_vector() {
            return Err(Error::UnsupportedPropertyType {
                entity: entity.to_owned(),
                property: property.to_owned(),
                found: schema.to_string(),
            });
        }

        let id = index_id(entity, property);
        if self.indexes.contains_key(&id) {
            return Err(Error::AlreadyExists { entity: entity.to_owned(), property: property.to_owned() });
        }

        let mut vectors = Vec::new();
        store.for_each_object(entity, &mut |object| {
            if let Some(v) = object.get(property).as_vector() {
                vectors.push((object.key(), v.to_vec()));
            }
            Ok(())
        })?;

        let graph = HnswBuilder::new(config.metric, config.params())
            .seed(self.seed_for(entity, property))
            .build(vectors)?;

        tracing::info!(
            entity,
            property,
            metric = ?config.metric,
            m = config.max_connections,
            ef_construction = config.ef_construction,
            vectors = graph.len(),
            "created vector index"
        );

        self.indexes.insert(
            id.clone(),
            VectorIndex { entity: entity.to_owned(), property: property.to_owned(), config, graph },
        );
        self.record(CatalogUndo::Created(id));
        Ok(())
    }

    /// Drop an index. Property values on objects are not touched.
    ///
    /// # Errors
    ///
    /// [`Error::NotInWriteScope`] outside a write scope, [`Error::NotFound`]
    /// if the property is not indexed.
    pub fn remove_index(&mut self, store: &dyn ObjectStore, entity: &str, property: &str) -> Result<()> {
        require_scope(store)?;

        let id = index_id(entity, property);
        let index = self
            .indexes
            .remove(&id)
            .ok_or_else(|| Error::NotFound { entity: entity.to_owned(), property: property.to_owned() })?;

        tracing::info!(entity, property, vectors = index.graph.len(), "removed vector index");
        self.record(CatalogUndo::Removed(id, Box::new(index)));
        Ok(())
    }

    #[must_use]
    pub fn has_index(&self, entity: &str, property: &str) -> bool {
        self.indexes.contains_key(&index_id(entity, property))
    }

    /// Statistics, or `None` if the property is not indexed.
    #[must_use]
    pub fn stats(&self, entity: &str, property: &str) -> Option<IndexStats> {
        self.index(entity, property).map(VectorIndex::stats)
    }

    #[must_use]
    pub fn index(&self, entity: &str, property: &str) -> Option<&VectorIndex> {
        self.indexes.get(&index_id(entity, property))
    }

    /// All indexes, ordered by entity then property.
    pub fn indexes(&self) -> impl Iterator<Item = &VectorIndex> + '_ {
        self.indexes.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Check the indexed properties of a new `entity` object.
    ///
    /// # Errors
    ///
    /// Any error [`HnswGraph::check_vector`] reports.
    pub fn validate_object(&self, entity: &str, properties: &Properties) -> Result<()> {
        for index in self.indexes.values().filter(|i| i.entity == entity) {
            if let Some(v) = properties.get(&index.property).and_then(Value::as_vector) {
                index.graph.check_vector(v)?;
            }
        }
        Ok(())
    }

    /// Check a new value for `property` of the object at `key`.
    ///
    /// # Errors
    ///
    /// [`Error::ObjectNotFound`], or any error [`HnswGraph::check_vector`]
    /// reports for an indexed property.
    pub fn validate_update(
        &self,
        store: &dyn ObjectStore,
        key: ObjectKey,
        property: &str,
        value: &Value,
    ) -> Result<()> {
        let object = store.object(key).ok_or(Error::ObjectNotFound(key))?;
        if let Some(index) = self.index(object.entity(), property)
            && let Some(v) = value.as_vector()
        {
            index.graph.check_vector(v)?;
        }
        Ok(())
    }

    /// Index the populated vector properties of a newly added object.
    ///
    /// # Errors
    ///
    /// [`Error::NotInWriteScope`], [`Error::ObjectNotFound`], or a graph error.
    pub fn on_object_added(&mut self, store: &dyn ObjectStore, key: ObjectKey) -> Result<()> {
        require_scope(store)?;
        let object = store.object(key).ok_or(Error::ObjectNotFound(key))?;

        for index in self.indexes.values_mut().filter(|i| i.entity == object.entity()) {
            if let Some(v) = object.get(&index.property).as_vector() {
                index.graph.insert(key, v.to_vec())?;
            }
        }
        Ok(())
    }

    /// Re-index `property` of the object at `key` after it changed from
    /// `previous`. An identical value is a no-op, a cleared value removes
    /// the node, anything else is a full re-insertion.
    ///
    /// # Errors
    ///
    /// [`Error::NotInWriteScope`], [`Error::ObjectNotFound`], or a graph error.
    pub fn on_property_updated(
        &mut self,
        store: &dyn ObjectStore,
        key: ObjectKey,
        property: &str,
        previous: &Value,
    ) -> Result<()> {
        require_scope(store)?;
        let object = store.object(key).ok_or(Error::ObjectNotFound(key))?;
        let Some(index) = self.indexes.get_mut(&index_id(object.entity(), property)) else {
            return Ok(());
        };

        let current = object.get(property);
        if current.as_vector() == previous.as_vector() {
            return Ok(());
        }

        match current.as_vector() {
            Some(v) => index.graph.update(key, v.to_vec()),
            None => index.graph.remove(key).map(drop),
        }
    }

    /// Drop the nodes of a deleted object from every index on its entity.
    ///
    /// # Errors
    ///
    /// [`Error::NotInWriteScope`], or a graph error.
    pub fn on_object_deleted(&mut self, store: &dyn ObjectStore, object: &Object) -> Result<()> {
        require_scope(store)?;
        for index in self.indexes.values_mut().filter(|i| i.entity == object.entity()) {
            index.graph.remove(object.key())?;
        }
        Ok(())
    }

    /// Start journaling catalog and graph changes.
    pub fn begin(&mut self) {
        self.journal = Some(Vec::new());
        for index in self.indexes.values_mut() {
            index.graph.begin();
        }
    }

    /// Keep every change since [`IndexManager::begin`].
    pub fn commit(&mut self) {
        self.journal = None;
        for index in self.indexes.values_mut() {
            index.graph.commit();
        }
    }

    /// Discard every change since [`IndexManager::begin`].
    pub fn rollback(&mut self) {
        let undo = self.journal.take().unwrap_or_default();
        for change in undo.into_iter().rev() {
            match change {
                CatalogUndo::Created(id) => {
                    self.indexes.remove(&id);
                }
                CatalogUndo::Removed(id, mut index) => {
                    index.graph.rollback();
                    self.indexes.insert(id, *index);
                }
            }
        }
        for index in self.indexes.values_mut() {
            index.graph.rollback();
        }
    }

    /// Check every graph against itself and against `store`.
    ///
    /// # Errors
    ///
    /// [`Error::Corrupted`] if a graph is malformed, a node has no live
    /// object of the index's entity, or a populated object has no node.
    pub fn verify(&self, store: &dyn ObjectStore) -> Result<()> {
        for index in self.indexes.values() {
            index.graph.validate()?;

            for node in index.graph.nodes() {
                let owner = store.object(node.key()).filter(|o| o.entity() == index.entity);
                if owner.is_none() {
                    return Err(Error::corrupted(format!(
                        "{}.{}: node {} has no live object",
                        index.entity,
                        index.property,
                        node.key()
                    )));
                }
            }

            let mut populated = 0usize;
            store.for_each_object(&index.entity, &mut |object| {
                if object.get(&index.property).as_vector().is_some() {
                    populated += 1;
                }
                Ok(())
            })?;
            if populated != index.graph.len() {
                return Err(Error::corrupted(format!(
                    "{}.{}: {} populated objects but {} nodes",
                    index.entity,
                    index.property,
                    populated,
                    index.graph.len()
                )));
            }
        }
        Ok(())
    }

    /// Append the catalog and every graph to a payload.
    pub(crate) fn encode(&self, w: &mut ByteWriter) {
        w.put_len(self.indexes.len());
        for index in self.indexes.values() {
            w.put_str(&index.entity);
            w.put_str(&index.property);
            w.put_u8(index.config.metric.tag());
            w.put_len(index.config.max_connections);
            w.put_len(index.config.ef_construction);
            index.graph.encode(w);
        }
    }

    /// Read a catalog written by [`IndexManager::encode`]. Graphs are not
    /// verified; see [`IndexManager::verify`].
    pub(crate) fn decode(r: &mut ByteReader<'_>, layer_seed: Option<u64>) -> anyhow::Result<Self> {
        let mut manager = Self::new(layer_seed);
        let count = r.get_len(1)?;
        for _ in 0..count {
            let entity = r.get_str()?;
            let property = r.get_str()?;
            let tag = r.get_u8()?;
            let metric =
                DistanceMetric::from_tag(tag).ok_or_else(|| anyhow::anyhow!("unknown metric tag {tag}"))?;
            let config = VectorIndexConfig {
                metric,
                max_connections: usize::try_from(r.get_u64()?)?,
                ef_construction: usize::try_from(r.get_u64()?)?,
            };
            config.validate()?;

            let params = config.params();
            let levels = LevelGenerator::from_seed(params.ml, manager.seed_for(&entity, &property));
            let graph = HnswGraph::decode(r, metric, params, levels)?;

            let id = index_id(&entity, &property);
            if manager.indexes.contains_key(&id) {
                anyhow::bail!("duplicate index on {entity}.{property}");
            }
            manager.indexes.insert(id, VectorIndex { entity, property, config, graph });
        }
        Ok(manager)
    }

    fn record(&mut self, change: CatalogUndo) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(change);
        }
    }

    /// Per-index seed: FNV-1a over the binding, mixed with the database seed.
    fn seed_for(&self, entity: &str, property: &str) -> Option<u64> {
        let seed = self.layer_seed?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in entity.bytes().chain([0]).chain(property.bytes()) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        Some(seed ^ hash)
    }
}

fn require_scope(store: &dyn ObjectStore) -> Result<()> {
    if !store.in_write_scope() {
        return Err(Error::NotInWriteScope);
    }
    Ok(())
}
