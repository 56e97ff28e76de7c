//! KNN and radius queries resolved back into stored objects.

use crate::error::{Error, Result};
use crate::hnsw::Candidate;
use crate::index::{IndexManager, VectorIndex};
use crate::store::{Object, ObjectKey, ObjectStore};

/// One search result: a live object and its distance to the query.
#[derive(Debug, Clone, Copy)]
pub struct SearchHit<'a> {
    /// The matching object.
    pub object: &'a Object,
    /// Distance under the index's metric. Smaller is more similar.
    pub distance: f32,
}

impl SearchHit<'_> {
    /// Key of the matching object.
    #[must_use]
    pub const fn key(&self) -> ObjectKey {
        self.object.key()
    }
}

/// The `k` nearest objects to `query`, ascending by distance.
///
/// Returns fewer than `k` hits only when the index holds fewer vectors.
///
/// # Errors
///
/// [`Error::NotFound`] if the property is not indexed, plus every error
/// [`HnswGraph::search`](crate::hnsw::HnswGraph::search) reports.
pub fn knn<'s, S>(
    store: &'s S,
    indexes: &IndexManager,
    entity: &str,
    property: &str,
    query: &[f32],
    k: usize,
    ef_search: usize,
) -> Result<Vec<SearchHit<'s>>>
where
    S: ObjectStore + ?Sized,
{
    let index = lookup(indexes, entity, property)?;
    let found = index.graph().search(query, k, ef_search)?;
    resolve(store, index, found)
}

/// Objects within `max_distance` of `query`, ascending, at most `max_results`.
///
/// # Errors
///
/// [`Error::NotFound`] if the property is not indexed, plus every error
/// [`HnswGraph::search_radius`](crate::hnsw::HnswGraph::search_radius) reports.
#[allow(clippy::too_many_arguments)]
pub fn radius<'s, S>(
    store: &'s S,
    indexes: &IndexManager,
    entity: &str,
    property: &str,
    query: &[f32],
    max_distance: f32,
    max_results: usize,
    ef_search: usize,
) -> Result<Vec<SearchHit<'s>>>
where
    S: ObjectStore + ?Sized,
{
    let index = lookup(indexes, entity, property)?;
    let found = index.graph().search_radius(query, max_distance, max_results, ef_search)?;
    resolve(store, index, found)
}

fn lookup<'i>(indexes: &'i IndexManager, entity: &str, property: &str) -> Result<&'i VectorIndex> {
    indexes
        .index(entity, property)
        .ok_or_else(|| Error::NotFound { entity: entity.to_owned(), property: property.to_owned() })
}

fn resolve<'s, S>(store: &'s S, index: &VectorIndex, found: Vec<Candidate>) -> Result<Vec<SearchHit<'s>>>
where
    S: ObjectStore + ?Sized,
{
    found
        .into_iter()
        .map(|c| {
            let object = store.object(c.key).filter(|o| o.entity() == index.entity()).ok_or_else(|| {
                Error::corrupted(format!("{}.{}: hit {} has no live object", index.entity(), index.property(), c.key))
            })?;
            Ok(SearchHit { object, distance: c.distance })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;
    use crate::index::VectorIndexConfig;
    use crate::store::{EntitySchema, MemoryStore, Properties, PropertyKind, PropertySchema, Schema, Value};

    fn setup(metric: DistanceMetric, vectors: &[Vec<f32>]) -> (MemoryStore, IndexManager) {
        let mut store = MemoryStore::new(
            Schema::new().entity(EntitySchema::new("Doc").property("v", PropertySchema::list(PropertyKind::Float))),
        );
        let mut manager = IndexManager::new(Some(11));
        store.begin_write().unwrap();
        for v in vectors {
            store.add_object("Doc", Properties::from([("v".to_owned(), Value::from(v.clone()))])).unwrap();
        }
        manager.create_index(&store, "Doc", "v", VectorIndexConfig::new(metric)).unwrap();
        store.commit();
        (store, manager)
    }

    #[test]
    fn test_knn_resolves_objects() {
        let (store, manager) = setup(DistanceMetric::Euclidean, &[vec![0.0, 0.0], vec![3.0, 4.0], vec![1.0, 1.0]]);
        let hits = knn(&store, &manager, "Doc", "v", &[0.0, 0.0], 2, 50).unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].object.get("v"), &Value::from(vec![0.0, 0.0]));
        assert_eq!(hits[0].distance, 0.0);
        assert!((hits[1].distance - 2f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_unindexed_property() {
        let (store, manager) = setup(DistanceMetric::Euclidean, &[vec![1.0]]);
        assert!(matches!(
            knn(&store, &manager, "Doc", "other", &[1.0], 1, 50),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_argument_validation() {
        let (store, manager) = setup(DistanceMetric::Euclidean, &[vec![1.0, 2.0]]);
        assert!(matches!(knn(&store, &manager, "Doc", "v", &[1.0, 2.0], 0, 50), Err(Error::InvalidArgument(_))));
        assert!(matches!(knn(&store, &manager, "Doc", "v", &[1.0, 2.0], 1, 0), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            knn(&store, &manager, "Doc", "v", &[1.0], 1, 50),
            Err(Error::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            radius(&store, &manager, "Doc", "v", &[1.0, 2.0], -0.5, 10, 50),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            radius(&store, &manager, "Doc", "v", &[1.0, 2.0], 1.0, 0, 50),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_radius_zero_under_cosine() {
        let (store, manager) = setup(DistanceMetric::Cosine, &[vec![1.0, 2.0, 3.0], vec![2.0, 4.0, 6.0], vec![3.0, 2.0, 1.0]]);
        let hits = radius(&store, &manager, "Doc", "v", &[1.0, 2.0, 3.0], 0.0, 10, 50).unwrap();
        // Parallel vectors have cosine distance 0
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.distance.abs() < 1e-6));
    }

    #[test]
    fn test_dangling_hit_is_corruption() {
        let (mut store, manager) = setup(DistanceMetric::Euclidean, &[vec![1.0], vec![2.0]]);
        // Delete behind the manager's back
        store.begin_write().unwrap();
        let key = store.objects().next().unwrap().key();
        store.delete_object(key).unwrap();
        store.commit();

        assert!(matches!(knn(&store, &manager, "Doc", "v", &[1.0], 2, 50), Err(Error::Corrupted(_))));
    }
}
