//! KNN and radius search tests
//!
//! Small datasets stay under the layer-0 neighbor cap, so no backlink is
//! ever pruned and a beam wider than the dataset must see every node.
//! That lets the property tests compare against brute force exactly.

use keel_core::{
    DISTANCE_EPSILON, Database, DatabaseOptions, DistanceMetric, EntitySchema, Error, ObjectKey, PropertyKind,
    PropertySchema, Schema, Value, VectorIndexConfig, cosine_distance, dot_product_distance, euclidean_distance,
};
use proptest::prelude::*;

const DIM: usize = 4;

fn schema() -> Schema {
    Schema::new().entity(EntitySchema::new("Point").property("v", PropertySchema::list(PropertyKind::Float)))
}

fn build(metric: DistanceMetric, vectors: &[Vec<f32>]) -> (Database, Vec<ObjectKey>) {
    let mut db = Database::in_memory(
        schema(),
        DatabaseOptions { ef_search: 64, layer_seed: Some(5), ..DatabaseOptions::default() },
    );
    let keys = db
        .write(|scope| {
            scope.create_vector_index("Point", "v", VectorIndexConfig::new(metric))?;
            vectors.iter().map(|v| scope.add_object("Point", [("v", Value::from(v.clone()))])).collect()
        })
        .unwrap();
    (db, keys)
}

fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Euclidean => euclidean_distance(a, b),
        DistanceMetric::Cosine => cosine_distance(a, b),
        DistanceMetric::DotProduct => dot_product_distance(a, b),
    }
}

fn vector() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-10.0f32..10.0, DIM)
}

fn dataset() -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(vector(), 1..30)
}

proptest! {
    #[test]
    fn prop_knn_count_and_order(vectors in dataset(), query in vector(), k in 1usize..40) {
        let (db, _) = build(DistanceMetric::Euclidean, &vectors);
        let hits = db.knn("Point", "v", &query, k).unwrap();

        prop_assert_eq!(hits.len(), k.min(vectors.len()));
        for pair in hits.windows(2) {
            prop_assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn prop_knn_matches_brute_force(vectors in dataset(), query in vector()) {
        let (db, _) = build(DistanceMetric::Euclidean, &vectors);
        let hits = db.knn("Point", "v", &query, 5).unwrap();

        let mut expected: Vec<f32> = vectors.iter().map(|v| euclidean_distance(&query, v)).collect();
        expected.sort_by(f32::total_cmp);
        expected.truncate(5);

        let found: Vec<f32> = hits.iter().map(|h| h.distance).collect();
        prop_assert_eq!(found, expected);
    }

    #[test]
    fn prop_radius_matches_brute_force(
        vectors in dataset(),
        query in vector(),
        max_distance in 0.0f32..15.0,
    ) {
        let (db, keys) = build(DistanceMetric::Euclidean, &vectors);
        let hits = db.radius("Point", "v", &query, max_distance).unwrap();

        let mut expected: Vec<ObjectKey> = keys
            .iter()
            .zip(&vectors)
            .filter(|(_, v)| euclidean_distance(&query, v) <= max_distance + DISTANCE_EPSILON)
            .map(|(k, _)| *k)
            .collect();
        expected.sort();

        let mut found: Vec<ObjectKey> = hits.iter().map(|h| h.key()).collect();
        found.sort();
        prop_assert_eq!(found, expected);

        for pair in hits.windows(2) {
            prop_assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn prop_radius_respects_limit(vectors in dataset(), query in vector(), limit in 1usize..10) {
        let (db, _) = build(DistanceMetric::Euclidean, &vectors);
        let hits = db.radius_with_limit("Point", "v", &query, f32::MAX, limit).unwrap();
        prop_assert_eq!(hits.len(), limit.min(vectors.len()));
    }
}

#[test]
fn test_k_larger_than_index() {
    let vectors: Vec<Vec<f32>> = (0..5).map(|i| vec![i as f32; DIM]).collect();
    let (db, _) = build(DistanceMetric::Euclidean, &vectors);
    assert_eq!(db.knn("Point", "v", &[0.0; DIM], 100).unwrap().len(), 5);
}

#[test]
fn test_empty_index() {
    let (db, _) = build(DistanceMetric::Euclidean, &[]);
    assert!(db.knn("Point", "v", &[1.0, 2.0, 3.0], 10).unwrap().is_empty());
    assert!(db.radius("Point", "v", &[1.0, 2.0, 3.0], 1.0).unwrap().is_empty());
}

#[test]
fn test_exact_match_ranks_first() {
    let vectors: Vec<Vec<f32>> = (0..25)
        .map(|i| {
            let t = i as f32 * 0.37;
            vec![t.cos(), t.sin(), 1.0 + t, 0.5]
        })
        .collect();

    for metric in [DistanceMetric::Euclidean, DistanceMetric::Cosine] {
        let (db, keys) = build(metric, &vectors);
        for (key, v) in keys.iter().zip(&vectors) {
            let hits = db.knn("Point", "v", v, 1).unwrap();
            assert_eq!(hits[0].key(), *key, "{metric:?}");
            assert!(hits[0].distance.abs() < 1e-5, "{metric:?}");
        }
    }
}

#[test]
fn test_distances_match_metric() {
    let vectors: Vec<Vec<f32>> = (0..12).map(|i| vec![1.0 + i as f32, 2.0, -(i as f32), 0.5]).collect();
    let query = [0.3, -1.0, 2.0, 1.0];

    for metric in [DistanceMetric::Euclidean, DistanceMetric::Cosine, DistanceMetric::DotProduct] {
        let (db, _) = build(metric, &vectors);
        for hit in db.knn("Point", "v", &query, 12).unwrap() {
            let stored = hit.object.get("v").as_vector().unwrap();
            assert!((hit.distance - distance(metric, &query, stored)).abs() < 1e-5);
        }
    }
}

#[test]
fn test_dot_product_prefers_larger_inner_product() {
    let vectors = vec![vec![1.0, 0.0, 0.0, 0.0], vec![2.0, 0.0, 0.0, 0.0], vec![0.0, 3.0, 0.0, 0.0]];
    let (db, keys) = build(DistanceMetric::DotProduct, &vectors);

    let hits = db.knn("Point", "v", &[1.0, 0.0, 0.0, 0.0], 3).unwrap();
    let order: Vec<ObjectKey> = hits.iter().map(|h| h.key()).collect();
    assert_eq!(order, vec![keys[1], keys[0], keys[2]]);
    assert_eq!(hits[0].distance, -2.0);
    assert_eq!(hits[2].distance, 0.0);
}

#[test]
fn test_zero_radius_returns_exact_copies() {
    let vectors = vec![vec![1.0, 1.0, 1.0, 1.0], vec![1.0, 1.0, 1.0, 1.0], vec![1.0, 1.0, 1.0, 1.5]];
    let (db, keys) = build(DistanceMetric::Euclidean, &vectors);

    let hits = db.radius("Point", "v", &[1.0, 1.0, 1.0, 1.0], 0.0).unwrap();
    let found: Vec<ObjectKey> = hits.iter().map(|h| h.key()).collect();
    assert_eq!(found, vec![keys[0], keys[1]]);
}

#[test]
fn test_ties_break_by_key() {
    let vectors = vec![vec![1.0, 0.0, 0.0, 0.0], vec![-1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]];
    let (db, keys) = build(DistanceMetric::Euclidean, &vectors);

    let hits = db.knn("Point", "v", &[0.0; DIM], 3).unwrap();
    let order: Vec<ObjectKey> = hits.iter().map(|h| h.key()).collect();
    assert_eq!(order, keys);
}

#[test]
fn test_larger_dataset_recall() {
    // Past the neighbor caps the graph prunes, so check recall instead of exactness
    let vectors: Vec<Vec<f32>> = (0..400)
        .map(|i| {
            let x = (i % 20) as f32;
            let y = (i / 20) as f32;
            vec![x, y, (x * 0.3).sin(), (y * 0.3).cos()]
        })
        .collect();
    let (db, _) = build(DistanceMetric::Euclidean, &vectors);

    let mut recalled = 0;
    let queries = [[3.2, 4.1, 0.0, 1.0], [10.0, 10.0, 0.5, 0.5], [18.7, 0.4, -0.5, 1.0], [7.5, 15.5, 0.2, -0.2]];
    for query in &queries {
        let mut truth: Vec<f32> = vectors.iter().map(|v| euclidean_distance(query, v)).collect();
        truth.sort_by(f32::total_cmp);
        let cutoff = truth[9];

        let hits = db.knn_with_ef("Point", "v", query, 10, 100).unwrap();
        recalled += hits.iter().filter(|h| h.distance <= cutoff).count();
    }
    assert!(recalled >= 36, "recall too low: {recalled}/40");
}

#[test]
fn test_query_errors() {
    let vectors = vec![vec![1.0, 2.0, 3.0, 4.0]];
    let (db, _) = build(DistanceMetric::Cosine, &vectors);

    assert!(matches!(db.knn("Point", "v", &[1.0, 2.0], 1), Err(Error::DimensionMismatch { expected: 4, actual: 2 })));
    assert!(matches!(db.knn("Point", "v", &[0.0; DIM], 1), Err(Error::DegenerateVector)));
    assert!(matches!(db.knn("Point", "v", &[f32::NAN, 0.0, 0.0, 1.0], 1), Err(Error::InvalidArgument(_))));
    assert!(matches!(db.knn("Point", "v", &[1.0; DIM], 0), Err(Error::InvalidArgument(_))));
    assert!(matches!(db.knn_with_ef("Point", "v", &[1.0; DIM], 1, 0), Err(Error::InvalidArgument(_))));
    assert!(matches!(db.radius("Point", "v", &[1.0; DIM], -1.0), Err(Error::InvalidArgument(_))));
    assert!(matches!(db.radius("Point", "v", &[1.0; DIM], f32::NAN), Err(Error::InvalidArgument(_))));
    assert!(matches!(db.knn("Other", "v", &[1.0; DIM], 1), Err(Error::NotFound { .. })));
}
