//! Snapshot persistence tests: reopen, locking, corruption and schema checks.

use std::fs;
use std::path::Path;

use keel_core::{
    Database, DatabaseOptions, DistanceMetric, EntitySchema, Error, HEADER_SIZE, Header, ObjectKey, PropertyKind,
    PropertySchema, Schema, Value, VectorIndexConfig,
};
use tempfile::TempDir;

fn schema() -> Schema {
    Schema::new()
        .entity(
            EntitySchema::new("Article")
                .property("title", PropertySchema::scalar(PropertyKind::String))
                .property("score", PropertySchema::scalar(PropertyKind::Float))
                .property("tags", PropertySchema::list(PropertyKind::String))
                .property("embedding", PropertySchema::list(PropertyKind::Float)),
        )
        .entity(EntitySchema::new("Image").property("pixels", PropertySchema::list(PropertyKind::Double)))
}

fn options() -> DatabaseOptions {
    DatabaseOptions { layer_seed: Some(3), ..DatabaseOptions::default() }
}

fn embedding(i: usize) -> Vec<f32> {
    let t = i as f32 * 0.21;
    vec![t.sin(), t.cos(), (t * 0.5).sin(), 0.25 + (i % 7) as f32 * 0.1]
}

fn populate(path: &Path) -> Vec<ObjectKey> {
    let mut db = Database::open(path, schema(), options()).unwrap();
    let keys = db
        .write(|scope| {
            scope.create_vector_index("Article", "embedding", VectorIndexConfig::new(DistanceMetric::Cosine))?;
            scope.create_vector_index("Image", "pixels", VectorIndexConfig::default().max_connections(4))?;
            let mut keys = Vec::new();
            for i in 0..120 {
                keys.push(scope.add_object(
                    "Article",
                    [
                        ("title", Value::from(format!("article {i}"))),
                        ("score", Value::Float(i as f64 / 3.0)),
                        ("tags", Value::List(vec![Value::from("news"), Value::from(format!("t{}", i % 5))])),
                        ("embedding", Value::from(embedding(i))),
                    ],
                )?);
            }
            for i in 0..30 {
                scope.add_object("Image", [("pixels", Value::from(vec![i as f32, (i * i) as f32]))])?;
            }
            Ok(keys)
        })
        .unwrap();

    // Deletions exercise repair before the snapshot is taken
    db.write(|scope| keys.iter().step_by(9).try_for_each(|k| scope.delete_object(*k))).unwrap();
    db.flush().unwrap();
    keys
}

fn titles(db: &Database, query: &[f32]) -> Vec<(ObjectKey, f32)> {
    db.knn("Article", "embedding", query, 10).unwrap().iter().map(|h| (h.key(), h.distance)).collect()
}

#[test]
fn test_reopen_returns_identical_results() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("articles.keel");
    populate(&path);

    let queries: Vec<Vec<f32>> = (0..8).map(|i| embedding(i * 13 + 5)).collect();

    let (before, stats_before) = {
        let db = Database::open(&path, schema(), options()).unwrap();
        let results: Vec<_> = queries.iter().map(|q| titles(&db, q)).collect();
        (results, db.vector_index_stats("Article", "embedding").unwrap())
    };

    let db = Database::open(&path, schema(), options()).unwrap();
    let after: Vec<_> = queries.iter().map(|q| titles(&db, q)).collect();
    assert_eq!(before, after);
    assert_eq!(db.vector_index_stats("Article", "embedding").unwrap(), stats_before);
    assert_eq!(stats_before.num_vectors, 120 - 14);
    assert_eq!(db.vector_index_stats("Image", "pixels").unwrap().max_connections, 4);
    assert_eq!(db.object_count("Article"), 106);
}

#[test]
fn test_reopen_preserves_graph_topology() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("articles.keel");
    populate(&path);

    let nodes = |db: &Database| {
        let graph = db.indexes().index("Article", "embedding").unwrap().graph();
        (graph.entry_point(), graph.max_layer(), graph.nodes().cloned().collect::<Vec<_>>())
    };

    let first = nodes(&Database::open(&path, schema(), options()).unwrap());
    let second = nodes(&Database::open(&path, schema(), options()).unwrap());
    assert_eq!(first, second);
}

#[test]
fn test_values_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("articles.keel");
    let keys = populate(&path);

    let db = Database::open(&path, schema(), options()).unwrap();
    let object = db.object(keys[1]).unwrap();
    assert_eq!(object.entity(), "Article");
    assert_eq!(object.get("title"), &Value::from("article 1"));
    assert_eq!(object.get("score"), &Value::Float(1.0 / 3.0));
    assert_eq!(object.get("tags"), &Value::List(vec![Value::from("news"), Value::from("t1")]));
    assert!(db.object(keys[0]).is_none());
}

#[test]
fn test_new_keys_continue_after_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("articles.keel");
    let keys = populate(&path);

    let mut db = Database::open(&path, schema(), options()).unwrap();
    let key = db.write(|scope| scope.add_object("Article", [("title", Value::from("late"))])).unwrap();
    assert!(key > *keys.last().unwrap());
}

#[test]
fn test_second_open_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("articles.keel");

    let _db = Database::open(&path, schema(), options()).unwrap();
    let err = Database::open(&path, schema(), options()).unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
    assert!(err.to_string().contains("already open"));
}

#[test]
fn test_lock_released_on_drop() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("articles.keel");

    drop(Database::open(&path, schema(), options()).unwrap());
    Database::open(&path, schema(), options()).unwrap();
}

#[test]
fn test_unflushed_commits_are_lost() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("articles.keel");
    {
        let mut db = Database::open(&path, schema(), options()).unwrap();
        db.write(|scope| scope.add_object("Article", [("title", Value::from("gone"))])).unwrap();
    }
    let db = Database::open(&path, schema(), options()).unwrap();
    assert_eq!(db.object_count("Article"), 0);
}

#[test]
fn test_sync_on_commit() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("articles.keel");
    let synced = DatabaseOptions { sync_on_commit: true, ..options() };
    {
        let mut db = Database::open(&path, schema(), synced).unwrap();
        db.write(|scope| {
            scope.create_vector_index("Article", "embedding", VectorIndexConfig::default())?;
            scope.add_object("Article", [("embedding", Value::from(vec![1.0, 2.0]))])
        })
        .unwrap();
    }
    let db = Database::open(&path, schema(), options()).unwrap();
    assert_eq!(db.vector_index_stats("Article", "embedding").unwrap().num_vectors, 1);
    assert!(!dir.path().join("articles.keel.tmp").exists());
}

#[test]
fn test_schema_mismatch_is_corruption() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("articles.keel");
    populate(&path);

    let other = schema().entity(EntitySchema::new("Extra"));
    let err = Database::open(&path, other, options()).unwrap_err();
    assert!(matches!(err, Error::Corrupted(_)));
}

#[test]
fn test_foreign_file_is_corruption() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("articles.keel");
    fs::write(&path, vec![0xAB; HEADER_SIZE * 2]).unwrap();

    let err = Database::open(&path, schema(), options()).unwrap_err();
    assert!(matches!(err, Error::Corrupted(_)));
}

#[test]
fn test_future_version_is_corruption() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("articles.keel");
    populate(&path);

    let mut bytes = fs::read(&path).unwrap();
    let mut header = Header::from_bytes(&bytes).unwrap();
    header.version += 1;
    bytes[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    fs::write(&path, bytes).unwrap();

    assert!(matches!(Database::open(&path, schema(), options()), Err(Error::Corrupted(_))));
}

#[test]
fn test_damaged_payload_is_corruption() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("articles.keel");
    populate(&path);

    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 40]).unwrap();
    assert!(matches!(Database::open(&path, schema(), options()), Err(Error::Corrupted(_))));

    // Payload length intact, but trailing bytes overwritten
    let mut damaged = bytes.clone();
    let tail = damaged.len() - 8;
    damaged[tail..].copy_from_slice(&[0xFF; 8]);
    fs::write(&path, &damaged).unwrap();
    assert!(Database::open(&path, schema(), options()).is_err());
}

#[test]
fn test_empty_file_opens_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("articles.keel");
    fs::write(&path, b"").unwrap();

    let db = Database::open(&path, schema(), options()).unwrap();
    assert_eq!(db.object_count("Article"), 0);
    assert_eq!(db.path(), Some(path.as_path()));
}
