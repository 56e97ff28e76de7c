//! Keel - Embedded object store with HNSW vector indexes
//!
//! Keel keeps typed objects in a transactional store and maintains
//! approximate nearest-neighbor indexes over their float-vector properties.
//! Index graphs are updated in the same write scope as the object mutation
//! that caused them, so a rolled-back write leaves no trace in any index.
//!
//! # Features
//!
//! - HNSW graphs with Euclidean, Cosine and Dot-Product metrics
//! - KNN and radius search resolved back to live objects
//! - Single-writer write scopes with all-or-nothing rollback
//! - Page-aligned snapshot files, written atomically and locked while open
//! - Seedable layer assignment for reproducible graphs
//!
//! # Example
//!
//! ```no_run
//! use keel_core::{
//!     Database, DatabaseOptions, DistanceMetric, EntitySchema, PropertyKind, PropertySchema,
//!     Schema, Value, VectorIndexConfig,
//! };
//!
//! # fn main() -> keel_core::Result<()> {
//! let schema = Schema::new().entity(
//!     EntitySchema::new("Article")
//!         .property("title", PropertySchema::scalar(PropertyKind::String))
//!         .property("embedding", PropertySchema::list(PropertyKind::Float)),
//! );
//!
//! // Open or create a database
//! let mut db = Database::open("articles.keel", schema, DatabaseOptions::default())?;
//!
//! // Index the embedding property and add objects
//! db.write(|scope| {
//!     let config = VectorIndexConfig::new(DistanceMetric::Cosine);
//!     scope.create_vector_index("Article", "embedding", config)?;
//!     scope.add_object(
//!         "Article",
//!         [("title", Value::from("Rust 2024")), ("embedding", Value::from(vec![0.1; 384]))],
//!     )?;
//!     Ok(())
//! })?;
//!
//! // Flush to disk for durability
//! db.flush()?;
//!
//! // Search for nearest neighbors
//! for hit in db.knn("Article", "embedding", &vec![0.1; 384], 10)? {
//!     println!("{:?} at {}", hit.object.get("title"), hit.distance);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Design Philosophy
//!
//! Keel is an embedded library. It does not aim to be:
//! - A database server
//! - A query engine over non-vector fields
//! - A sync or replication layer
//!
//! These concerns are left to the application layer.

pub mod database;
pub mod distance;
pub mod error;
pub mod index;
pub mod search;
pub mod store;

#[cfg(feature = "internals")]
pub mod hnsw;
#[cfg(not(feature = "internals"))]
pub(crate) mod hnsw;

#[cfg(feature = "internals")]
pub mod persist;
#[cfg(not(feature = "internals"))]
pub(crate) mod persist;

pub use database::{Database, DatabaseOptions, WriteScope};
pub use distance::{DistanceMetric, cosine_distance, dot_product_distance, euclidean_distance};
pub use error::{Error, Result};
pub use hnsw::{Candidate, DISTANCE_EPSILON, GraphNode, GraphStats, HnswGraph, HnswParams, MAX_LAYERS};
pub use index::{IndexManager, IndexStats, VectorIndex, VectorIndexConfig};
pub use persist::{HEADER_SIZE, Header, MAGIC, VERSION};
pub use search::SearchHit;
pub use store::{
    EntitySchema, MemoryStore, Object, ObjectKey, ObjectStore, Properties, PropertyKind, PropertySchema,
    Schema, Value,
};
