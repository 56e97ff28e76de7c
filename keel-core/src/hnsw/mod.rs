mod builder;
mod graph;
mod link;
mod node;
mod search;
mod store;

pub use builder::{HnswBuilder, LevelGenerator};
pub use graph::{GraphStats, HnswGraph};
pub use node::{GraphNode, MAX_LAYERS};
pub use search::{Candidate, DISTANCE_EPSILON};
#[cfg(feature = "internals")]
pub use search::within_radius;
#[cfg(feature = "internals")]
pub use store::NodeStore;

/// HNSW construction parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HnswParams {
    /// Maximum connections per node on upper layers (M). Layer 0 allows 2M.
    pub max_connections: usize,

    /// Construction quality (efConstruction)
    pub ef_construction: usize,

    /// Layer selection multiplier, `1 / ln(max(M, 2))`
    pub ml: f64,
}

impl HnswParams {
    /// Parameters for `max_connections` and `ef_construction`, with the
    /// matching layer multiplier.
    #[must_use]
    pub fn new(max_connections: usize, ef_construction: usize) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let ml = 1.0 / (max_connections.max(2) as f64).ln();
        Self { max_connections, ef_construction, ml }
    }

    /// Neighbor capacity at `layer`.
    #[inline]
    #[must_use]
    pub const fn max_neighbors(&self, layer: usize) -> usize {
        if layer == 0 { self.max_connections * 2 } else { self.max_connections }
    }
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::new(16, 200)
    }
}
