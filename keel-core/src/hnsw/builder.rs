//! Layer assignment and bulk graph construction.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::distance::DistanceMetric;
use crate::error::Result;
use crate::hnsw::HnswParams;
use crate::hnsw::graph::HnswGraph;
use crate::hnsw::node::MAX_LAYERS;
use crate::store::ObjectKey;

#[derive(Debug)]
enum LevelSource {
    Thread,
    Seeded(StdRng),
}

/// Draws node layers from the exponential decay `floor(-ln(u) * ml)`.
///
/// Draws are capped at `MAX_LAYERS - 1`. A seeded generator makes graph
/// shape reproducible for identical insertion sequences.
#[derive(Debug)]
pub struct LevelGenerator {
    ml: f64,
    source: LevelSource,
}

impl LevelGenerator {
    /// Generator backed by the thread-local RNG.
    #[must_use]
    pub fn new(ml: f64) -> Self {
        Self { ml, source: LevelSource::Thread }
    }

    /// Generator with a fixed seed.
    #[must_use]
    pub fn seeded(ml: f64, seed: u64) -> Self {
        Self { ml, source: LevelSource::Seeded(StdRng::seed_from_u64(seed)) }
    }

    /// Generator seeded when `seed` is set, thread-backed otherwise.
    #[must_use]
    pub fn from_seed(ml: f64, seed: Option<u64>) -> Self {
        seed.map_or_else(|| Self::new(ml), |seed| Self::seeded(ml, seed))
    }

    /// Draw the layer for a new node.
    pub fn draw(&mut self) -> usize {
        let sample: f64 = match &mut self.source {
            LevelSource::Thread => rand::rng().random(),
            LevelSource::Seeded(rng) => rng.random(),
        };
        // `random` yields [0, 1); flip it so ln never sees zero
        let uniform = 1.0 - sample;
        let level = (-uniform.ln() * self.ml).floor();

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let level = level as usize;
        level.min(MAX_LAYERS - 1)
    }
}

/// Builder for constructing an HNSW graph from existing vectors
pub struct HnswBuilder {
    metric: DistanceMetric,
    params: HnswParams,
    seed: Option<u64>,
}

impl HnswBuilder {
    #[must_use]
    pub fn new(metric: DistanceMetric, params: HnswParams) -> Self {
        Self { metric, params, seed: None }
    }

    /// Use a seeded layer generator.
    #[must_use]
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Build a graph by inserting every vector in iteration order.
    ///
    /// # Errors
    ///
    /// Fails on the first vector that is rejected by
    /// [`HnswGraph::insert`]; nothing is returned in that case.
    pub fn build<I>(self, vectors: I) -> Result<HnswGraph>
    where
        I: IntoIterator<Item = (ObjectKey, Vec<f32>)>,
    {
        let levels = LevelGenerator::from_seed(self.params.ml, self.seed);
        let mut graph = HnswGraph::new(self.metric, self.params, levels);

        for (key, vector) in vectors {
            graph.insert(key, vector)?;
        }

        tracing::debug!(
            nodes = graph.len(),
            max_layer = graph.max_layer(),
            "built hnsw graph"
        );
        Ok(graph)
    }
}
