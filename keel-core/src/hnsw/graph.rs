use anyhow::bail;

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::hnsw::HnswParams;
use crate::hnsw::builder::LevelGenerator;
use crate::hnsw::node::{GraphNode, MAX_LAYERS};
use crate::hnsw::store::NodeStore;
use crate::persist::codec::{ByteReader, ByteWriter};
use crate::store::ObjectKey;

/// Committed graph metadata restored on rollback.
#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    entry_point: Option<ObjectKey>,
    max_layer: usize,
    dimension: Option<usize>,
}

/// Point-in-time graph statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphStats {
    /// Number of indexed vectors.
    pub num_vectors: usize,
    /// Highest populated layer (0 when empty).
    pub max_layer: usize,
    /// Established dimension, `None` until the first insert.
    pub dimension: Option<usize>,
}

/// In-memory HNSW graph over object keys.
///
/// The graph is either empty (no entry point, `max_layer == 0`) or has an
/// entry point that lives on the highest populated layer. Every neighbor
/// key refers to a live node whose own layer reaches the list's layer.
#[derive(Debug)]
pub struct HnswGraph {
    pub(crate) params: HnswParams,
    pub(crate) metric: DistanceMetric,

    /// Entry point node (highest layer node)
    pub(crate) entry_point: Option<ObjectKey>,

    /// Maximum layer in the graph
    pub(crate) max_layer: usize,

    /// Vector length fixed by the first insert; survives emptiness
    pub(crate) dimension: Option<usize>,

    pub(crate) nodes: NodeStore,
    levels: LevelGenerator,
    checkpoint: Option<Checkpoint>,
}

impl HnswGraph {
    /// An empty graph.
    #[must_use]
    pub fn new(metric: DistanceMetric, params: HnswParams, levels: LevelGenerator) -> Self {
        Self {
            params,
            metric,
            entry_point: None,
            max_layer: 0,
            dimension: None,
            nodes: NodeStore::new(),
            levels,
            checkpoint: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    #[must_use]
    pub const fn entry_point(&self) -> Option<ObjectKey> {
        self.entry_point
    }

    #[inline]
    #[must_use]
    pub const fn max_layer(&self) -> usize {
        self.max_layer
    }

    #[inline]
    #[must_use]
    pub const fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    #[inline]
    #[must_use]
    pub const fn metric(&self) -> DistanceMetric {
        self.metric
    }

    #[inline]
    #[must_use]
    pub const fn params(&self) -> HnswParams {
        self.params
    }

    /// Look up the node for an object key.
    #[must_use]
    pub fn node(&self, key: ObjectKey) -> Option<&GraphNode> {
        self.nodes.get(key)
    }

    /// All nodes in key order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> + '_ {
        self.nodes.iter()
    }

    #[must_use]
    pub fn stats(&self) -> GraphStats {
        GraphStats { num_vectors: self.len(), max_layer: self.max_layer, dimension: self.dimension }
    }

    /// Check that `vector` may be inserted.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an empty or non-finite vector,
    /// [`Error::DimensionMismatch`] against the established dimension and
    /// [`Error::DegenerateVector`] for a zero vector under cosine.
    pub fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::invalid("cannot index an empty vector"));
        }
        self.check_query(vector)
    }

    /// Like [`HnswGraph::check_vector`], but an unpopulated graph accepts
    /// any length.
    pub(crate) fn check_query(&self, query: &[f32]) -> Result<()> {
        if let Some(expected) = self.dimension
            && query.len() != expected
        {
            return Err(Error::DimensionMismatch { expected, actual: query.len() });
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(Error::invalid("vector contains NaN or infinite components"));
        }
        self.metric.check_vector(query)
    }

    /// Distance from `query` to the stored vector of `key`.
    pub(crate) fn distance_to(&self, query: &[f32], key: ObjectKey) -> Result<f32> {
        let node = self
            .nodes
            .get(key)
            .ok_or_else(|| Error::corrupted(format!("neighbor {key} has no node")))?;
        self.metric.distance(query, node.vector())
    }

    /// Insert a vector for `key`, replacing any existing node for it.
    ///
    /// # Errors
    ///
    /// Rejects vectors that fail [`HnswGraph::check_vector`]; the graph is
    /// untouched in that case.
    pub fn insert(&mut self, key: ObjectKey, vector: Vec<f32>) -> Result<()> {
        self.check_vector(&vector)?;
        let layer = self.levels.draw();
        self.insert_with_layer(key, vector, layer)
    }

    /// Insert with a caller-chosen layer instead of a random draw.
    ///
    /// # Errors
    ///
    /// Same as [`HnswGraph::insert`], plus a layer at or above the cap.
    pub fn insert_with_layer(&mut self, key: ObjectKey, vector: Vec<f32>, layer: usize) -> Result<()> {
        self.check_vector(&vector)?;
        if layer >= MAX_LAYERS {
            return Err(Error::invalid(format!("layer {layer} exceeds cap of {}", MAX_LAYERS - 1)));
        }
        if self.nodes.contains(key) {
            self.remove(key)?;
        }

        self.dimension.get_or_insert(vector.len());
        let mut node = GraphNode::new(key, vector, layer);

        let Some(entry) = self.entry_candidate(node.vector())? else {
            self.nodes.put(node);
            self.entry_point = Some(key);
            self.max_layer = layer;
            tracing::debug!(key = %key, layer, "entry point set");
            return Ok(());
        };

        let entry = self.descend(node.vector(), entry, layer)?;
        let mut entries = vec![entry];
        for l in (0..=layer.min(self.max_layer)).rev() {
            let found = self.search_layer(node.vector(), &entries, self.params.ef_construction, l)?;
            let selected = self.select_neighbors_heuristic(&found, self.params.max_neighbors(l), None)?;
            node.set_neighbors(l, &selected);
            if !found.is_empty() {
                entries = found;
            }
        }

        self.link_node(node)?;

        if layer > self.max_layer {
            tracing::debug!(key = %key, from = self.max_layer, to = layer, "entry point raised");
            self.entry_point = Some(key);
            self.max_layer = layer;
        }

        tracing::trace!(key = %key, layer, "inserted node");
        Ok(())
    }

    /// Replace the vector stored for `key`.
    ///
    /// # Errors
    ///
    /// Same as [`HnswGraph::insert`].
    pub fn update(&mut self, key: ObjectKey, vector: Vec<f32>) -> Result<()> {
        self.insert(key, vector)
    }

    /// Remove the node for `key`. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// Fails only if repair finds the graph already inconsistent.
    pub fn remove(&mut self, key: ObjectKey) -> Result<bool> {
        let Some(removed) = self.nodes.remove(key) else {
            return Ok(false);
        };

        self.unlink_node(&removed)?;

        if self.entry_point == Some(key) {
            self.promote_entry_point();
        }
        Ok(true)
    }

    /// Make the highest-layer node the entry point, smallest key first.
    fn promote_entry_point(&mut self) {
        let mut best: Option<&GraphNode> = None;
        for node in self.nodes.iter() {
            if best.is_none_or(|b| node.layer() > b.layer()) {
                best = Some(node);
            }
        }

        let previous = self.entry_point;
        self.entry_point = best.map(GraphNode::key);
        self.max_layer = best.map_or(0, GraphNode::layer);

        match self.entry_point {
            Some(key) => {
                tracing::debug!(from = ?previous, to = %key, max_layer = self.max_layer, "entry point promoted");
            }
            None => tracing::debug!("graph is empty"),
        }
    }

    /// Start journaling changes for a write scope.
    pub fn begin(&mut self) {
        self.checkpoint = Some(Checkpoint {
            entry_point: self.entry_point,
            max_layer: self.max_layer,
            dimension: self.dimension,
        });
        self.nodes.begin();
    }

    /// Keep all changes since [`HnswGraph::begin`].
    pub fn commit(&mut self) {
        self.checkpoint = None;
        self.nodes.commit();
    }

    /// Discard all changes since [`HnswGraph::begin`].
    pub fn rollback(&mut self) {
        if let Some(cp) = self.checkpoint.take() {
            self.entry_point = cp.entry_point;
            self.max_layer = cp.max_layer;
            self.dimension = cp.dimension;
        }
        self.nodes.rollback();
    }

    /// Verify every structural invariant of the graph.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] naming the first violation found.
    pub fn validate(&self) -> Result<()> {
        let Some(entry) = self.entry_point else {
            if !self.nodes.is_empty() || self.max_layer != 0 {
                return Err(Error::corrupted("nodes present without an entry point"));
            }
            return Ok(());
        };

        let entry_node =
            self.nodes.get(entry).ok_or_else(|| Error::corrupted(format!("entry point {entry} has no node")))?;
        if entry_node.layer() != self.max_layer {
            return Err(Error::corrupted(format!(
                "entry point {entry} is on layer {}, max layer is {}",
                entry_node.layer(),
                self.max_layer
            )));
        }

        for node in self.nodes.iter() {
            let key = node.key();
            if node.layer() > self.max_layer {
                return Err(Error::corrupted(format!("node {key} above max layer")));
            }
            if Some(node.vector().len()) != self.dimension {
                return Err(Error::corrupted(format!("node {key} has dimension {}", node.vector().len())));
            }
            for layer in 0..=node.layer() {
                let neighbors = node.neighbors(layer);
                if neighbors.len() > self.params.max_neighbors(layer) {
                    return Err(Error::corrupted(format!("node {key} over capacity on layer {layer}")));
                }
                for &n in neighbors {
                    match self.nodes.get(n) {
                        Some(target) if n != key && target.layer() >= layer => {}
                        _ => {
                            return Err(Error::corrupted(format!("node {key} has invalid neighbor {n} on layer {layer}")));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Append the graph state to a payload.
    pub(crate) fn encode(&self, w: &mut ByteWriter) {
        w.put_len(self.dimension.unwrap_or(0));
        match self.entry_point {
            Some(key) => {
                w.put_u8(1);
                w.put_u64(key.as_u64());
            }
            None => w.put_u8(0),
        }
        w.put_len(self.max_layer);
        w.put_len(self.nodes.len());
        self.nodes.for_each(|node| node.encode(w));
    }

    /// Read graph state written by [`HnswGraph::encode`]. The result is
    /// not validated.
    pub(crate) fn decode(
        r: &mut ByteReader<'_>,
        metric: DistanceMetric,
        params: HnswParams,
        levels: LevelGenerator,
    ) -> anyhow::Result<Self> {
        let dimension = match r.get_u64()? {
            0 => None,
            d => Some(usize::try_from(d)?),
        };
        let entry_point = match r.get_u8()? {
            0 => None,
            1 => Some(ObjectKey(r.get_u64()?)),
            flag => bail!("invalid entry point flag {flag}"),
        };
        let max_layer = usize::try_from(r.get_u64()?)?;
        if max_layer >= MAX_LAYERS {
            bail!("max layer {max_layer} exceeds cap");
        }

        let count = r.get_len(8)?;
        let mut graph = Self::new(metric, params, levels);
        for _ in 0..count {
            let node = GraphNode::decode(r)?;
            if graph.nodes.contains(node.key()) {
                bail!("duplicate node {}", node.key());
            }
            graph.nodes.put(node);
        }

        graph.dimension = dimension;
        graph.entry_point = entry_point;
        graph.max_layer = max_layer;
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(m: usize, seed: u64) -> HnswGraph {
        let params = HnswParams::new(m, 64);
        HnswGraph::new(DistanceMetric::Euclidean, params, LevelGenerator::seeded(params.ml, seed))
    }

    fn k(n: u64) -> ObjectKey {
        ObjectKey(n)
    }

    #[test]
    fn test_empty_graph() {
        let g = graph(4, 1);
        assert!(g.is_empty());
        assert_eq!(g.entry_point(), None);
        assert_eq!(g.max_layer(), 0);
        assert!(g.search(&[1.0, 2.0], 5, 10).unwrap().is_empty());
        g.validate().unwrap();
    }

    #[test]
    fn test_first_insert_sets_entry_and_dimension() {
        let mut g = graph(4, 1);
        g.insert_with_layer(k(7), vec![1.0, 2.0, 3.0], 2).unwrap();
        assert_eq!(g.entry_point(), Some(k(7)));
        assert_eq!(g.max_layer(), 2);
        assert_eq!(g.dimension(), Some(3));
    }

    #[test]
    fn test_dimension_enforced() {
        let mut g = graph(4, 1);
        g.insert(k(1), vec![1.0, 2.0]).unwrap();
        let err = g.insert(k(2), vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, actual: 3 }));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_rejects_non_finite_and_empty() {
        let mut g = graph(4, 1);
        assert!(matches!(g.insert(k(1), vec![f32::NAN]), Err(Error::InvalidArgument(_))));
        assert!(matches!(g.insert(k(1), vec![]), Err(Error::InvalidArgument(_))));
        assert!(g.is_empty());
        assert_eq!(g.dimension(), None);
    }

    #[test]
    fn test_entry_point_promotion() {
        let mut g = graph(4, 1);
        g.insert_with_layer(k(1), vec![0.0, 0.0], 3).unwrap();
        g.insert_with_layer(k(5), vec![1.0, 0.0], 2).unwrap();
        g.insert_with_layer(k(2), vec![2.0, 0.0], 2).unwrap();
        g.insert_with_layer(k(3), vec![3.0, 0.0], 0).unwrap();

        g.remove(k(1)).unwrap();
        // Highest remaining layer is 2; smallest key wins the tie
        assert_eq!(g.entry_point(), Some(k(2)));
        assert_eq!(g.max_layer(), 2);
        g.validate().unwrap();

        for key in [2, 3, 5] {
            g.remove(k(key)).unwrap();
        }
        assert_eq!(g.entry_point(), None);
        assert_eq!(g.max_layer(), 0);
        assert_eq!(g.dimension(), Some(2), "dimension survives emptiness");
    }

    #[test]
    fn test_reinsert_replaces_node() {
        let mut g = graph(4, 1);
        for i in 0..10 {
            g.insert(k(i), vec![i as f32, 0.0]).unwrap();
        }
        g.insert(k(3), vec![100.0, 0.0]).unwrap();
        assert_eq!(g.len(), 10);
        assert_eq!(g.node(k(3)).unwrap().vector(), &[100.0, 0.0]);

        let hits = g.search(&[100.0, 0.0], 1, 16).unwrap();
        assert_eq!(hits[0].key, k(3));
        g.validate().unwrap();
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut g = graph(4, 1);
        assert!(!g.remove(k(99)).unwrap());
    }

    #[test]
    fn test_search_exact_on_small_graph() {
        let mut g = graph(8, 2);
        for i in 0..100u64 {
            g.insert(k(i), vec![(i % 10) as f32, (i / 10) as f32]).unwrap();
        }
        let hits = g.search(&[3.0, 4.0], 3, 100).unwrap();
        assert_eq!(hits[0].key, k(43));
        assert_eq!(hits[0].distance, 0.0);
        assert!(hits.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_rollback_restores_graph() {
        let mut g = graph(4, 1);
        for i in 0..20 {
            g.insert(k(i), vec![i as f32, 1.0]).unwrap();
        }
        let before: Vec<GraphNode> = g.nodes().cloned().collect();
        let entry = g.entry_point();

        g.begin();
        g.remove(entry.unwrap()).unwrap();
        for i in 20..40 {
            g.insert_with_layer(k(i), vec![i as f32, 1.0], 5).unwrap();
        }
        g.rollback();

        let after: Vec<GraphNode> = g.nodes().cloned().collect();
        assert_eq!(before, after);
        assert_eq!(g.entry_point(), entry);
        g.validate().unwrap();
    }

    #[test]
    fn test_validate_detects_dangling_neighbor() {
        let mut g = graph(4, 1);
        g.insert(k(1), vec![0.0]).unwrap();
        g.insert(k(2), vec![1.0]).unwrap();
        g.nodes.get_mut(k(1)).unwrap().set_neighbors(0, &[k(9)]);
        assert!(matches!(g.validate(), Err(Error::Corrupted(_))));
    }

    #[test]
    fn test_encode_decode_preserves_structure() {
        let mut g = graph(4, 5);
        for i in 0..30 {
            g.insert(k(i), vec![i as f32, (i * 2) as f32]).unwrap();
        }
        let mut w = ByteWriter::new();
        g.encode(&mut w);
        let bytes = w.into_bytes();

        let mut r = ByteReader::new(&bytes);
        let decoded =
            HnswGraph::decode(&mut r, g.metric(), g.params(), LevelGenerator::seeded(g.params().ml, 5)).unwrap();
        r.finish().unwrap();

        decoded.validate().unwrap();
        assert_eq!(decoded.stats(), g.stats());
        assert_eq!(decoded.entry_point(), g.entry_point());
        assert!(decoded.nodes().eq(g.nodes()));
    }
}
