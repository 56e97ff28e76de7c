//! Greedy and beam search over the layered graph.
//!
//! Candidates are ordered by distance with the object key as tie-breaker,
//! using `f32::total_cmp`, so ordering is total (NaN never panics) and
//! results are reproducible for identical graphs.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use crate::error::{Error, Result};
use crate::hnsw::graph::HnswGraph;
use crate::store::ObjectKey;

/// Absolute tolerance applied to radius comparisons, so that identical
/// vectors qualify for a zero radius under every metric.
pub const DISTANCE_EPSILON: f32 = 1e-6;

/// Smallest beam width used by radius search.
const RADIUS_MIN_WIDTH: usize = 64;

/// Whether `distance` falls inside a radius of `max_distance`.
#[inline]
#[must_use]
pub fn within_radius(distance: f32, max_distance: f32) -> bool {
    distance <= max_distance + DISTANCE_EPSILON
}

/// A node key paired with its distance to the current query.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    /// Node (object) key.
    pub key: ObjectKey,
    /// Distance to the query.
    pub distance: f32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.total_cmp(&other.distance).then(self.key.cmp(&other.key))
    }
}

impl HnswGraph {
    /// Search for the `k` nearest neighbors of `query`.
    ///
    /// Descends greedily from the entry point through layers `max_layer..1`,
    /// then runs a beam of width `max(ef, k)` on layer 0. Returns
    /// `min(k, len)` candidates, ascending. If the beam reaches fewer nodes
    /// than that, every node is ranked directly. An empty graph yields an
    /// empty list.
    ///
    /// # Errors
    ///
    /// Fails for `k == 0`, `ef == 0`, a query of the wrong dimension, a
    /// non-finite query, or a zero-norm query under cosine.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<Candidate>> {
        if k == 0 {
            return Err(Error::invalid("k must be greater than 0"));
        }
        if ef == 0 {
            return Err(Error::invalid("ef_search must be greater than 0"));
        }
        self.check_query(query)?;

        let Some(entry) = self.entry_candidate(query)? else {
            return Ok(Vec::new());
        };
        let entry = self.descend(query, entry, 0)?;

        let mut found = self.search_layer(query, &[entry], ef.max(k), 0)?;
        if found.len() < k.min(self.len()) {
            tracing::trace!(reached = found.len(), total = self.len(), "beam fell short, scanning all nodes");
            found = self.scan_all(query)?;
        }
        found.truncate(k);
        Ok(found)
    }

    /// Search for every node within `max_distance` of `query`.
    ///
    /// The layer-0 beam starts at `max(ef, max_results, 64)` and doubles
    /// while every candidate it returns is still inside the radius, up to
    /// the size of the graph. A full-width beam that still misses nodes
    /// falls back to ranking every node. Returns at most `max_results`
    /// candidates, ascending.
    ///
    /// # Errors
    ///
    /// Same as [`HnswGraph::search`], plus a negative or NaN `max_distance`
    /// and `max_results == 0`.
    pub fn search_radius(
        &self,
        query: &[f32],
        max_distance: f32,
        max_results: usize,
        ef: usize,
    ) -> Result<Vec<Candidate>> {
        if max_distance.is_nan() || max_distance < 0.0 {
            return Err(Error::invalid(format!("max_distance must be >= 0, got {max_distance}")));
        }
        if max_results == 0 {
            return Err(Error::invalid("max_results must be greater than 0"));
        }
        if ef == 0 {
            return Err(Error::invalid("ef_search must be greater than 0"));
        }
        self.check_query(query)?;

        let Some(entry) = self.entry_candidate(query)? else {
            return Ok(Vec::new());
        };
        let entry = self.descend(query, entry, 0)?;

        let total = self.len();
        let mut width = ef.max(max_results).max(RADIUS_MIN_WIDTH).min(total);
        loop {
            let mut found = self.search_layer(query, &[entry], width, 0)?;
            let inside = found.iter().take_while(|c| within_radius(c.distance, max_distance)).count();

            let saturated = inside == found.len();
            if saturated && inside < max_results && width >= total && found.len() < total {
                tracing::trace!(reached = found.len(), total, "radius beam fell short, scanning all nodes");
                found = self.scan_all(query)?;
                let inside = found.iter().take_while(|c| within_radius(c.distance, max_distance)).count();
                found.truncate(inside.min(max_results));
                return Ok(found);
            }
            if !saturated || inside >= max_results || width >= total {
                found.truncate(inside.min(max_results));
                return Ok(found);
            }

            width = width.saturating_mul(2).min(total);
            tracing::trace!(width, inside, "widening radius beam");
        }
    }

    /// Distance from `query` to the entry point, or `None` for an empty graph.
    pub(crate) fn entry_candidate(&self, query: &[f32]) -> Result<Option<Candidate>> {
        self.entry_point
            .map(|key| Ok(Candidate { key, distance: self.distance_to(query, key)? }))
            .transpose()
    }

    /// Every node ranked by distance to `query`, ascending.
    fn scan_all(&self, query: &[f32]) -> Result<Vec<Candidate>> {
        let mut all = self
            .nodes
            .iter()
            .map(|node| Ok(Candidate { key: node.key(), distance: self.metric.distance(query, node.vector())? }))
            .collect::<Result<Vec<_>>>()?;
        all.sort();
        Ok(all)
    }

    /// Greedy descent from `entry` through every layer above `stop_layer`.
    pub(crate) fn descend(
        &self,
        query: &[f32],
        entry: Candidate,
        stop_layer: usize,
    ) -> Result<Candidate> {
        let mut current = entry;
        for layer in (stop_layer + 1..=self.max_layer).rev() {
            current = self.greedy_closest(query, current, layer)?;
        }
        Ok(current)
    }

    /// Walk to the locally closest node on one layer.
    pub(crate) fn greedy_closest(
        &self,
        query: &[f32],
        entry: Candidate,
        layer: usize,
    ) -> Result<Candidate> {
        let mut best = entry;
        loop {
            let Some(node) = self.nodes.get(best.key) else {
                return Err(Error::corrupted(format!("missing node {}", best.key)));
            };

            let mut improved = false;
            for &neighbor in node.neighbors(layer) {
                let candidate = Candidate { key: neighbor, distance: self.distance_to(query, neighbor)? };
                if candidate < best {
                    best = candidate;
                    improved = true;
                }
            }

            if !improved {
                return Ok(best);
            }
        }
    }

    /// Beam search on one layer, returning up to `ef` candidates ascending.
    pub(crate) fn search_layer(
        &self,
        query: &[f32],
        entries: &[Candidate],
        ef: usize,
        layer: usize,
    ) -> Result<Vec<Candidate>> {
        let mut visited: HashSet<ObjectKey> = entries.iter().map(|c| c.key).collect();
        let mut frontier: BinaryHeap<Reverse<Candidate>> = entries.iter().copied().map(Reverse).collect();
        let mut results: BinaryHeap<Candidate> = entries.iter().copied().collect();
        while results.len() > ef {
            results.pop();
        }

        while let Some(Reverse(current)) = frontier.pop() {
            if results.len() >= ef && results.peek().is_some_and(|worst| current > *worst) {
                break;
            }

            let Some(node) = self.nodes.get(current.key) else {
                return Err(Error::corrupted(format!("missing node {}", current.key)));
            };

            for &neighbor in node.neighbors(layer) {
                if !visited.insert(neighbor) {
                    continue;
                }

                let candidate = Candidate { key: neighbor, distance: self.distance_to(query, neighbor)? };
                if results.len() < ef || results.peek().is_some_and(|worst| candidate < *worst) {
                    frontier.push(Reverse(candidate));
                    results.push(candidate);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        Ok(results.into_sorted_vec())
    }
}
