//! Bidirectional linking, diversity pruning and deletion repair.
//!
//! # Linking Order
//!
//! A new node is stored with its forward links first, then each selected
//! neighbor gains a backward link. When a neighbor is already at capacity
//! its list is re-selected with the diversity heuristic, and the new node
//! may be pruned away again. Edges are therefore not guaranteed to be
//! symmetric, but every stored key always refers to a live node.
//!
//! # Deletion Repair
//!
//! Removing a node strips it from every referrer's lists, then reconnects
//! each former referrer and former neighbor to the removed node's other
//! neighbors, closest first, until it is back at capacity.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::hnsw::graph::HnswGraph;
use crate::hnsw::node::GraphNode;
use crate::hnsw::search::Candidate;
use crate::store::ObjectKey;

/// Lazily filled symmetric matrix of candidate-to-candidate distances.
struct DistanceCache {
    data: Vec<f32>,
    size: usize,
}

impl DistanceCache {
    fn new(size: usize) -> Self {
        Self { data: vec![f32::NAN; size * size], size }
    }

    #[inline]
    fn get(&self, i: usize, j: usize) -> Option<f32> {
        let d = self.data[i * self.size + j];
        (!d.is_nan()).then_some(d)
    }

    #[inline]
    fn set(&mut self, i: usize, j: usize, distance: f32) {
        self.data[i * self.size + j] = distance;
        self.data[j * self.size + i] = distance;
    }
}

impl HnswGraph {
    /// Store `node` and add backward links from each of its neighbors.
    pub(crate) fn link_node(&mut self, node: GraphNode) -> Result<()> {
        let key = node.key();
        let forward: Vec<(usize, Vec<ObjectKey>)> =
            (0..=node.layer()).map(|layer| (layer, node.neighbors(layer).to_vec())).collect();

        self.nodes.put(node);

        for (layer, neighbors) in forward {
            for neighbor in neighbors {
                self.add_backward_link_with_pruning(neighbor, key, layer)?;
            }
        }
        Ok(())
    }

    /// Add `new_node` to `neighbor`'s list at `layer`, pruning if full.
    pub(crate) fn add_backward_link_with_pruning(
        &mut self,
        neighbor: ObjectKey,
        new_node: ObjectKey,
        layer: usize,
    ) -> Result<()> {
        let max_neighbors = self.params.max_neighbors(layer);

        let Some(record) = self.nodes.get(neighbor) else {
            return Err(Error::corrupted(format!("backward link to missing node {neighbor}")));
        };
        if record.layer() < layer || record.neighbors(layer).contains(&new_node) {
            return Ok(());
        }

        if record.neighbor_count(layer) < max_neighbors {
            if let Some(record) = self.nodes.get_mut(neighbor) {
                record.add_neighbor(layer, new_node);
            }
            return Ok(());
        }

        // Full: re-select among current neighbors plus the new node
        let base = record.vector().to_vec();
        let mut candidates = record
            .neighbors(layer)
            .iter()
            .chain(std::iter::once(&new_node))
            .map(|&key| Ok(Candidate { key, distance: self.distance_to(&base, key)? }))
            .collect::<Result<Vec<_>>>()?;
        candidates.sort();

        let selected = self.select_neighbors_heuristic(&candidates, max_neighbors, Some(new_node))?;
        if let Some(record) = self.nodes.get_mut(neighbor) {
            record.set_neighbors(layer, &selected);
        }
        Ok(())
    }

    /// Pick up to `max_count` diverse neighbors from `candidates`.
    ///
    /// `candidates` must be sorted ascending by distance to the base vector.
    /// A candidate is kept only if it is closer to the base than to every
    /// neighbor already kept. If that leaves fewer than `max_count / 2`
    /// neighbors, the nearest remaining candidates fill the gap. A
    /// `priority` candidate that ranks within the nearest `max_count` is
    /// always kept, displacing the last selection if needed.
    pub(crate) fn select_neighbors_heuristic(
        &self,
        candidates: &[Candidate],
        max_count: usize,
        priority: Option<ObjectKey>,
    ) -> Result<Vec<ObjectKey>> {
        if candidates.len() <= max_count {
            return Ok(candidates.iter().map(|c| c.key).collect());
        }

        let vectors = candidates
            .iter()
            .map(|c| {
                self.nodes
                    .get(c.key)
                    .map(GraphNode::vector)
                    .ok_or_else(|| Error::corrupted(format!("candidate {} has no node", c.key)))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut cache = DistanceCache::new(candidates.len());

        let mut selected: Vec<usize> = Vec::with_capacity(max_count);
        for (i, candidate) in candidates.iter().enumerate() {
            if selected.len() >= max_count {
                break;
            }

            let mut diverse = true;
            for &j in &selected {
                let between = match cache.get(i, j) {
                    Some(d) => d,
                    None => {
                        let d = self.metric.distance(vectors[i], vectors[j])?;
                        cache.set(i, j, d);
                        d
                    }
                };
                if between < candidate.distance {
                    diverse = false;
                    break;
                }
            }

            if diverse {
                selected.push(i);
            }
        }

        // Starvation fallback
        if selected.len() < max_count / 2 {
            for i in 0..candidates.len() {
                if selected.len() >= max_count {
                    break;
                }
                if !selected.contains(&i) {
                    selected.push(i);
                }
            }
        }

        let mut keys: Vec<ObjectKey> = selected.into_iter().map(|i| candidates[i].key).collect();

        if let Some(priority) = priority
            && !keys.contains(&priority)
            && candidates.iter().position(|c| c.key == priority).is_some_and(|pos| pos < max_count)
        {
            if keys.len() >= max_count {
                keys.pop();
            }
            keys.push(priority);
        }

        Ok(keys)
    }

    /// Strip `removed` from every list that references it, then reconnect
    /// the nodes that lost an edge.
    ///
    /// Inbound references are found by scanning the whole store, so each
    /// removal is O(n) and bulk deletion is O(n²).
    pub(crate) fn unlink_node(&mut self, removed: &GraphNode) -> Result<()> {
        let key = removed.key();
        let top = removed.layer();

        let mut referrers: Vec<Vec<ObjectKey>> = vec![Vec::new(); top + 1];
        for node in self.nodes.iter() {
            for (layer, found) in referrers.iter_mut().enumerate().take(node.layer().min(top) + 1) {
                if node.neighbors(layer).contains(&key) {
                    found.push(node.key());
                }
            }
        }

        for (layer, keys) in referrers.iter().enumerate() {
            for &referrer in keys {
                if let Some(node) = self.nodes.get_mut(referrer) {
                    node.remove_neighbor(layer, key);
                }
            }
        }

        for (layer, keys) in referrers.iter().enumerate() {
            let pool: Vec<ObjectKey> =
                removed.neighbors(layer).iter().copied().filter(|&n| self.nodes.contains(n)).collect();
            let orphans: BTreeSet<ObjectKey> = keys.iter().chain(pool.iter()).copied().collect();

            for orphan in orphans {
                self.bridge(orphan, &pool, layer)?;
            }
        }

        tracing::trace!(key = %key, layer = top, "unlinked node");
        Ok(())
    }

    /// Reconnect `orphan` to the nearest members of `pool` it is not yet
    /// linked to, while it has room. Each new edge is mirrored through
    /// [`HnswGraph::add_backward_link_with_pruning`]. An orphan already at
    /// capacity still gains a backward link from its nearest pool member.
    fn bridge(&mut self, orphan: ObjectKey, pool: &[ObjectKey], layer: usize) -> Result<()> {
        let max_neighbors = self.params.max_neighbors(layer);

        let Some(node) = self.nodes.get(orphan) else {
            return Ok(());
        };
        if node.layer() < layer {
            return Ok(());
        }

        let base = node.vector().to_vec();
        let linked = node.neighbors(layer).to_vec();
        let mut candidates = pool
            .iter()
            .filter(|&&k| k != orphan)
            .map(|&key| Ok(Candidate { key, distance: self.distance_to(&base, key)? }))
            .collect::<Result<Vec<_>>>()?;
        candidates.sort();

        let mut room = max_neighbors.saturating_sub(linked.len());
        let mut mirrored = false;
        for candidate in candidates {
            if room == 0 && mirrored {
                break;
            }
            if room > 0 && !linked.contains(&candidate.key) {
                if let Some(node) = self.nodes.get_mut(orphan)
                    && node.add_neighbor(layer, candidate.key)
                {
                    room -= 1;
                }
            } else if mirrored {
                continue;
            }

            self.add_backward_link_with_pruning(candidate.key, orphan, layer)?;
            mirrored = true;
        }
        Ok(())
    }
}
