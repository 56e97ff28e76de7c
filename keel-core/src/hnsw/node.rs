//! Graph node records.
//!
//! A node exists for every indexed object. It owns a copy of the object's
//! vector and one neighbor list per layer it participates in, from layer 0
//! up to its assigned layer. Neighbor lists hold object keys, never object
//! handles, and contain no duplicates or self-links.
//!
//! # Record Layout
//!
//! ```text
//! Field         Encoding
//! -----         --------
//! key           u64
//! vector        u64 length + length * f32
//! layer_count   u8 (assigned layer + 1)
//! neighbors     layer_count * (u64 length + length * u64 key)
//! ```

use anyhow::{Result, bail};

use crate::persist::codec::{ByteReader, ByteWriter};
use crate::store::ObjectKey;

/// Maximum number of layers in a graph. Layer draws are capped below this.
pub const MAX_LAYERS: usize = 16;

/// One indexed vector and its per-layer adjacency.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    key: ObjectKey,
    vector: Vec<f32>,
    neighbors: Vec<Vec<ObjectKey>>,
}

impl GraphNode {
    /// Create a node at `layer` with empty neighbor lists.
    #[must_use]
    pub fn new(key: ObjectKey, vector: Vec<f32>, layer: usize) -> Self {
        debug_assert!(layer < MAX_LAYERS, "layer {layer} exceeds cap");
        Self { key, vector, neighbors: vec![Vec::new(); layer + 1] }
    }

    /// Key of the owning object.
    #[must_use]
    pub const fn key(&self) -> ObjectKey {
        self.key
    }

    /// The indexed vector.
    #[must_use]
    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    /// Highest layer this node belongs to.
    #[must_use]
    pub fn layer(&self) -> usize {
        self.neighbors.len().saturating_sub(1)
    }

    /// Neighbors at `layer`; empty above the node's own layer.
    #[must_use]
    pub fn neighbors(&self, layer: usize) -> &[ObjectKey] {
        self.neighbors.get(layer).map_or(&[], Vec::as_slice)
    }

    /// Number of neighbors at `layer`.
    #[must_use]
    pub fn neighbor_count(&self, layer: usize) -> usize {
        self.neighbors(layer).len()
    }

    /// Replace the neighbor list at `layer`. Self-links and duplicates are dropped.
    pub fn set_neighbors(&mut self, layer: usize, neighbors: &[ObjectKey]) {
        let own = self.key;
        if let Some(slot) = self.neighbors.get_mut(layer) {
            slot.clear();
            for &n in neighbors {
                if n != own && !slot.contains(&n) {
                    slot.push(n);
                }
            }
        }
    }

    /// Append a neighbor at `layer`.
    ///
    /// Returns `false` if the neighbor was already present, is the node
    /// itself, or the node does not reach `layer`.
    pub fn add_neighbor(&mut self, layer: usize, neighbor: ObjectKey) -> bool {
        if neighbor == self.key {
            return false;
        }
        match self.neighbors.get_mut(layer) {
            Some(slot) if !slot.contains(&neighbor) => {
                slot.push(neighbor);
                true
            }
            _ => false,
        }
    }

    /// Remove a neighbor at `layer`, preserving the order of the rest.
    pub fn remove_neighbor(&mut self, layer: usize, neighbor: ObjectKey) -> bool {
        let Some(slot) = self.neighbors.get_mut(layer) else {
            return false;
        };
        let before = slot.len();
        slot.retain(|&n| n != neighbor);
        slot.len() != before
    }

    /// Append this record to a payload.
    pub(crate) fn encode(&self, w: &mut ByteWriter) {
        w.put_u64(self.key.as_u64());
        w.put_f32_slice(&self.vector);
        #[allow(clippy::cast_possible_truncation)] // bounded by MAX_LAYERS
        w.put_u8(self.neighbors.len() as u8);
        for layer in &self.neighbors {
            w.put_len(layer.len());
            for n in layer {
                w.put_u64(n.as_u64());
            }
        }
    }

    /// Read a record written by [`GraphNode::encode`].
    pub(crate) fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let key = ObjectKey(r.get_u64()?);
        let vector = r.get_f32_vec()?;
        let layer_count = usize::from(r.get_u8()?);

        if layer_count == 0 || layer_count > MAX_LAYERS {
            bail!("node {key}: invalid layer count {layer_count}");
        }

        let mut neighbors = Vec::with_capacity(layer_count);
        for _ in 0..layer_count {
            let len = r.get_len(8)?;
            let mut layer = Vec::with_capacity(len);
            for _ in 0..len {
                layer.push(ObjectKey(r.get_u64()?));
            }
            neighbors.push(layer);
        }

        Ok(Self { key, vector, neighbors })
    }
}
