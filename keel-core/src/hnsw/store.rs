//! Keyed node storage for one graph.
//!
//! Nodes are addressed by the owning object's key. While a write scope is
//! open the store records the first before-image of every key it touches,
//! so a rollback restores exactly the committed nodes.

use std::collections::BTreeMap;

use crate::hnsw::node::GraphNode;
use crate::store::ObjectKey;

/// Journaled node map. Iteration is in ascending key order.
#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    nodes: BTreeMap<ObjectKey, GraphNode>,
    journal: Option<BTreeMap<ObjectKey, Option<GraphNode>>>,
}

impl NodeStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a node.
    #[must_use]
    pub fn get(&self, key: ObjectKey) -> Option<&GraphNode> {
        self.nodes.get(&key)
    }

    /// Whether a node exists for `key`.
    #[must_use]
    pub fn contains(&self, key: ObjectKey) -> bool {
        self.nodes.contains_key(&key)
    }

    /// Mutable access to a node, journaling its before-image.
    pub fn get_mut(&mut self, key: ObjectKey) -> Option<&mut GraphNode> {
        self.record(key);
        self.nodes.get_mut(&key)
    }

    /// Insert or replace a node.
    pub fn put(&mut self, node: GraphNode) {
        let key = node.key();
        self.record(key);
        self.nodes.insert(key, node);
    }

    /// Remove a node, returning it.
    pub fn remove(&mut self, key: ObjectKey) -> Option<GraphNode> {
        self.record(key);
        self.nodes.remove(&key)
    }

    /// Visit every node in key order.
    pub fn for_each(&self, mut visit: impl FnMut(&GraphNode)) {
        self.nodes.values().for_each(|node| visit(node));
    }

    /// Iterate over nodes in key order.
    pub fn iter(&self) -> impl Iterator<Item = &GraphNode> + '_ {
        self.nodes.values()
    }

    /// Number of stored nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Start journaling.
    pub fn begin(&mut self) {
        self.journal = Some(BTreeMap::new());
    }

    /// Stop journaling and keep all changes.
    pub fn commit(&mut self) {
        self.journal = None;
    }

    /// Stop journaling and restore all before-images.
    pub fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        for (key, before) in journal {
            match before {
                Some(node) => {
                    self.nodes.insert(key, node);
                }
                None => {
                    self.nodes.remove(&key);
                }
            }
        }
    }

    fn record(&mut self, key: ObjectKey) {
        if let Some(journal) = self.journal.as_mut() {
            journal.entry(key).or_insert_with(|| self.nodes.get(&key).cloned());
        }
    }
}
