use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::model::EdgeKey;

/// What one mutation pass touched. Drives incremental re-indexing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added_updated_nodes: BTreeSet<String>,
    pub added_updated_edges: BTreeSet<EdgeKey>,
    pub removed_nodes: BTreeSet<String>,
    pub removed_edges: BTreeSet<EdgeKey>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch_node(&mut self, name: &str) {
        self.removed_nodes.remove(name);
        self.added_updated_nodes.insert(name.to_string());
    }

    pub fn touch_edge(&mut self, key: EdgeKey) {
        self.removed_edges.remove(&key);
        self.added_updated_edges.insert(key);
    }

    pub fn remove_node(&mut self, name: &str) {
        self.added_updated_nodes.remove(name);
        self.removed_nodes.insert(name.to_string());
    }

    pub fn remove_edge(&mut self, key: EdgeKey) {
        self.added_updated_edges.remove(&key);
        self.removed_edges.insert(key);
    }

    /// Folds a later pass into this one. Later removals cancel earlier
    /// additions and vice versa.
    pub fn absorb(&mut self, later: ChangeSet) {
        for name in later.removed_nodes {
            self.remove_node(&name);
        }
        for key in later.removed_edges {
            self.remove_edge(key);
        }
        for name in later.added_updated_nodes {
            self.touch_node(&name);
        }
        for key in later.added_updated_edges {
            self.touch_edge(key);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added_updated_nodes.is_empty()
            && self.added_updated_edges.is_empty()
            && self.removed_nodes.is_empty()
            && self.removed_edges.is_empty()
    }

    /// Added/updated node names plus the endpoints of added/updated edges.
    pub fn touched_names(&self) -> BTreeSet<String> {
        let mut names = self.added_updated_nodes.clone();
        for key in &self.added_updated_edges {
            names.insert(key.first().to_string());
            names.insert(key.second().to_string());
        }
        names
    }
}
