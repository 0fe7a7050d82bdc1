//! Same-name / same-pair merge algebra for knowledge graphs.
//!
//! Merging is a union: source_id sets are unioned, description lists are
//! combined through a [`DescriptionPolicy`], edge weights take the max. Every
//! touched name or pair is written into the caller's [`ChangeSet`].

use crate::change::ChangeSet;
use crate::model::{Edge, KnowledgeGraph, Node, UNKNOWN_TYPE};

/// How two description lists are combined when nodes or edges merge.
pub trait DescriptionPolicy: Send + Sync {
    fn merge(&self, existing: &mut Vec<String>, incoming: &[String]);
}

/// Keeps every distinct description in first-seen order.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendDistinct;

impl DescriptionPolicy for AppendDistinct {
    /// An empty entry is a placeholder and gives way to any real description.
    fn merge(&self, existing: &mut Vec<String>, incoming: &[String]) {
        for description in incoming {
            if description.is_empty() {
                if existing.is_empty() {
                    existing.push(String::new());
                }
                continue;
            }
            existing.retain(|d| !d.is_empty());
            if !existing.iter().any(|d| d == description) {
                existing.push(description.clone());
            }
        }
    }
}

impl KnowledgeGraph {
    pub fn merge_node(&mut self, incoming: Node, policy: &dyn DescriptionPolicy, changes: &mut ChangeSet) {
        changes.touch_node(&incoming.name);

        match self.node_mut(&incoming.name) {
            Some(existing) => {
                if existing.entity_type == UNKNOWN_TYPE && incoming.entity_type != UNKNOWN_TYPE {
                    existing.entity_type = incoming.entity_type;
                }
                policy.merge(&mut existing.description, &incoming.description);
                existing.source_id.extend(incoming.source_id);
                existing.aliases.extend(incoming.aliases);
            }
            None => self.insert_node(incoming),
        }
    }

    pub fn merge_edge(&mut self, incoming: Edge, policy: &dyn DescriptionPolicy, changes: &mut ChangeSet) {
        let key = incoming.key();
        changes.touch_edge(key.clone());

        match self.edge_by_key(&key).cloned() {
            Some(mut existing) => {
                policy.merge(&mut existing.description, &incoming.description);
                existing.source_id.extend(incoming.source_id);
                existing.weight = existing.weight.max(incoming.weight);
                self.insert_edge(existing);
            }
            None => self.insert_edge(incoming),
        }
    }

    /// Merges every node, edge and graph-level source of `other` into `self`.
    pub fn merge_graph(&mut self, other: &KnowledgeGraph, policy: &dyn DescriptionPolicy, changes: &mut ChangeSet) {
        for node in other.nodes() {
            self.merge_node(node.clone(), policy, changes);
        }
        for (_, edge) in other.edges() {
            self.merge_edge(edge.clone(), policy, changes);
        }
        for source in other.source_ids() {
            self.add_source(source.clone());
        }
    }

    /// Folds node `from` into node `into`: descriptions, sources and aliases
    /// move to the survivor, incident edges are re-pointed, and `from` becomes
    /// an alias of `into`. An edge between the two disappears.
    ///
    /// Returns false if either node is missing or they are the same node.
    pub fn fold_node(
        &mut self,
        from: &str,
        into: &str,
        policy: &dyn DescriptionPolicy,
        changes: &mut ChangeSet,
    ) -> bool {
        if from == into || !self.contains_node(into) {
            return false;
        }
        let incident: Vec<Edge> = self.incident_edges(from).into_iter().cloned().collect();
        let Some((mut folded, removed_keys)) = self.remove_node(from) else {
            return false;
        };
        changes.remove_node(from);
        for key in removed_keys {
            changes.remove_edge(key);
        }

        folded.aliases.insert(folded.name.clone());
        folded.name = into.to_string();
        self.merge_node(folded, policy, changes);

        for mut edge in incident {
            if edge.src == from {
                edge.src = into.to_string();
            }
            if edge.tgt == from {
                edge.tgt = into.to_string();
            }
            if edge.key().is_self_loop() && edge.src == into {
                continue;
            }
            self.merge_edge(edge, policy, changes);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EdgeKey;
    use std::collections::BTreeSet;

    fn doc_graph(doc: &str, names: &[&str], edges: &[(&str, &str, f64)]) -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new();
        for name in names {
            graph.insert_node(Node::new(*name, "T", format!("{name} in {doc}"), doc));
        }
        for (a, b, w) in edges {
            graph.insert_edge(Edge::new(*a, *b, format!("{a}-{b} in {doc}"), *w, doc));
        }
        graph.add_source(doc);
        graph
    }

    fn sources(graph: &KnowledgeGraph) -> Vec<(String, BTreeSet<String>)> {
        graph.nodes().map(|n| (n.name.clone(), n.source_id.clone())).collect()
    }

    #[test]
    fn test_merge_unions_sources_and_appends_descriptions() {
        let mut shared = doc_graph("doc1", &["Paris"], &[]);
        let incoming = doc_graph("doc2", &["Paris"], &[]);
        let mut changes = ChangeSet::new();

        shared.merge_graph(&incoming, &AppendDistinct, &mut changes);

        let paris = shared.node("Paris").unwrap();
        assert_eq!(paris.source_id.len(), 2);
        assert_eq!(paris.description, vec!["Paris in doc1", "Paris in doc2"]);
        assert!(changes.added_updated_nodes.contains("Paris"));
    }

    #[test]
    fn test_placeholder_description_gives_way() {
        let mut description = vec![String::new()];
        AppendDistinct.merge(&mut description, &["a port".to_string()]);
        assert_eq!(description, vec!["a port"]);

        AppendDistinct.merge(&mut description, &[String::new()]);
        assert_eq!(description, vec!["a port"]);
    }

    #[test]
    fn test_edge_merge_keeps_max_weight() {
        let mut shared = doc_graph("doc1", &["A", "B"], &[("A", "B", 3.0)]);
        let incoming = doc_graph("doc2", &["A", "B"], &[("B", "A", 7.0)]);
        let mut changes = ChangeSet::new();

        shared.merge_graph(&incoming, &AppendDistinct, &mut changes);

        let edge = shared.edge("A", "B").unwrap();
        assert_eq!(edge.weight, 7.0);
        assert_eq!(edge.description.len(), 2);
        assert!(changes.added_updated_edges.contains(&EdgeKey::new("A", "B")));
    }

    #[test]
    fn test_source_union_is_order_independent() {
        let a = doc_graph("A", &["X", "Y"], &[("X", "Y", 1.0)]);
        let b = doc_graph("B", &["X"], &[]);
        let c = doc_graph("C", &["Y", "Z"], &[("Y", "Z", 1.0)]);

        let mut batched = KnowledgeGraph::new();
        let mut changes = ChangeSet::new();
        let mut ab = a.clone();
        ab.merge_graph(&b, &AppendDistinct, &mut changes);
        batched.merge_graph(&ab, &AppendDistinct, &mut changes);
        batched.merge_graph(&c, &AppendDistinct, &mut changes);

        let mut reversed = KnowledgeGraph::new();
        for g in [&c, &b, &a] {
            reversed.merge_graph(g, &AppendDistinct, &mut changes);
        }

        assert_eq!(sources(&batched), sources(&reversed));
        assert_eq!(batched.source_ids(), reversed.source_ids());
    }

    #[test]
    fn test_fold_node_repoints_edges_and_records_alias() {
        let mut graph = doc_graph("doc1", &["NYC", "New York City", "USA"], &[("NYC", "USA", 2.0)]);
        graph.insert_edge(Edge::new("NYC", "New York City", "same", 1.0, "doc1"));
        let mut changes = ChangeSet::new();

        assert!(graph.fold_node("NYC", "New York City", &AppendDistinct, &mut changes));

        assert!(!graph.contains_node("NYC"));
        assert!(graph.edge("New York City", "USA").is_some());
        assert!(graph.edge("NYC", "New York City").is_none());
        assert!(changes.removed_nodes.contains("NYC"));
        assert!(changes.removed_edges.contains(&EdgeKey::new("NYC", "USA")));
        assert_eq!(graph.resolve("NYC").unwrap().name, "New York City");
    }
}
