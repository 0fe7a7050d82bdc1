use graph::KnowledgeGraph;
use petgraph::graph::{NodeIndex, UnGraph};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Weighted undirected projection of a KnowledgeGraph, nodes labelled by
/// entity name. Self-loops are left out.
#[derive(Debug, Clone)]
pub struct GraphData {
    pub graph: UnGraph<String, f64>,
    pub entity_to_idx: HashMap<String, NodeIndex>,
}

impl GraphData {
    pub fn export(source: &KnowledgeGraph) -> Self {
        let mut graph = UnGraph::with_capacity(source.node_count(), source.edge_count());
        let mut entity_to_idx = HashMap::new();

        for name in source.node_names() {
            let idx = graph.add_node(name.to_string());
            entity_to_idx.insert(name.to_string(), idx);
        }
        for (key, edge) in source.edges() {
            if key.is_self_loop() {
                continue;
            }
            if let (Some(&a), Some(&b)) = (entity_to_idx.get(key.first()), entity_to_idx.get(key.second())) {
                graph.add_edge(a, b, edge.weight.max(0.0));
            }
        }

        Self { graph, entity_to_idx }
    }

    pub fn entity_count(&self) -> usize {
        self.graph.node_count()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EntityInfo {
    pub name: String,
    pub entity_type: String,
    pub description: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RelationInfo {
    pub source: String,
    pub target: String,
    pub description: String,
}

/// Member entities for a report prompt, highest PageRank first.
pub fn community_entities(source: &KnowledgeGraph, members: &[String], limit: usize) -> Vec<EntityInfo> {
    let mut nodes: Vec<_> = members.iter().filter_map(|name| source.node(name)).collect();
    nodes.sort_by(|a, b| b.pagerank.partial_cmp(&a.pagerank).unwrap_or(Ordering::Equal));
    nodes
        .into_iter()
        .take(limit)
        .map(|node| EntityInfo {
            name: node.name.clone(),
            entity_type: node.entity_type.clone(),
            description: node.description_text(),
        })
        .collect()
}

/// Relations with both endpoints inside the community, heaviest first.
pub fn community_relations(source: &KnowledgeGraph, members: &[String], limit: usize) -> Vec<RelationInfo> {
    let inside: BTreeSet<&str> = members.iter().map(String::as_str).collect();
    let mut edges: Vec<_> = source
        .edges()
        .filter(|(key, _)| inside.contains(key.first()) && inside.contains(key.second()))
        .map(|(_, edge)| edge)
        .collect();
    edges.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(Ordering::Equal));
    edges
        .into_iter()
        .take(limit)
        .map(|edge| RelationInfo {
            source: edge.src.clone(),
            target: edge.tgt.clone(),
            description: edge.description_text(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph::{Edge, Node};

    #[test]
    fn test_export_skips_self_loops() {
        let mut source = KnowledgeGraph::new();
        for name in ["A", "B"] {
            source.insert_node(Node::new(name, "T", "", "doc1"));
        }
        source.insert_edge(Edge::new("A", "B", "ab", 2.0, "doc1"));
        source.insert_edge(Edge::new("A", "A", "self", 1.0, "doc1"));

        let data = GraphData::export(&source);
        assert_eq!(data.entity_count(), 2);
        assert_eq!(data.graph.edge_count(), 1);

        let relations = community_relations(&source, &["A".to_string(), "B".to_string()], 10);
        assert_eq!(relations.len(), 2);
    }
}
