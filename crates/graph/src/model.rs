use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Placeholder for entities the extractor could not type.
pub const UNKNOWN_TYPE: &str = "UNKNOWN";

/// Unordered endpoint pair. `EdgeKey::new("b", "a") == EdgeKey::new("a", "b")`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey(String, String);

impl EdgeKey {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        if a <= b { Self(a, b) } else { Self(b, a) }
    }

    pub fn first(&self) -> &str {
        &self.0
    }

    pub fn second(&self) -> &str {
        &self.1
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0 == name || self.1 == name
    }

    /// The endpoint opposite to `name`, if `name` is an endpoint.
    pub fn other(&self, name: &str) -> Option<&str> {
        if self.0 == name {
            Some(&self.1)
        } else if self.1 == name {
            Some(&self.0)
        } else {
            None
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.0 == self.1
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.0, self.1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub entity_type: String,
    pub description: Vec<String>,
    pub source_id: BTreeSet<String>,
    #[serde(default)]
    pub pagerank: f64,
    /// Names folded into this node by entity resolution.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub aliases: BTreeSet<String>,
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        description: impl Into<String>,
        document_id: impl Into<String>,
    ) -> Self {
        let entity_type = entity_type.into();
        let entity_type = if entity_type.trim().is_empty() {
            UNKNOWN_TYPE.to_string()
        } else {
            entity_type
        };

        Self {
            name: name.into(),
            entity_type,
            description: vec![description.into()],
            source_id: BTreeSet::from([document_id.into()]),
            pagerank: 0.0,
            aliases: BTreeSet::new(),
        }
    }

    pub fn description_text(&self) -> String {
        self.description.join("\n")
    }

    /// True if `name` is this node's name or one of its aliases.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.contains(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub src: String,
    pub tgt: String,
    pub description: Vec<String>,
    pub source_id: BTreeSet<String>,
    pub weight: f64,
}

impl Edge {
    pub fn new(
        src: impl Into<String>,
        tgt: impl Into<String>,
        description: impl Into<String>,
        weight: f64,
        document_id: impl Into<String>,
    ) -> Self {
        Self {
            src: src.into(),
            tgt: tgt.into(),
            description: vec![description.into()],
            source_id: BTreeSet::from([document_id.into()]),
            weight,
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.src.clone(), self.tgt.clone())
    }

    pub fn description_text(&self) -> String {
        self.description.join("\n")
    }
}

/// Typed entity/relation graph. One per knowledge base once merged, or one per
/// document while it is still a subgraph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "GraphSnapshot", into = "GraphSnapshot")]
pub struct KnowledgeGraph {
    nodes: BTreeMap<String, Node>,
    edges: BTreeMap<EdgeKey, Edge>,
    source_id: BTreeSet<String>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.get_mut(name)
    }

    /// Looks a name up directly, then through resolution aliases.
    pub fn resolve(&self, name: &str) -> Option<&Node> {
        self.nodes
            .get(name)
            .or_else(|| self.nodes.values().find(|n| n.aliases.contains(name)))
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn edge(&self, a: &str, b: &str) -> Option<&Edge> {
        self.edges.get(&EdgeKey::new(a, b))
    }

    pub fn edge_by_key(&self, key: &EdgeKey) -> Option<&Edge> {
        self.edges.get(key)
    }

    pub fn edges(&self) -> impl Iterator<Item = (&EdgeKey, &Edge)> {
        self.edges.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn source_ids(&self) -> &BTreeSet<String> {
        &self.source_id
    }

    pub fn add_source(&mut self, document_id: impl Into<String>) {
        self.source_id.insert(document_id.into());
    }

    /// Inserts or replaces a node without merging.
    pub fn insert_node(&mut self, node: Node) {
        self.nodes.insert(node.name.clone(), node);
    }

    /// Inserts or replaces an edge without merging.
    pub fn insert_edge(&mut self, edge: Edge) {
        self.edges.insert(edge.key(), edge);
    }

    pub fn remove_edge(&mut self, key: &EdgeKey) -> Option<Edge> {
        self.edges.remove(key)
    }

    /// Removes a node and every incident edge. Returns the node and the keys
    /// of the edges that went with it.
    pub fn remove_node(&mut self, name: &str) -> Option<(Node, Vec<EdgeKey>)> {
        let node = self.nodes.remove(name)?;
        let incident: Vec<EdgeKey> = self
            .edges
            .keys()
            .filter(|k| k.contains(name))
            .cloned()
            .collect();
        for key in &incident {
            self.edges.remove(key);
        }
        Some((node, incident))
    }

    pub fn incident_edges(&self, name: &str) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|(k, _)| k.contains(name))
            .map(|(_, e)| e)
            .collect()
    }

    /// Distinct neighbour names, self excluded.
    pub fn neighbors(&self, name: &str) -> BTreeSet<&str> {
        self.edges
            .keys()
            .filter_map(|k| k.other(name))
            .filter(|other| *other != name)
            .collect()
    }

    /// name -> [(neighbour, weight)], built once for whole-graph passes.
    pub fn adjacency(&self) -> BTreeMap<&str, Vec<(&str, f64)>> {
        let mut adj: BTreeMap<&str, Vec<(&str, f64)>> =
            self.nodes.keys().map(|n| (n.as_str(), Vec::new())).collect();

        for (key, edge) in &self.edges {
            let (a, b) = (key.first(), key.second());
            if !adj.contains_key(a) || !adj.contains_key(b) {
                continue;
            }
            if let Some(list) = adj.get_mut(a) {
                list.push((b, edge.weight));
            }
            if a != b {
                if let Some(list) = adj.get_mut(b) {
                    list.push((a, edge.weight));
                }
            }
        }

        adj
    }

    /// Keys of edges with an endpoint that is not a node.
    pub fn dangling_edges(&self) -> Vec<EdgeKey> {
        self.edges
            .keys()
            .filter(|k| !self.nodes.contains_key(k.first()) || !self.nodes.contains_key(k.second()))
            .cloned()
            .collect()
    }
}

/// Wire shape of a KnowledgeGraph: flat node and edge lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub source_id: Vec<String>,
}

impl From<GraphSnapshot> for KnowledgeGraph {
    fn from(snapshot: GraphSnapshot) -> Self {
        let mut graph = KnowledgeGraph::new();
        for node in snapshot.nodes {
            graph.insert_node(node);
        }
        for edge in snapshot.edges {
            graph.insert_edge(edge);
        }
        graph.source_id = snapshot.source_id.into_iter().collect();
        graph
    }
}

impl From<KnowledgeGraph> for GraphSnapshot {
    fn from(graph: KnowledgeGraph) -> Self {
        Self {
            nodes: graph.nodes.into_values().collect(),
            edges: graph.edges.into_values().collect(),
            source_id: graph.source_id.into_iter().collect(),
        }
    }
}

/// Local graph built from one document, before it is merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subgraph {
    pub document_id: String,
    pub graph: KnowledgeGraph,
    /// Relations dropped because an endpoint was not an extracted entity.
    #[serde(default)]
    pub ignored_relations: usize,
}

impl Subgraph {
    pub fn new(document_id: impl Into<String>) -> Self {
        let document_id = document_id.into();
        let mut graph = KnowledgeGraph::new();
        graph.add_source(document_id.clone());
        Self {
            document_id,
            graph,
            ignored_relations: 0,
        }
    }
}
