//! Wire shapes of everything written to the document/index store.

use graph::{Edge, EdgeKey, KnowledgeGraph, NHopPath, Node, Subgraph};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const GRAPH_RECORD_ID: &str = "graph";
pub const TYPE_SAMPLES_RECORD_ID: &str = "type_samples";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Entity,
    Relation,
    Graph,
    Subgraph,
    CommunityReport,
    TypeSamples,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    pub kb_id: String,
    #[serde(flatten)]
    pub body: RecordBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordBody {
    Entity(EntityRecord),
    Relation(RelationRecord),
    Graph(GraphRecord),
    Subgraph(SubgraphRecord),
    CommunityReport(CommunityReport),
    TypeSamples(TypeSamplesRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub name: String,
    pub entity_type: String,
    pub description: String,
    pub source_id: Vec<String>,
    pub pagerank: f64,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Weighted paths cached at persist time for query-time expansion.
    #[serde(default)]
    pub n_hop: Vec<NHopPath>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRecord {
    pub src: String,
    pub tgt: String,
    pub description: String,
    pub source_id: Vec<String>,
    pub weight: f64,
}

impl RelationRecord {
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.src.clone(), self.tgt.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRecord {
    pub graph: KnowledgeGraph,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubgraphRecord {
    pub document_id: String,
    pub subgraph: Subgraph,
    /// False until the subgraph has been folded into the shared graph.
    pub merged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityReport {
    pub title: String,
    pub report_text: String,
    pub evidences: String,
    pub weight: f64,
    pub member_entity_names: Vec<String>,
    pub source_id: Vec<String>,
    #[serde(default)]
    pub rating: f64,
}

/// entity_type -> sample entity names, highest PageRank first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeSamplesRecord {
    pub samples: BTreeMap<String, Vec<String>>,
}

impl IndexRecord {
    pub fn kind(&self) -> RecordKind {
        match &self.body {
            RecordBody::Entity(_) => RecordKind::Entity,
            RecordBody::Relation(_) => RecordKind::Relation,
            RecordBody::Graph(_) => RecordKind::Graph,
            RecordBody::Subgraph(_) => RecordKind::Subgraph,
            RecordBody::CommunityReport(_) => RecordKind::CommunityReport,
            RecordBody::TypeSamples(_) => RecordKind::TypeSamples,
        }
    }

    /// Text the store embeds for similarity search, if the record is searchable.
    pub fn embedding_text(&self) -> Option<String> {
        match &self.body {
            RecordBody::Entity(e) => Some(e.name.clone()),
            RecordBody::Relation(r) => Some(format!("{}->{}: {}", r.src, r.tgt, r.description)),
            _ => None,
        }
    }

    pub fn entity(kb_id: &str, node: &Node, n_hop: Vec<NHopPath>) -> Self {
        Self {
            id: entity_record_id(&node.name),
            kb_id: kb_id.to_string(),
            body: RecordBody::Entity(EntityRecord {
                name: node.name.clone(),
                entity_type: node.entity_type.clone(),
                description: node.description_text(),
                source_id: node.source_id.iter().cloned().collect(),
                pagerank: node.pagerank,
                aliases: node.aliases.iter().cloned().collect(),
                n_hop,
            }),
        }
    }

    pub fn relation(kb_id: &str, edge: &Edge) -> Self {
        Self {
            id: relation_record_id(&edge.key()),
            kb_id: kb_id.to_string(),
            body: RecordBody::Relation(RelationRecord {
                src: edge.src.clone(),
                tgt: edge.tgt.clone(),
                description: edge.description_text(),
                source_id: edge.source_id.iter().cloned().collect(),
                weight: edge.weight,
            }),
        }
    }

    pub fn graph(kb_id: &str, graph: &KnowledgeGraph) -> Self {
        Self {
            id: GRAPH_RECORD_ID.to_string(),
            kb_id: kb_id.to_string(),
            body: RecordBody::Graph(GraphRecord { graph: graph.clone() }),
        }
    }

    pub fn subgraph(kb_id: &str, subgraph: &Subgraph, merged: bool) -> Self {
        Self {
            id: subgraph_record_id(&subgraph.document_id),
            kb_id: kb_id.to_string(),
            body: RecordBody::Subgraph(SubgraphRecord {
                document_id: subgraph.document_id.clone(),
                subgraph: subgraph.clone(),
                merged,
            }),
        }
    }

    pub fn community_report(kb_id: &str, ordinal: usize, report: CommunityReport) -> Self {
        Self {
            id: format!("community:{ordinal}"),
            kb_id: kb_id.to_string(),
            body: RecordBody::CommunityReport(report),
        }
    }

    pub fn type_samples(kb_id: &str, samples: TypeSamplesRecord) -> Self {
        Self {
            id: TYPE_SAMPLES_RECORD_ID.to_string(),
            kb_id: kb_id.to_string(),
            body: RecordBody::TypeSamples(samples),
        }
    }
}

fn hashed(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    for part in parts {
        hasher.update([0u8]);
        hasher.update(part.as_bytes());
    }
    format!("{prefix}:{}", hex::encode(&hasher.finalize()[..12]))
}

pub fn entity_record_id(name: &str) -> String {
    hashed("entity", &[name])
}

pub fn relation_record_id(key: &EdgeKey) -> String {
    hashed("relation", &[key.first(), key.second()])
}

pub fn subgraph_record_id(document_id: &str) -> String {
    format!("subgraph:{document_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_id_ignores_direction() {
        assert_eq!(
            relation_record_id(&EdgeKey::new("Paris", "France")),
            relation_record_id(&EdgeKey::new("France", "Paris"))
        );
        assert_ne!(entity_record_id("Paris"), entity_record_id("France"));
    }

    #[test]
    fn test_record_wire_shape_is_tagged() {
        let node = Node::new("Paris", "City", "capital of France", "doc1");
        let record = IndexRecord::entity("kb1", &node, Vec::new());
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["kind"], "entity");
        assert_eq!(json["kb_id"], "kb1");
        assert_eq!(json["name"], "Paris");

        let back: IndexRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), RecordKind::Entity);
    }
}
