//! Per-document subgraph construction.
//!
//! A document is extracted once per kb. Its subgraph record doubles as the
//! idempotency marker: merged means done, unmerged means a previous run was
//! interrupted between building and merging, and the stored subgraph is
//! handed back for merging without extracting again.

use anyhow::Result;
use graph::{AppendDistinct, ChangeSet, Edge, EdgeKey, Node, Subgraph, TaskContext};
use index::GraphStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::Extractor;
use crate::schema::ExtractionResult;

#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Built(Subgraph),
    /// Stored but never merged; nothing was extracted or written.
    Resumed(Subgraph),
    /// Already merged into the SharedGraph.
    Skipped,
}

impl BuildOutcome {
    pub fn into_subgraph(self) -> Option<Subgraph> {
        match self {
            BuildOutcome::Built(subgraph) | BuildOutcome::Resumed(subgraph) => Some(subgraph),
            BuildOutcome::Skipped => None,
        }
    }
}

pub struct SubgraphBuilder {
    graphs: GraphStore,
    extractor: Arc<dyn Extractor>,
}

impl SubgraphBuilder {
    pub fn new(graphs: GraphStore, extractor: Arc<dyn Extractor>) -> Self {
        Self { graphs, extractor }
    }

    pub async fn build(
        &self,
        ctx: &TaskContext,
        kb_id: &str,
        document_id: &str,
        chunks: &[String],
        language: &str,
        entity_types: &[String],
    ) -> Result<BuildOutcome> {
        if let Some(existing) = self.graphs.subgraph_record(kb_id, document_id).await? {
            if existing.merged {
                debug!(kb_id, document_id, "Subgraph already merged, skipping");
                return Ok(BuildOutcome::Skipped);
            }
            info!(kb_id, document_id, "Resuming unmerged subgraph");
            return Ok(BuildOutcome::Resumed(existing.subgraph));
        }

        ctx.checkpoint("extract").await?;
        let started = Instant::now();
        let extracted = self.extractor.extract(document_id, chunks, language, entity_types).await?;

        let mut subgraph = assemble(document_id, extracted);
        ctx.checkpoint("extract").await?;
        normalize(&mut subgraph);

        self.graphs.save_subgraph(kb_id, &subgraph, false).await?;
        info!(
            kb_id,
            document_id,
            entities = subgraph.graph.node_count(),
            relations = subgraph.graph.edge_count(),
            ignored = subgraph.ignored_relations,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Subgraph built"
        );
        ctx.progress(&format!(
            "Document {document_id}: {} entities, {} relations",
            subgraph.graph.node_count(),
            subgraph.graph.edge_count()
        ));
        Ok(BuildOutcome::Built(subgraph))
    }
}

/// Nodes keyed by trimmed name; relations with an unknown endpoint are
/// dropped and counted.
pub fn assemble(document_id: &str, extracted: ExtractionResult) -> Subgraph {
    let mut subgraph = Subgraph::new(document_id);
    let mut changes = ChangeSet::new();

    for entity in extracted.entities {
        let node = Node::new(
            entity.name.trim(),
            entity.entity_type.trim(),
            entity.description.unwrap_or_default(),
            document_id,
        );
        subgraph.graph.merge_node(node, &AppendDistinct, &mut changes);
    }

    for relation in extracted.relations {
        let (source, target) = (relation.source.trim(), relation.target.trim());
        if !subgraph.graph.contains_node(source) || !subgraph.graph.contains_node(target) {
            debug!(document_id, source, target, "Dropping relation with unknown endpoint");
            subgraph.ignored_relations += 1;
            continue;
        }
        let edge = Edge::new(
            source,
            target,
            relation.description.unwrap_or_default(),
            relation.weight.unwrap_or(1.0),
            document_id,
        );
        subgraph.graph.merge_edge(edge, &AppendDistinct, &mut changes);
    }
    subgraph
}

/// Trims descriptions and drops blank ones, leaving a single empty
/// placeholder when nothing remains. Non-positive or non-finite weights
/// get the default of 1.
pub fn normalize(subgraph: &mut Subgraph) {
    let names: Vec<String> = subgraph.graph.node_names().map(str::to_string).collect();
    for name in names {
        if let Some(node) = subgraph.graph.node_mut(&name) {
            node.description = tidy(&node.description);
        }
    }

    let keys: Vec<EdgeKey> = subgraph.graph.edges().map(|(key, _)| key.clone()).collect();
    for key in keys {
        if let Some(mut edge) = subgraph.graph.remove_edge(&key) {
            edge.description = tidy(&edge.description);
            if !edge.weight.is_finite() || edge.weight <= 0.0 {
                edge.weight = 1.0;
            }
            subgraph.graph.insert_edge(edge);
        }
    }
}

fn tidy(descriptions: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for description in descriptions.iter().map(|d| d.trim()).filter(|d| !d.is_empty()) {
        if !out.iter().any(|d| d == description) {
            out.push(description.to_string());
        }
    }
    if out.is_empty() {
        out.push(String::new());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StaticExtractor;
    use crate::schema::{Entity, Relation};
    use graph::{FailureKind, MemoryCancelRegistry, LogProgress, UNKNOWN_TYPE};
    use index::{HashingEmbedder, MemoryStore};

    fn graphs() -> GraphStore {
        GraphStore::new(Arc::new(MemoryStore::new(Arc::new(HashingEmbedder::default()))))
    }

    fn paris_doc() -> ExtractionResult {
        ExtractionResult {
            entities: vec![Entity::new("Paris", "City", "capital"), Entity::new("France", "", " country ")],
            relations: vec![
                Relation::new("Paris", "France", "capital of").with_weight(8.0),
                Relation::new("Paris", "Atlantis", "sister city"),
            ],
        }
    }

    #[test]
    fn test_dangling_relation_is_ignored() {
        let extracted = ExtractionResult {
            entities: vec![Entity::new("X", "T", "x")],
            relations: vec![Relation::new("X", "Y", "knows")],
        };
        let subgraph = assemble("doc1", extracted);
        assert_eq!(subgraph.graph.edge_count(), 0);
        assert_eq!(subgraph.ignored_relations, 1);
    }

    #[test]
    fn test_assemble_and_normalize() {
        let mut subgraph = assemble("doc1", paris_doc());
        normalize(&mut subgraph);

        let france = subgraph.graph.node("France").unwrap();
        assert_eq!(france.entity_type, UNKNOWN_TYPE);
        assert_eq!(france.description, vec!["country"]);
        assert_eq!(subgraph.graph.edge("France", "Paris").unwrap().weight, 8.0);
        assert_eq!(subgraph.ignored_relations, 1);
        assert!(subgraph.graph.source_ids().contains("doc1"));
    }

    #[test]
    fn test_blank_descriptions_keep_a_placeholder() {
        let mut subgraph = assemble(
            "doc1",
            ExtractionResult {
                entities: vec![Entity::new("Paris", "City", "   "), Entity::new("France", "Country", "")],
                relations: vec![Relation::new("Paris", "France", " ")],
            },
        );
        normalize(&mut subgraph);

        assert_eq!(subgraph.graph.node("Paris").unwrap().description, vec![String::new()]);
        assert_eq!(subgraph.graph.node("France").unwrap().description, vec![String::new()]);
        assert_eq!(subgraph.graph.edge("Paris", "France").unwrap().description, vec![String::new()]);
    }

    #[tokio::test]
    async fn test_second_build_is_a_no_op() {
        let graphs = graphs();
        let extractor = Arc::new(StaticExtractor::new().with_document("doc1", paris_doc()));
        let builder = SubgraphBuilder::new(graphs.clone(), extractor.clone());
        let ctx = TaskContext::detached("t1");

        let first = builder.build(&ctx, "kb1", "doc1", &[], "English", &[]).await.unwrap();
        assert!(matches!(first, BuildOutcome::Built(_)));

        let second = builder.build(&ctx, "kb1", "doc1", &[], "English", &[]).await.unwrap();
        assert!(matches!(second, BuildOutcome::Resumed(_)));
        assert_eq!(extractor.calls(), 1);

        let subgraph = first.into_subgraph().unwrap();
        graphs.mark_merged("kb1", &subgraph).await.unwrap();
        let third = builder.build(&ctx, "kb1", "doc1", &[], "English", &[]).await.unwrap();
        assert_eq!(third, BuildOutcome::Skipped);
        assert_eq!(extractor.calls(), 1);
    }

    #[tokio::test]
    async fn test_canceled_before_extraction_writes_nothing() {
        let graphs = graphs();
        let extractor = Arc::new(StaticExtractor::new().with_document("doc1", paris_doc()));
        let builder = SubgraphBuilder::new(graphs.clone(), extractor.clone());
        let registry = Arc::new(MemoryCancelRegistry::new());
        registry.cancel("t1");
        let ctx = TaskContext::new("t1", registry, Arc::new(LogProgress));

        let err = builder.build(&ctx, "kb1", "doc1", &[], "English", &[]).await.unwrap_err();

        assert_eq!(FailureKind::classify(&err), FailureKind::Canceled);
        assert_eq!(extractor.calls(), 0);
        assert!(graphs.subgraph_record("kb1", "doc1").await.unwrap().is_none());
    }
}
