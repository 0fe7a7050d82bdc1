//! Durable SharedGraph persistence on top of a [`DocStore`].
//!
//! A kb's graph lives as one snapshot record plus one entity record per node
//! and one relation record per edge. Callers mutate the graph under the kb
//! lock, then hand the result and its [`ChangeSet`] to [`GraphStore::persist`].

use anyhow::{Context, Result};
use graph::paths::MAX_PATHS_PER_ENTITY;
use graph::{ChangeSet, KnowledgeGraph, PageRankConfig, Subgraph, all_n_hop_paths};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::records::{
    IndexRecord, RecordBody, RecordKind, SubgraphRecord, TypeSamplesRecord, entity_record_id, relation_record_id,
};
use crate::store::{Condition, DocStore, EntityRefresh, Filter, get_one};

/// Entity names kept per type in the type-samples record.
pub const TYPE_SAMPLE_LIMIT: usize = 12;

#[derive(Clone)]
pub struct GraphStore {
    store: Arc<dyn DocStore>,
    pagerank: PageRankConfig,
    hops: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PersistStats {
    pub upserted_entities: usize,
    pub upserted_relations: usize,
    pub refreshed_entities: usize,
    pub deleted_records: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub entities: usize,
    pub relations: usize,
    pub documents: usize,
}

impl GraphStore {
    pub fn new(store: Arc<dyn DocStore>) -> Self {
        Self {
            store,
            pagerank: PageRankConfig::default(),
            hops: graph::paths::DEFAULT_HOPS,
        }
    }

    pub fn with_pagerank(mut self, pagerank: PageRankConfig) -> Self {
        self.pagerank = pagerank;
        self
    }

    pub fn with_hops(mut self, hops: usize) -> Self {
        self.hops = hops;
        self
    }

    pub fn doc_store(&self) -> &Arc<dyn DocStore> {
        &self.store
    }

    pub fn pagerank_config(&self) -> &PageRankConfig {
        &self.pagerank
    }

    pub async fn ensure_index(&self, kb_id: &str) -> Result<()> {
        if !self.store.index_exists(kb_id).await? {
            info!(kb_id, "Creating index");
            self.store.create_index(kb_id).await?;
        }
        Ok(())
    }

    /// The kb's SharedGraph, or None before the first merge.
    pub async fn load(&self, kb_id: &str) -> Result<Option<KnowledgeGraph>> {
        let record = get_one(self.store.as_ref(), kb_id, Filter::kind(RecordKind::Graph))
            .await
            .with_context(|| format!("Failed to load graph for kb {kb_id}"))?;
        Ok(match record.map(|r| r.body) {
            Some(RecordBody::Graph(g)) => Some(g.graph),
            _ => None,
        })
    }

    /// Writes the index side of a mutation pass, then the snapshot.
    ///
    /// Removed names and pairs are deleted, ChangeSet members are upserted
    /// (and so re-embedded), every other entity only gets its PageRank and
    /// n-hop cache refreshed. The snapshot goes last so a failure part way
    /// leaves the previous snapshot in place.
    pub async fn persist(&self, kb_id: &str, graph: &KnowledgeGraph, changes: &ChangeSet) -> Result<PersistStats> {
        let started = Instant::now();
        self.ensure_index(kb_id).await?;
        let mut stats = PersistStats::default();
        let mut paths = all_n_hop_paths(graph, self.hops, MAX_PATHS_PER_ENTITY);

        let removed_ids: Vec<String> = changes
            .removed_nodes
            .iter()
            .filter(|name| !graph.contains_node(name))
            .map(|name| entity_record_id(name))
            .chain(
                changes
                    .removed_edges
                    .iter()
                    .filter(|key| graph.edge_by_key(key).is_none())
                    .map(relation_record_id),
            )
            .collect();
        if !removed_ids.is_empty() {
            stats.deleted_records = self
                .store
                .delete(kb_id, &Filter::default().and(Condition::Ids(removed_ids)))
                .await
                .context("Failed to delete removed graph records")?;
        }

        let mut upserts = Vec::new();
        for name in &changes.added_updated_nodes {
            if let Some(node) = graph.node(name) {
                upserts.push(IndexRecord::entity(kb_id, node, paths.remove(name).unwrap_or_default()));
                stats.upserted_entities += 1;
            }
        }
        for key in &changes.added_updated_edges {
            if let Some(edge) = graph.edge_by_key(key) {
                upserts.push(IndexRecord::relation(kb_id, edge));
                stats.upserted_relations += 1;
            }
        }
        if !upserts.is_empty() {
            self.store
                .insert(kb_id, upserts)
                .await
                .context("Failed to upsert graph records")?;
        }

        let refreshes: Vec<EntityRefresh> = graph
            .nodes()
            .filter(|node| !changes.added_updated_nodes.contains(&node.name))
            .map(|node| EntityRefresh {
                name: node.name.clone(),
                pagerank: node.pagerank,
                n_hop: paths.remove(&node.name).unwrap_or_default(),
            })
            .collect();
        if !refreshes.is_empty() {
            stats.refreshed_entities = self.store.refresh_entities(kb_id, refreshes).await?;
        }

        self.store
            .insert(
                kb_id,
                vec![
                    IndexRecord::type_samples(kb_id, type_samples(graph)),
                    IndexRecord::graph(kb_id, graph),
                ],
            )
            .await
            .context("Failed to write graph snapshot")?;

        info!(
            kb_id,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            upserted_entities = stats.upserted_entities,
            upserted_relations = stats.upserted_relations,
            refreshed = stats.refreshed_entities,
            deleted = stats.deleted_records,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Graph persisted"
        );
        Ok(stats)
    }

    pub async fn subgraph_record(&self, kb_id: &str, document_id: &str) -> Result<Option<SubgraphRecord>> {
        let filter = Filter::kind(RecordKind::Subgraph).and(Condition::DocumentId(document_id.to_string()));
        let record = get_one(self.store.as_ref(), kb_id, filter).await?;
        Ok(match record.map(|r| r.body) {
            Some(RecordBody::Subgraph(s)) => Some(s),
            _ => None,
        })
    }

    /// Replace-if-exists write of a document's subgraph record.
    pub async fn save_subgraph(&self, kb_id: &str, subgraph: &Subgraph, merged: bool) -> Result<()> {
        self.ensure_index(kb_id).await?;
        self.store
            .insert(kb_id, vec![IndexRecord::subgraph(kb_id, subgraph, merged)])
            .await
            .with_context(|| format!("Failed to save subgraph for document {}", subgraph.document_id))?;
        debug!(kb_id, document_id = %subgraph.document_id, merged, "Subgraph saved");
        Ok(())
    }

    pub async fn mark_merged(&self, kb_id: &str, subgraph: &Subgraph) -> Result<()> {
        self.save_subgraph(kb_id, subgraph, true).await
    }

    pub async fn stats(&self, kb_id: &str) -> Result<IndexStats> {
        Ok(match self.load(kb_id).await? {
            Some(graph) => IndexStats {
                entities: graph.node_count(),
                relations: graph.edge_count(),
                documents: graph.source_ids().len(),
            },
            None => IndexStats::default(),
        })
    }
}

/// entity_type -> highest-PageRank entity names of that type.
pub fn type_samples(graph: &KnowledgeGraph) -> TypeSamplesRecord {
    let mut by_type: BTreeMap<String, Vec<(f64, String)>> = BTreeMap::new();
    for node in graph.nodes() {
        by_type
            .entry(node.entity_type.clone())
            .or_default()
            .push((node.pagerank, node.name.clone()));
    }

    let samples = by_type
        .into_iter()
        .map(|(entity_type, mut ranked)| {
            ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal).then_with(|| a.1.cmp(&b.1)));
            let names = ranked.into_iter().take(TYPE_SAMPLE_LIMIT).map(|(_, name)| name).collect();
            (entity_type, names)
        })
        .collect();
    TypeSamplesRecord { samples }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::memory::MemoryStore;
    use crate::store::SearchRequest;
    use graph::{AppendDistinct, Edge, EdgeKey, Node};

    fn graph_store() -> (Arc<MemoryStore>, GraphStore) {
        let store = Arc::new(MemoryStore::new(Arc::new(HashingEmbedder::default())));
        (store.clone(), GraphStore::new(store))
    }

    fn paris_graph() -> (KnowledgeGraph, ChangeSet) {
        let mut sub = KnowledgeGraph::new();
        sub.insert_node(Node::new("Paris", "City", "capital", "doc1"));
        sub.insert_node(Node::new("France", "Country", "country", "doc1"));
        sub.insert_edge(Edge::new("Paris", "France", "capital of", 2.0, "doc1"));

        let mut graph = KnowledgeGraph::new();
        let mut changes = ChangeSet::new();
        graph.merge_graph(&sub, &AppendDistinct, &mut changes);
        graph.recompute_pagerank(&PageRankConfig::default());
        (graph, changes)
    }

    async fn entity_records(store: &MemoryStore) -> Vec<crate::records::EntityRecord> {
        let request = SearchRequest::new(&["kb1".to_string()], Filter::kind(RecordKind::Entity));
        store
            .search(&request)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|hit| match hit.record.body {
                RecordBody::Entity(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_persist_then_load() {
        let (_, graphs) = graph_store();
        assert!(graphs.load("kb1").await.unwrap().is_none());

        let (graph, changes) = paris_graph();
        let stats = graphs.persist("kb1", &graph, &changes).await.unwrap();
        assert_eq!(stats.upserted_entities, 2);
        assert_eq!(stats.upserted_relations, 1);

        let loaded = graphs.load("kb1").await.unwrap().unwrap();
        assert_eq!(loaded, graph);
        assert_eq!(graphs.stats("kb1").await.unwrap().entities, 2);
    }

    #[tokio::test]
    async fn test_untouched_entities_are_refreshed_not_rewritten() {
        let (store, graphs) = graph_store();
        let (mut graph, changes) = paris_graph();
        graphs.persist("kb1", &graph, &changes).await.unwrap();

        let mut more = ChangeSet::new();
        let mut sub = KnowledgeGraph::new();
        sub.insert_node(Node::new("Lyon", "City", "city", "doc2"));
        sub.insert_node(Node::new("France", "Country", "republic", "doc2"));
        sub.insert_edge(Edge::new("Lyon", "France", "city in", 1.0, "doc2"));
        graph.merge_graph(&sub, &AppendDistinct, &mut more);
        graph.recompute_pagerank(&PageRankConfig::default());

        let stats = graphs.persist("kb1", &graph, &more).await.unwrap();
        assert_eq!(stats.upserted_entities, 2);
        assert_eq!(stats.refreshed_entities, 1);

        let paris = entity_records(&store)
            .await
            .into_iter()
            .find(|e| e.name == "Paris")
            .unwrap();
        assert_eq!(paris.pagerank, graph.node("Paris").unwrap().pagerank);
        assert_eq!(paris.description, "capital");
        assert!(!paris.n_hop.is_empty());
    }

    #[tokio::test]
    async fn test_removed_records_are_deleted() {
        let (store, graphs) = graph_store();
        let (mut graph, changes) = paris_graph();
        graphs.persist("kb1", &graph, &changes).await.unwrap();

        let mut removal = ChangeSet::new();
        graph.remove_node("France");
        removal.remove_node("France");
        removal.remove_edge(EdgeKey::new("Paris", "France"));
        let stats = graphs.persist("kb1", &graph, &removal).await.unwrap();

        assert_eq!(stats.deleted_records, 2);
        let names: Vec<String> = entity_records(&store).await.into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Paris"]);
    }

    #[test]
    fn test_type_samples_ordered_by_pagerank() {
        let mut graph = KnowledgeGraph::new();
        for (name, rank) in [("Lyon", 0.1), ("Paris", 0.5), ("Nice", 0.2)] {
            let mut node = Node::new(name, "City", "", "doc1");
            node.pagerank = rank;
            graph.insert_node(node);
        }
        let samples = type_samples(&graph);
        assert_eq!(samples.samples["City"], vec!["Paris", "Nice", "Lyon"]);
    }

    #[tokio::test]
    async fn test_subgraph_record_round_trip() {
        let (_, graphs) = graph_store();
        let subgraph = Subgraph::new("doc1");
        graphs.save_subgraph("kb1", &subgraph, false).await.unwrap();
        assert!(!graphs.subgraph_record("kb1", "doc1").await.unwrap().unwrap().merged);

        graphs.mark_merged("kb1", &subgraph).await.unwrap();
        assert!(graphs.subgraph_record("kb1", "doc1").await.unwrap().unwrap().merged);
        assert!(graphs.subgraph_record("kb1", "doc2").await.unwrap().is_none());
    }
}
