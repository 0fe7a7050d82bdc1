use anyhow::Result;
use async_trait::async_trait;
use graph::{ChangeSet, GraphRagError, KnowledgeGraph, TaskContext, with_deadline};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;

use crate::graph_store::GraphStore;
use crate::lock::{LockConfig, LockService, graph_lock_name, with_lock};

/// Entity-resolution collaborator. Folds duplicate entities of `graph` into a
/// canonical survivor; folded names appear in the returned removals.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, graph: KnowledgeGraph, dirty: &BTreeSet<String>) -> Result<(KnowledgeGraph, ChangeSet)>;
}

#[derive(Debug, Clone, Default)]
pub struct ResolutionOutcome {
    pub graph: KnowledgeGraph,
    pub changes: ChangeSet,
}

pub struct EntityResolutionStage {
    graphs: GraphStore,
    locks: Arc<dyn LockService>,
    lease: Duration,
    timeout: Option<Duration>,
}

impl EntityResolutionStage {
    pub fn new(graphs: GraphStore, locks: Arc<dyn LockService>) -> Self {
        Self {
            graphs,
            locks,
            lease: LockConfig::default().lease(),
            timeout: Some(Duration::from_secs(30 * 60)),
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs `resolver` over the dirty names and their neighbours in its own
    /// critical section, then re-ranks and persists the result.
    pub async fn run(
        &self,
        ctx: &TaskContext,
        kb_id: &str,
        resolver: &dyn Resolver,
        dirty: &BTreeSet<String>,
    ) -> Result<ResolutionOutcome> {
        let lock_value = Uuid::new_v4().to_string();
        let lock = self.locks.lock(&graph_lock_name(kb_id), &lock_value, self.lease);
        with_lock(lock.as_ref(), || self.run_locked(ctx, kb_id, resolver, dirty)).await
    }

    async fn run_locked(
        &self,
        ctx: &TaskContext,
        kb_id: &str,
        resolver: &dyn Resolver,
        dirty: &BTreeSet<String>,
    ) -> Result<ResolutionOutcome> {
        ctx.checkpoint("resolution").await?;
        let Some(graph) = self.graphs.load(kb_id).await? else {
            return Ok(ResolutionOutcome::default());
        };
        let scope = resolution_scope(&graph, dirty);
        if scope.is_empty() {
            return Ok(ResolutionOutcome {
                graph,
                changes: ChangeSet::new(),
            });
        }

        let started = Instant::now();
        let (mut graph, changes) = with_deadline("resolution", self.timeout, resolver.resolve(graph, &scope)).await?;
        let dangling = graph.dangling_edges();
        if let Some(first) = dangling.first() {
            return Err(GraphRagError::Contract(format!(
                "resolver returned {} edge(s) without both endpoints, first {first}",
                dangling.len()
            ))
            .into());
        }
        ctx.checkpoint("resolution").await?;

        graph.recompute_pagerank(self.graphs.pagerank_config());
        self.graphs.persist(kb_id, &graph, &changes).await?;

        info!(
            kb_id,
            scope = scope.len(),
            removed = changes.removed_nodes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Entity resolution finished"
        );
        ctx.progress(&format!("Resolved entities, {} merged away", changes.removed_nodes.len()));
        Ok(ResolutionOutcome { graph, changes })
    }
}

/// Dirty names still in the graph plus their direct neighbours.
pub fn resolution_scope(graph: &KnowledgeGraph, dirty: &BTreeSet<String>) -> BTreeSet<String> {
    let mut scope = BTreeSet::new();
    for name in dirty.iter().filter(|name| graph.contains_node(name)) {
        scope.insert(name.clone());
        scope.extend(graph.neighbors(name).into_iter().map(str::to_string));
    }
    scope
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::lock::LocalLockService;
    use crate::memory::MemoryStore;
    use graph::{AppendDistinct, Edge, FailureKind, GraphSnapshot, Node, PageRankConfig};

    /// Folds every in-scope name listed in `pairs` into its partner.
    struct FoldPairs(Vec<(&'static str, &'static str)>);

    #[async_trait]
    impl Resolver for FoldPairs {
        async fn resolve(
            &self,
            mut graph: KnowledgeGraph,
            dirty: &BTreeSet<String>,
        ) -> Result<(KnowledgeGraph, ChangeSet)> {
            let mut changes = ChangeSet::new();
            for (from, into) in &self.0 {
                if dirty.contains(*from) {
                    graph.fold_node(from, into, &AppendDistinct, &mut changes);
                }
            }
            Ok((graph, changes))
        }
    }

    struct Stalls;

    #[async_trait]
    impl Resolver for Stalls {
        async fn resolve(&self, graph: KnowledgeGraph, _dirty: &BTreeSet<String>) -> Result<(KnowledgeGraph, ChangeSet)> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok((graph, ChangeSet::new()))
        }
    }

    /// Drops a node but leaves its edges behind.
    struct LeavesDanglingEdges;

    #[async_trait]
    impl Resolver for LeavesDanglingEdges {
        async fn resolve(
            &self,
            graph: KnowledgeGraph,
            _dirty: &BTreeSet<String>,
        ) -> Result<(KnowledgeGraph, ChangeSet)> {
            let mut snapshot = GraphSnapshot::from(graph);
            snapshot.nodes.retain(|n| n.name != "USA");
            Ok((KnowledgeGraph::from(snapshot), ChangeSet::new()))
        }
    }

    async fn seeded() -> (EntityResolutionStage, GraphStore) {
        let store = Arc::new(MemoryStore::new(Arc::new(HashingEmbedder::default())));
        let graphs = GraphStore::new(store);

        let mut graph = KnowledgeGraph::new();
        graph.insert_node(Node::new("NYC", "City", "the big apple", "doc1"));
        graph.insert_node(Node::new("New York City", "City", "largest US city", "doc2"));
        graph.insert_node(Node::new("USA", "Country", "country", "doc2"));
        graph.insert_edge(Edge::new("NYC", "USA", "in", 1.0, "doc1"));
        graph.insert_edge(Edge::new("New York City", "USA", "located in", 1.0, "doc2"));
        graph.recompute_pagerank(&PageRankConfig::default());
        let mut changes = ChangeSet::new();
        for node in graph.nodes() {
            changes.touch_node(&node.name);
        }
        graphs.persist("kb1", &graph, &changes).await.unwrap();

        let stage = EntityResolutionStage::new(graphs.clone(), Arc::new(LocalLockService::default()));
        (stage, graphs)
    }

    #[test]
    fn test_scope_adds_neighbours() {
        let mut graph = KnowledgeGraph::new();
        for name in ["A", "B", "C"] {
            graph.insert_node(Node::new(name, "T", "", "doc1"));
        }
        graph.insert_edge(Edge::new("A", "B", "", 1.0, "doc1"));

        let scope = resolution_scope(&graph, &BTreeSet::from(["A".to_string(), "gone".to_string()]));
        assert_eq!(scope, BTreeSet::from(["A".to_string(), "B".to_string()]));
    }

    #[tokio::test]
    async fn test_fold_is_persisted_with_alias() {
        let (stage, graphs) = seeded().await;
        let ctx = TaskContext::detached("t1");
        let resolver = FoldPairs(vec![("NYC", "New York City")]);

        let outcome = stage
            .run(&ctx, "kb1", &resolver, &BTreeSet::from(["NYC".to_string()]))
            .await
            .unwrap();

        assert!(outcome.changes.removed_nodes.contains("NYC"));
        let stored = graphs.load("kb1").await.unwrap().unwrap();
        assert!(!stored.contains_node("NYC"));
        assert_eq!(stored.resolve("NYC").unwrap().name, "New York City");
        assert_eq!(stored.edge_count(), 1);
    }

    #[tokio::test]
    async fn test_dangling_resolver_output_is_rejected_and_lock_released() {
        let (_, graphs) = seeded().await;
        let locks = Arc::new(LocalLockService::default());
        let stage = EntityResolutionStage::new(graphs.clone(), locks.clone());
        let ctx = TaskContext::detached("t1");

        let err = stage
            .run(&ctx, "kb1", &LeavesDanglingEdges, &BTreeSet::from(["NYC".to_string()]))
            .await
            .unwrap_err();

        assert_eq!(FailureKind::classify(&err), FailureKind::Contract);
        assert!(!locks.is_held(&graph_lock_name("kb1")));
        assert!(graphs.load("kb1").await.unwrap().unwrap().contains_node("USA"));
    }

    #[tokio::test]
    async fn test_slow_resolver_times_out_and_keeps_graph() {
        let (stage, graphs) = seeded().await;
        let stage = stage.with_timeout(Some(Duration::from_millis(20)));
        let ctx = TaskContext::detached("t1");

        let err = stage
            .run(&ctx, "kb1", &Stalls, &BTreeSet::from(["NYC".to_string()]))
            .await
            .unwrap_err();

        assert_eq!(FailureKind::classify(&err), FailureKind::Timeout);
        assert!(graphs.load("kb1").await.unwrap().unwrap().contains_node("NYC"));
    }
}
