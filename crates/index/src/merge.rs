use anyhow::Result;
use graph::{AppendDistinct, ChangeSet, DescriptionPolicy, KnowledgeGraph, Subgraph, TaskContext};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::graph_store::GraphStore;
use crate::lock::{LockConfig, LockService, graph_lock_name, with_lock};

/// What a merge call left behind.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub graph: KnowledgeGraph,
    /// Union of every per-subgraph pass; drives the resolution dirty set.
    pub changes: ChangeSet,
    pub merged_documents: Vec<String>,
}

/// Folds freshly built subgraphs into a kb's SharedGraph under the kb lock.
pub struct GraphMergeEngine {
    graphs: GraphStore,
    locks: Arc<dyn LockService>,
    policy: Arc<dyn DescriptionPolicy>,
    lease: Duration,
}

impl GraphMergeEngine {
    pub fn new(graphs: GraphStore, locks: Arc<dyn LockService>) -> Self {
        Self {
            graphs,
            locks,
            policy: Arc::new(AppendDistinct),
            lease: LockConfig::default().lease(),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn DescriptionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Each subgraph is loaded, merged, ranked and persisted on its own, so a
    /// failure on the third leaves the first two durable.
    pub async fn merge(&self, ctx: &TaskContext, kb_id: &str, subgraphs: &[Subgraph]) -> Result<MergeOutcome> {
        if subgraphs.is_empty() {
            return Ok(MergeOutcome {
                graph: self.graphs.load(kb_id).await?.unwrap_or_default(),
                ..Default::default()
            });
        }

        let lock_value = Uuid::new_v4().to_string();
        let lock = self.locks.lock(&graph_lock_name(kb_id), &lock_value, self.lease);
        with_lock(lock.as_ref(), || self.merge_locked(ctx, kb_id, subgraphs)).await
    }

    async fn merge_locked(&self, ctx: &TaskContext, kb_id: &str, subgraphs: &[Subgraph]) -> Result<MergeOutcome> {
        let started = Instant::now();
        let mut outcome = MergeOutcome::default();

        for subgraph in subgraphs {
            ctx.checkpoint("merge").await?;

            let mut graph = self.graphs.load(kb_id).await?.unwrap_or_default();
            let mut changes = ChangeSet::new();
            graph.merge_graph(&subgraph.graph, self.policy.as_ref(), &mut changes);
            graph.recompute_pagerank(self.graphs.pagerank_config());

            self.graphs.persist(kb_id, &graph, &changes).await?;
            self.graphs.mark_merged(kb_id, subgraph).await?;

            debug!(
                kb_id,
                document_id = %subgraph.document_id,
                nodes = changes.added_updated_nodes.len(),
                edges = changes.added_updated_edges.len(),
                "Subgraph merged"
            );
            outcome.changes.absorb(changes);
            outcome.merged_documents.push(subgraph.document_id.clone());
            outcome.graph = graph;
        }

        info!(
            kb_id,
            documents = outcome.merged_documents.len(),
            nodes = outcome.graph.node_count(),
            edges = outcome.graph.edge_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Merge finished"
        );
        ctx.progress(&format!(
            "Merged {} subgraph(s) into graph of {} entities",
            outcome.merged_documents.len(),
            outcome.graph.node_count()
        ));
        Ok(outcome)
    }
}
