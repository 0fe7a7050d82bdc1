use anyhow::Result;
use communities::{CommunityDetector, CommunityOutcome, CommunityStage};
use extract::{Extractor, SubgraphBuilder};
use graph::TaskContext;
use index::{
    DocStore, EntityResolutionStage, GraphMergeEngine, GraphStore, LockService, MergeOutcome, ResolutionOutcome,
    Resolver,
};
use query::{GraphSearchEngine, QueryRewriter};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::chunker::Chunker;
use crate::config::PipelineConfig;
use crate::orchestrator::{BatchOutcome, DocumentOrchestrator};
use crate::source::ChunkSource;

/// Everything one ingestion call did.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub batch: BatchOutcome,
    pub merge: MergeOutcome,
    /// None when the stage is off or there was nothing to resolve.
    pub resolution: Option<ResolutionOutcome>,
    pub communities: Option<CommunityOutcome>,
}

/// Build, merge, resolve, cluster: one kb at a time.
pub struct IngestionPipeline {
    config: PipelineConfig,
    graphs: GraphStore,
    orchestrator: DocumentOrchestrator,
    merger: GraphMergeEngine,
    resolution: EntityResolutionStage,
    community: CommunityStage,
    resolver: Arc<dyn Resolver>,
    detector: Arc<dyn CommunityDetector>,
}

impl IngestionPipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn DocStore>,
        locks: Arc<dyn LockService>,
        chunks: Arc<dyn ChunkSource>,
        extractor: Arc<dyn Extractor>,
        resolver: Arc<dyn Resolver>,
        detector: Arc<dyn CommunityDetector>,
    ) -> Self {
        let graphs = GraphStore::new(store);
        let lease = config.lock.lease();

        let builder = SubgraphBuilder::new(graphs.clone(), extractor);
        let orchestrator = DocumentOrchestrator::new(Arc::new(builder), chunks)
            .with_concurrency(config.concurrency.max_concurrent_documents)
            .with_timeout(config.timeouts.document)
            .with_extraction(config.extraction.language.clone(), config.extraction.entity_types.clone());
        let merger = GraphMergeEngine::new(graphs.clone(), locks.clone()).with_lease(lease);
        let resolution = EntityResolutionStage::new(graphs.clone(), locks.clone())
            .with_lease(lease)
            .with_timeout(config.timeouts.resolution());
        let community = CommunityStage::new(graphs.clone(), locks)
            .with_lease(lease)
            .with_timeout(config.timeouts.community());

        Self {
            config,
            graphs,
            orchestrator,
            merger,
            resolution,
            community,
            resolver,
            detector,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn graphs(&self) -> &GraphStore {
        &self.graphs
    }

    /// Chunker with the configured token target, for feeding a chunk source.
    pub fn chunker(&self) -> Chunker {
        Chunker::new(self.config.chunker.clone())
    }

    /// A query engine over the same store, using the configured search knobs.
    pub fn search_engine(&self, rewriter: Arc<dyn QueryRewriter>) -> GraphSearchEngine {
        GraphSearchEngine::new(self.graphs.doc_store().clone(), rewriter).with_config(self.config.search.clone())
    }

    /// Per-document failures stay in the report; stage failures after the
    /// batch propagate.
    pub async fn ingest(&self, ctx: &TaskContext, kb_id: &str, document_ids: &[String]) -> Result<IngestReport> {
        let started = Instant::now();
        let mut batch = self.orchestrator.run(ctx, kb_id, document_ids).await?;
        let subgraphs = std::mem::take(&mut batch.subgraphs);

        let merge = self.merger.merge(ctx, kb_id, &subgraphs).await?;
        let dirty = merge.changes.touched_names();

        let resolution = if self.config.stages.with_resolution && !dirty.is_empty() {
            Some(self.resolution.run(ctx, kb_id, self.resolver.as_ref(), &dirty).await?)
        } else {
            None
        };

        let communities = if self.config.stages.with_community && !merge.changes.is_empty() {
            Some(self.community.run(ctx, kb_id, self.detector.as_ref()).await?)
        } else {
            None
        };

        info!(
            kb_id,
            documents = batch.total_documents,
            merged = merge.merged_documents.len(),
            failed = batch.failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Ingestion finished"
        );
        Ok(IngestReport {
            batch,
            merge,
            resolution,
            communities,
        })
    }
}
