//! Bounded-parallel subgraph building for a batch of documents.
//!
//! Every document runs in its own task. A failing or timed-out document is
//! recorded and never touches its siblings; only cancellation of the batch
//! context stops new documents from being scheduled.

use anyhow::Result;
use extract::{BuildOutcome, SubgraphBuilder};
use graph::{FailureKind, Subgraph, TaskContext, with_deadline};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DocumentTimeout;
use crate::source::ChunkSource;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedDocument {
    pub document_id: String,
    pub kind: FailureKind,
    pub error: String,
}

/// Every input document lands in exactly one of `ok_documents`, `skipped`,
/// `failed` or `not_attempted`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub ok_documents: Vec<String>,
    /// No chunks, or already merged.
    pub skipped: Vec<String>,
    pub failed: Vec<FailedDocument>,
    /// Never scheduled because the batch was canceled first.
    pub not_attempted: Vec<String>,
    pub total_documents: usize,
    pub total_chunks: usize,
    pub elapsed_seconds: f64,
    /// Built or resumed subgraphs, in input order, ready to merge.
    pub subgraphs: Vec<Subgraph>,
}

impl BatchOutcome {
    fn fail(&mut self, document_id: &str, err: &anyhow::Error) {
        let kind = FailureKind::classify(err);
        warn!(document_id, ?kind, error = %err, "Document failed");
        self.failed.push(FailedDocument {
            document_id: document_id.to_string(),
            kind,
            error: format!("{err:#}"),
        });
    }
}

pub struct DocumentOrchestrator {
    builder: Arc<SubgraphBuilder>,
    chunks: Arc<dyn ChunkSource>,
    max_concurrent: usize,
    timeout: Option<DocumentTimeout>,
    language: String,
    entity_types: Vec<String>,
}

impl DocumentOrchestrator {
    pub fn new(builder: Arc<SubgraphBuilder>, chunks: Arc<dyn ChunkSource>) -> Self {
        Self {
            builder,
            chunks,
            max_concurrent: 4,
            timeout: None,
            language: "English".to_string(),
            entity_types: Vec::new(),
        }
    }

    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<DocumentTimeout>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_extraction(mut self, language: impl Into<String>, entity_types: Vec<String>) -> Self {
        self.language = language.into();
        self.entity_types = entity_types;
        self
    }

    /// Builds subgraphs for `document_ids` (duplicates ignored).
    /// Per-document problems are reported in the outcome, not returned.
    pub async fn run(&self, ctx: &TaskContext, kb_id: &str, document_ids: &[String]) -> Result<BatchOutcome> {
        let started = Instant::now();
        let mut seen = HashSet::new();
        let documents: Vec<&String> = document_ids.iter().filter(|id| seen.insert(*id)).collect();

        let mut outcome = BatchOutcome {
            total_documents: documents.len(),
            ..BatchOutcome::default()
        };
        let gate = Arc::new(Semaphore::new(self.max_concurrent));
        let mut running: Vec<(String, JoinHandle<Result<BuildOutcome>>)> = Vec::new();

        for (i, document_id) in documents.iter().enumerate() {
            if ctx.is_canceled().await {
                info!(kb_id, remaining = documents.len() - i, "Batch canceled, not scheduling further documents");
                outcome.not_attempted.extend(documents[i..].iter().map(|id| id.to_string()));
                break;
            }

            let chunks = match self.chunks.chunks(kb_id, document_id).await {
                Ok(chunks) => chunks,
                Err(e) => {
                    outcome.fail(document_id, &e);
                    continue;
                }
            };
            if chunks.is_empty() {
                debug!(kb_id, document_id = %document_id, "No chunks, skipping");
                outcome.skipped.push(document_id.to_string());
                continue;
            }

            let permit = gate.clone().acquire_owned().await?;
            if ctx.is_canceled().await {
                info!(kb_id, remaining = documents.len() - i, "Batch canceled, not scheduling further documents");
                outcome.not_attempted.extend(documents[i..].iter().map(|id| id.to_string()));
                break;
            }
            outcome.total_chunks += chunks.len();

            let limit = self.timeout.map(|t| t.for_chunks(chunks.len()));
            let texts: Vec<String> = chunks.into_iter().map(|c| c.text).collect();
            let builder = self.builder.clone();
            let ctx = ctx.clone();
            let kb = kb_id.to_string();
            let doc = document_id.to_string();
            let language = self.language.clone();
            let entity_types = self.entity_types.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                with_deadline(
                    "document",
                    limit,
                    builder.build(&ctx, &kb, &doc, &texts, &language, &entity_types),
                )
                .await
            });
            running.push((document_id.to_string(), handle));
        }

        for (document_id, handle) in running {
            match handle.await {
                Ok(Ok(BuildOutcome::Skipped)) => outcome.skipped.push(document_id),
                Ok(Ok(built)) => {
                    if let Some(subgraph) = built.into_subgraph() {
                        outcome.subgraphs.push(subgraph);
                    }
                    outcome.ok_documents.push(document_id);
                }
                Ok(Err(e)) => outcome.fail(&document_id, &e),
                Err(join_err) => outcome.fail(&document_id, &anyhow::anyhow!("document task aborted: {join_err}")),
            }
        }

        outcome.elapsed_seconds = started.elapsed().as_secs_f64();
        info!(
            kb_id,
            ok = outcome.ok_documents.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failed.len(),
            not_attempted = outcome.not_attempted.len(),
            chunks = outcome.total_chunks,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Document batch finished"
        );
        ctx.progress(&format!(
            "Built {} of {} documents ({} failed)",
            outcome.ok_documents.len(),
            outcome.total_documents,
            outcome.failed.len()
        ));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryChunkSource;
    use extract::{Entity, Extractor, ExtractionResult, Relation, StaticExtractor};
    use graph::{Chunk, GraphRagError, LogProgress, MemoryCancelRegistry};
    use index::{GraphStore, HashingEmbedder, MemoryStore};
    use std::time::Duration;

    struct Flaky;

    #[async_trait::async_trait]
    impl Extractor for Flaky {
        async fn extract(
            &self,
            document_id: &str,
            _chunks: &[String],
            _language: &str,
            _entity_types: &[String],
        ) -> Result<ExtractionResult> {
            if document_id == "bad" {
                return Err(GraphRagError::extraction(document_id, "entity without description").into());
            }
            Ok(ExtractionResult {
                entities: vec![Entity::new(document_id, "THING", "something")],
                relations: Vec::<Relation>::new(),
            })
        }
    }

    struct Slow;

    #[async_trait::async_trait]
    impl Extractor for Slow {
        async fn extract(
            &self,
            _document_id: &str,
            _chunks: &[String],
            _language: &str,
            _entity_types: &[String],
        ) -> Result<ExtractionResult> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ExtractionResult::default())
        }
    }

    /// Blocks until released, then cancels the batch.
    struct CancelAfterFirst {
        registry: Arc<MemoryCancelRegistry>,
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait::async_trait]
    impl Extractor for CancelAfterFirst {
        async fn extract(
            &self,
            document_id: &str,
            _chunks: &[String],
            _language: &str,
            _entity_types: &[String],
        ) -> Result<ExtractionResult> {
            self.release.notified().await;
            self.registry.cancel("t1");
            Ok(ExtractionResult {
                entities: vec![Entity::new(document_id, "THING", "something")],
                relations: Vec::new(),
            })
        }
    }

    fn source(documents: &[&str]) -> Arc<MemoryChunkSource> {
        let source = MemoryChunkSource::new();
        for doc in documents {
            source.insert("kb1", doc, vec![Chunk::new("kb1".into(), doc.to_string(), format!("{doc} text"), 0)]);
        }
        Arc::new(source)
    }

    fn orchestrator(extractor: Arc<dyn Extractor>, chunks: Arc<MemoryChunkSource>) -> DocumentOrchestrator {
        let store = Arc::new(MemoryStore::new(Arc::new(HashingEmbedder::default())));
        let builder = SubgraphBuilder::new(GraphStore::new(store), extractor);
        DocumentOrchestrator::new(Arc::new(builder), chunks).with_concurrency(2)
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let orchestrator = orchestrator(Arc::new(Flaky), source(&["a", "bad", "c"]));
        let ctx = TaskContext::detached("t1");

        let outcome = orchestrator.run(&ctx, "kb1", &ids(&["a", "bad", "c", "a"])).await.unwrap();

        assert_eq!(outcome.total_documents, 3);
        assert_eq!(outcome.ok_documents, vec!["a", "c"]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].document_id, "bad");
        assert_eq!(outcome.failed[0].kind, FailureKind::Extraction);
        assert_eq!(outcome.subgraphs.len(), 2);
    }

    #[tokio::test]
    async fn test_document_without_chunks_is_skipped() {
        let orchestrator = orchestrator(Arc::new(StaticExtractor::new()), source(&["a"]));
        let ctx = TaskContext::detached("t1");

        let outcome = orchestrator.run(&ctx, "kb1", &ids(&["a", "missing"])).await.unwrap();
        assert_eq!(outcome.ok_documents, vec!["a"]);
        assert_eq!(outcome.skipped, vec!["missing"]);
        assert_eq!(outcome.total_chunks, 1);
    }

    #[tokio::test]
    async fn test_queued_document_chunks_are_not_counted_after_cancel() {
        let registry = Arc::new(MemoryCancelRegistry::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let extractor = CancelAfterFirst {
            registry: registry.clone(),
            release: release.clone(),
        };
        let chunks = MemoryChunkSource::new();
        chunks.insert("kb1", "a", vec![Chunk::new("kb1".into(), "a".into(), "a text".into(), 0)]);
        chunks.insert(
            "kb1",
            "b",
            vec![
                Chunk::new("kb1".into(), "b".into(), "b one".into(), 0),
                Chunk::new("kb1".into(), "b".into(), "b two".into(), 1),
            ],
        );
        let orchestrator = orchestrator(Arc::new(extractor), Arc::new(chunks)).with_concurrency(1);
        let ctx = TaskContext::new("t1", registry, Arc::new(LogProgress));

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            release.notify_one();
        });
        let outcome = orchestrator.run(&ctx, "kb1", &ids(&["a", "b"])).await.unwrap();
        releaser.await.unwrap();

        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].kind, FailureKind::Canceled);
        assert_eq!(outcome.not_attempted, vec!["b"]);
        assert_eq!(outcome.total_chunks, 1);
    }

    #[tokio::test]
    async fn test_document_deadline() {
        let orchestrator = orchestrator(Arc::new(Slow), source(&["a"])).with_timeout(Some(DocumentTimeout {
            base_secs: 1,
            per_chunk_secs: 0,
        }));
        let ctx = TaskContext::detached("t1");

        let outcome = orchestrator.run(&ctx, "kb1", &ids(&["a"])).await.unwrap();
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].kind, FailureKind::Timeout);
    }
}
