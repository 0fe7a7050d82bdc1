use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use graph::Chunk;

use crate::chunker::Chunker;

/// Where a document's chunks come from. An unknown document has no chunks.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    async fn chunks(&self, kb_id: &str, document_id: &str) -> Result<Vec<Chunk>>;
}

/// Chunks held in memory, keyed by (kb, document).
#[derive(Default)]
pub struct MemoryChunkSource {
    documents: DashMap<(String, String), Vec<Chunk>>,
}

impl MemoryChunkSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, kb_id: &str, document_id: &str, mut chunks: Vec<Chunk>) {
        chunks.sort_by_key(|c| c.position);
        self.documents.insert((kb_id.to_string(), document_id.to_string()), chunks);
    }

    /// Chunks `text` and stores the result, returning the chunk count.
    pub fn insert_text(&self, chunker: &Chunker, kb_id: &str, document_id: &str, text: &str) -> usize {
        let chunks = chunker.chunk_text(kb_id, document_id, text);
        let count = chunks.len();
        self.insert(kb_id, document_id, chunks);
        count
    }
}

#[async_trait]
impl ChunkSource for MemoryChunkSource {
    async fn chunks(&self, kb_id: &str, document_id: &str) -> Result<Vec<Chunk>> {
        Ok(self
            .documents
            .get(&(kb_id.to_string(), document_id.to_string()))
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}
