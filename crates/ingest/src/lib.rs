pub mod chunker;
pub mod config;
pub mod orchestrator;
pub mod pipeline;
pub mod source;

pub use chunker::{Chunker, ChunkerConfig};
pub use config::{DocumentTimeout, PipelineConfig};
pub use orchestrator::{BatchOutcome, DocumentOrchestrator, FailedDocument};
pub use pipeline::{IngestReport, IngestionPipeline};
pub use source::{ChunkSource, MemoryChunkSource};
