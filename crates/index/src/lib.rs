//! Document/index store, embeddings, the kb lock, and the two stages that
//! mutate a SharedGraph under that lock: merge and entity resolution.

pub mod embeddings;
pub mod graph_store;
pub mod lock;
pub mod memory;
pub mod merge;
pub mod records;
pub mod resolution;
pub mod store;

pub use embeddings::{CachedEmbedder, Embedder, EmbeddingClient, HashingEmbedder, cosine_similarity};
pub use graph_store::{GraphStore, IndexStats, PersistStats, type_samples};
pub use lock::{DistributedLock, LocalLockService, LockConfig, LockService, graph_lock_name, with_lock};
pub use memory::MemoryStore;
pub use merge::{GraphMergeEngine, MergeOutcome};
pub use records::{CommunityReport, EntityRecord, IndexRecord, RecordBody, RecordKind, RelationRecord, TypeSamplesRecord};
pub use resolution::{EntityResolutionStage, ResolutionOutcome, Resolver, resolution_scope};
pub use store::{Condition, DocStore, EntityRefresh, Filter, OrderBy, SearchHit, SearchRequest, get_one};
