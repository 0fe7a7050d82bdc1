//! Typed knowledge-graph model shared by every stage: nodes, edges, change
//! tracking, merge algebra, centrality, n-hop paths, plus the error taxonomy
//! and the cancellation context the pipeline threads through its calls.

pub mod cancel;
pub mod change;
pub mod chunk;
pub mod error;
pub mod merge;
pub mod model;
pub mod pagerank;
pub mod paths;

pub use cancel::{CancelRegistry, LogProgress, MemoryCancelRegistry, ProgressSink, TaskContext, with_deadline};
pub use change::ChangeSet;
pub use chunk::{Chunk, estimate_tokens};
pub use error::{FailureKind, GraphRagError, is_canceled};
pub use merge::{AppendDistinct, DescriptionPolicy};
pub use model::{Edge, EdgeKey, GraphSnapshot, KnowledgeGraph, Node, Subgraph, UNKNOWN_TYPE};
pub use pagerank::{PageRankConfig, pagerank};
pub use paths::{NHopPath, all_n_hop_paths, n_hop_paths};
