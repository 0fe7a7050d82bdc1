pub mod context;
pub mod rewrite;
pub mod search;

pub use context::{CommunityRow, ContextRow, EntityRow, RelationRow, RetrievalContext, pack};
pub use rewrite::{LlmRewriter, QueryRewriter, Rewrite};
pub use search::{GraphSearchEngine, SearchConfig};
