use std::sync::Arc;

use common::{storage::db::SurrealDbClient, vector::VectorStore};
use llm_router::{LlmRouter, Summarizer};

pub mod context_builder;
pub mod init;
pub mod query;
pub mod reply;

pub use context_builder::{build_optimized_context, BuiltContext, ContextDoc, ContextMetadata};
pub use init::{InitEvent, InitResult};
pub use query::{Intent, QueryResult};
pub use reply::ContextStore;

/// Per-request retrieval dependencies: the caller resolves the tenant store
/// handle, everything else is process-wide.
#[derive(Clone)]
pub struct RetrievalDeps {
    pub store: Arc<SurrealDbClient>,
    pub vector: Arc<VectorStore>,
    pub router: Arc<LlmRouter>,
    pub summarizer: Arc<Summarizer>,
}
