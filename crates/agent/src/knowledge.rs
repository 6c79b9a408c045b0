use std::sync::Arc;

use leadwise_core::RetrievedChunk;
use leadwise_db::repositories::KnowledgeRepository;
use tracing::{debug, warn};

use crate::llm::LlmClient;

/// Query side of the knowledge store: embed the question, read back the nearest chunks.
#[derive(Clone)]
pub struct KnowledgeBase {
    store: Arc<dyn KnowledgeRepository>,
    llm: Option<Arc<dyn LlmClient>>,
    top_k: usize,
}

impl KnowledgeBase {
    pub fn new(
        store: Arc<dyn KnowledgeRepository>,
        llm: Option<Arc<dyn LlmClient>>,
        top_k: usize,
    ) -> Self {
        Self { store, llm, top_k: top_k.max(1) }
    }

    /// Empty whenever grounding is unavailable; never an error.
    pub async fn retrieve(&self, query: &str) -> Vec<RetrievedChunk> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        let Some(llm) = &self.llm else {
            debug!(
                event_name = "conversation.knowledge.provider_absent",
                "no embedding provider configured; skipping retrieval"
            );
            return Vec::new();
        };

        let vector = match llm.embed(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.swap_remove(0),
            Ok(_) => Vec::new(),
            Err(error) => {
                warn!(
                    event_name = "conversation.knowledge.embedding_failed",
                    error = %error,
                    "query embedding failed; answering without grounding"
                );
                return Vec::new();
            }
        };
        if vector.is_empty() {
            return Vec::new();
        }

        match self.store.nearest(&vector, self.top_k).await {
            Ok(chunks) => {
                debug!(
                    event_name = "conversation.knowledge.retrieved",
                    chunks = chunks.len(),
                    "knowledge chunks retrieved"
                );
                chunks
            }
            Err(error) => {
                warn!(
                    event_name = "conversation.knowledge.store_failed",
                    error = %error,
                    "knowledge store query failed; answering without grounding"
                );
                Vec::new()
            }
        }
    }
}
