//! Knowledge source trait — retrieval for grounded NPC answers.

use async_trait::async_trait;

use crate::error::MemoryError;

/// Anything that can turn a question into supporting context.
///
/// An empty string means nothing relevant was found.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn relevant_context(&self, query: &str) -> Result<String, MemoryError>;
}
