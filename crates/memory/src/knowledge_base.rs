//! Embedding-backed knowledge base.
//!
//! Chunks are embedded through the same [`Provider`] that serves chat, kept
//! in a [`VectorStore`], and retrieved by cosine similarity to the question.

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use grimoire_core::error::MemoryError;
use grimoire_core::provider::EmbeddingRequest;
use grimoire_core::{KnowledgeSource, Provider};

use crate::chunk::chunk_markdown;
use crate::vector::VectorStore;

/// Chunks per embedding request.
const EMBED_BATCH: usize = 16;

pub struct EmbeddingKnowledgeBase {
    provider: Arc<dyn Provider>,
    model: String,
    store: RwLock<VectorStore>,
    min_similarity: f64,
    max_results: usize,
}

impl EmbeddingKnowledgeBase {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            store: RwLock::new(VectorStore::new()),
            min_similarity: 0.5,
            max_results: 2,
        }
    }

    /// Set the similarity threshold and result cap.
    pub fn with_limits(mut self, min_similarity: f64, max_results: usize) -> Self {
        self.min_similarity = min_similarity;
        self.max_results = max_results;
        self
    }

    /// Embed and store `chunks`. Returns how many records were added.
    pub async fn index(&self, chunks: Vec<String>) -> Result<usize, MemoryError> {
        let mut added = 0;
        for batch in chunks.chunks(EMBED_BATCH) {
            let response = self
                .provider
                .embed(EmbeddingRequest {
                    model: self.model.clone(),
                    inputs: batch.to_vec(),
                })
                .await
                .map_err(|e| MemoryError::EmbeddingFailed(e.to_string()))?;

            if response.embeddings.len() != batch.len() {
                return Err(MemoryError::EmbeddingFailed(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    response.embeddings.len()
                )));
            }

            let mut store = self
                .store
                .write()
                .map_err(|e| MemoryError::Storage(e.to_string()))?;
            for (chunk, embedding) in batch.iter().zip(response.embeddings) {
                let id = store.add(chunk.clone(), embedding);
                debug!(id = %id, "Stored knowledge chunk");
                added += 1;
            }
        }
        Ok(added)
    }

    /// Chunk a markdown document by headings and index it.
    pub async fn index_markdown(&self, text: &str) -> Result<usize, MemoryError> {
        self.index(chunk_markdown(text)).await
    }

    /// Read a markdown file and index it.
    pub async fn index_markdown_file(&self, path: &Path) -> Result<usize, MemoryError> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            MemoryError::Storage(format!("cannot read {}: {e}", path.display()))
        })?;
        let added = self.index_markdown(&text).await?;
        info!(path = %path.display(), records = added, "Indexed knowledge file");
        Ok(added)
    }

    pub fn len(&self) -> usize {
        self.store.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KnowledgeSource for EmbeddingKnowledgeBase {
    async fn relevant_context(&self, query: &str) -> Result<String, MemoryError> {
        let response = self
            .provider
            .embed(EmbeddingRequest {
                model: self.model.clone(),
                inputs: vec![query.to_string()],
            })
            .await
            .map_err(|e| MemoryError::EmbeddingFailed(e.to_string()))?;

        let query_embedding = response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| MemoryError::EmbeddingFailed("no embedding for query".into()))?;

        let store = self
            .store
            .read()
            .map_err(|e| MemoryError::QueryFailed(e.to_string()))?;
        let hits = store.search(&query_embedding, self.min_similarity, self.max_results);

        for (i, hit) in hits.iter().enumerate() {
            debug!(rank = i + 1, id = %hit.record.id, similarity = hit.similarity, "Similar chunk");
        }

        Ok(hits
            .into_iter()
            .map(|h| h.record.content)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
