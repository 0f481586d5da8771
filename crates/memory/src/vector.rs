//! Vector similarity and an in-memory vector store.

use serde::{Deserialize, Serialize};

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ or either vector is empty or zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    dot / denom
}

/// One embedded chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// A search hit.
#[derive(Debug, Clone)]
pub struct SimilarityMatch {
    pub record: VectorRecord,
    pub similarity: f64,
}

/// In-memory vector store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorStore {
    records: Vec<VectorRecord>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a chunk and its embedding; returns the new record id.
    pub fn add(&mut self, content: impl Into<String>, embedding: Vec<f32>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.records.push(VectorRecord {
            id: id.clone(),
            content: content.into(),
            embedding,
        });
        id
    }

    pub fn records(&self) -> &[VectorRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records at or above `min_similarity`, best first, at most `max_results`.
    pub fn search(
        &self,
        query_embedding: &[f32],
        min_similarity: f64,
        max_results: usize,
    ) -> Vec<SimilarityMatch> {
        let mut scored: Vec<SimilarityMatch> = self
            .records
            .iter()
            .filter_map(|record| {
                let similarity = cosine_similarity(&record.embedding, query_embedding);
                (similarity >= min_similarity).then(|| SimilarityMatch {
                    record: record.clone(),
                    similarity,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(max_results);
        scored
    }
}
