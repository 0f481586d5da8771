//! Knowledge retrieval for Grimoire NPCs.
//!
//! Background documents are chunked, embedded, and searched by cosine
//! similarity. The agent only sees the result through
//! [`grimoire_core::KnowledgeSource`].

pub mod chunk;
pub mod knowledge_base;
pub mod vector;

pub use chunk::chunk_markdown;
pub use knowledge_base::EmbeddingKnowledgeBase;
pub use vector::{SimilarityMatch, VectorRecord, VectorStore, cosine_similarity};
