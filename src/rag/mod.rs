//! Semantic retrieval support: the embedding port, similarity metric and
//! embedding providers.

pub mod core;
pub mod embeddings;

pub use self::core::{cosine_similarity, Embedding, EmbeddingProvider};
pub use embeddings::build_embedder;
