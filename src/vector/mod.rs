//! Vector similarity search
//!
//! Exact cosine similarity plus HNSW approximate nearest neighbor indices for
//! target standards too large to scan exhaustively.

pub mod index;
pub mod manager;

pub use index::{cosine_similarity, CosineDistance, VectorError, VectorIndex, VectorResult};
pub use manager::{IndexKey, VectorIndexManager};
