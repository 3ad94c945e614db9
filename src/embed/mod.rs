//! Embeddings of control text
//!
//! The [`EmbeddingService`] trait is the seam to the external embedding model;
//! [`EmbeddingCache`] sits in front of it and guarantees each
//! (control, model version, text hash) key is computed at most once.

pub mod cache;
pub mod client;

pub use cache::EmbeddingCache;
pub use client::EmbeddingClient;

use crate::graph::{Control, ControlId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Embed errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbedError {
    /// Service unreachable, timed out or overloaded
    #[error("Embedding service unavailable: {0}")]
    Unavailable(String),

    /// The service answered with an error
    #[error("Embedding API error: {0}")]
    Api(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl EmbedError {
    /// Errors worth retrying under the embedding retry policy
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbedError::Unavailable(_))
    }
}

pub type EmbedResult<T> = Result<T, EmbedError>;

/// External embedding model
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed one piece of text with the given model version
    async fn embed(&self, text: &str, model_version: &str) -> EmbedResult<Vec<f32>>;
}

/// Cache key of an embedding
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmbeddingKey {
    pub control_id: ControlId,
    pub model_version: String,
    pub text_hash: String,
}

impl EmbeddingKey {
    pub fn for_control(control: &Control, model_version: &str) -> Self {
        EmbeddingKey {
            control_id: control.id.clone(),
            model_version: model_version.to_string(),
            text_hash: control.text_hash(),
        }
    }
}

/// The vector of one control under one embedding model version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub control_id: ControlId,
    pub model_version: String,
    pub text_hash: String,
    pub vector: Vec<f32>,
}

impl Embedding {
    pub fn key(&self) -> EmbeddingKey {
        EmbeddingKey {
            control_id: self.control_id.clone(),
            model_version: self.model_version.clone(),
            text_hash: self.text_hash.clone(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.vector.len()
    }
}

/// Character-based text splitter with overlap
///
/// Splits on character boundaries, never inside a UTF-8 sequence.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chunk_size == 0 || chars.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let step = chunk_size.saturating_sub(chunk_overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = std::cmp::min(start + chunk_size, chars.len());
        chunks.push(chars[start..end].iter().collect());

        if end == chars.len() {
            break;
        }

        start += step;
    }

    chunks
}

/// Element-wise mean of equally sized vectors
pub fn mean_pool(vectors: &[Vec<f32>]) -> EmbedResult<Vec<f32>> {
    let first = vectors
        .first()
        .ok_or_else(|| EmbedError::Api("no vectors to pool".to_string()))?;
    let dims = first.len();

    let mut sum = vec![0.0f32; dims];
    for vector in vectors {
        if vector.len() != dims {
            return Err(EmbedError::DimensionMismatch {
                expected: dims,
                got: vector.len(),
            });
        }
        for (acc, v) in sum.iter_mut().zip(vector) {
            *acc += v;
        }
    }

    let n = vectors.len() as f32;
    Ok(sum.into_iter().map(|v| v / n).collect())
}
