//! Candidate generation
//!
//! Ranks the controls of a target standard by cosine similarity to a source
//! control. Ranking itself is a pure function over embeddings
//! ([`rank_embeddings`]); [`CandidateGenerator`] fetches controls and
//! embeddings around it.

pub mod generator;
pub mod rank;

pub use generator::CandidateGenerator;
pub use rank::{rank_embeddings, ScoredTarget};

use crate::embed::EmbedError;
use crate::graph::{Control, SimilarityCategory};
use crate::repository::RepositoryError;
use crate::vector::VectorError;
use std::sync::Arc;
use thiserror::Error;

/// Candidate generation errors
#[derive(Error, Debug)]
pub enum CandidateError {
    /// Two embeddings from different model versions were compared
    #[error("Incompatible embedding versions: {source_version} vs {target_version}")]
    IncompatibleEmbeddingVersion {
        source_version: String,
        target_version: String,
    },

    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Vector(#[from] VectorError),
}

pub type CandidateResult<T> = Result<T, CandidateError>;

/// A similarity-ranked, unverified control pair
#[derive(Debug, Clone)]
pub struct MappingCandidate {
    pub source: Arc<Control>,
    pub target: Arc<Control>,
    /// Cosine similarity clamped to [0, 1]
    pub similarity: f32,
    pub category: SimilarityCategory,
}

impl MappingCandidate {
    pub fn new(source: Arc<Control>, target: Arc<Control>, similarity: f32) -> Self {
        Self {
            source,
            target,
            similarity,
            category: SimilarityCategory::from_score(similarity),
        }
    }
}
