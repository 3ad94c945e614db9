//! Verification of mapping candidates by a language model
//!
//! The model's reply is untrusted input: [`schema`] parses it against a fixed
//! JSON shape and rejects anything else, and [`VerificationAdapter`] retries a
//! rejected reply once with a stricter instruction before giving up.

pub mod adapter;
pub mod client;
pub mod prompt;
pub mod schema;

pub use adapter::VerificationAdapter;
pub use client::LlmClient;
pub use prompt::{build_prompt, VerificationPrompt};
pub use schema::{parse_response, ParsedJudgment};

use crate::graph::{ControlId, RelationKind, SimilarityCategory, VerifierIdentity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Verification errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerifyError {
    /// Timeout, connection failure or overloaded service
    #[error("Verification service unavailable: {0}")]
    Unavailable(String),

    /// The reply did not match the judgment schema, even after the strict retry
    #[error("Verification response rejected after {attempts} attempts: {reason}")]
    Parse { attempts: usize, reason: String },

    /// The service refused the request
    #[error("Verification API error: {0}")]
    Api(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl VerifyError {
    pub fn is_transient(&self) -> bool {
        matches!(self, VerifyError::Unavailable(_))
    }
}

pub type VerifyResult<T> = Result<T, VerifyError>;

/// Locally hosted language model answering verification prompts
#[async_trait]
pub trait VerificationService: Send + Sync {
    /// Send one prompt and return the raw reply text
    async fn complete(&self, prompt: &VerificationPrompt) -> VerifyResult<String>;

    /// Model name and version recorded on produced edges
    fn identity(&self) -> VerifierIdentity;
}

/// Typed verdict for one candidate pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingJudgment {
    pub source: ControlId,
    pub target: ControlId,
    pub kind: RelationKind,
    /// Within [0, 1]; clamped if the model answered out of range
    pub confidence: f64,
    pub rationale: String,
    /// Confidence was clamped
    pub low_trust: bool,
    pub verifier: VerifierIdentity,
    pub similarity: f32,
    pub similarity_category: SimilarityCategory,
    /// Stricter re-asks after a rejected reply (0 or 1)
    pub parse_retries: usize,
    /// Repeated requests after transport failures
    pub transport_retries: usize,
}

impl MappingJudgment {
    pub fn retries(&self) -> usize {
        self.parse_retries + self.transport_retries
    }
}
