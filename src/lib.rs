//! Controlmap
//!
//! Semantic mapping of controls between cybersecurity standards. Candidate
//! pairs are retrieved by embedding similarity, judged by a locally hosted
//! language model, and persisted as auditable mapping edges in a control graph.
//!
//! # Architecture
//!
//! Leaf-first:
//! - [`repository`]: controls and mapping edges, backed by the in-memory
//!   [`graph`] store and optionally RocksDB ([`persistence`])
//! - [`embed`]: embedding service client and the single-flight embedding cache
//! - [`candidate`]: top-k ranking of target controls by cosine similarity,
//!   with an HNSW index ([`vector`]) for large target standards
//! - [`verify`]: prompt building, strict response parsing and retries against
//!   the verification model
//! - [`mapping`]: reconciliation of judgments with existing edges, and analyst review
//! - [`pipeline`]: bounded-concurrency runs over batches of source controls
//!
//! ## Edge lifecycle
//!
//! - Edges are created only from judgments above the acceptance threshold
//! - At most one active edge per (source, target, relation kind)
//! - A materially different later judgment supersedes the old edge; nothing is deleted
//! - All edge writes for one source control commit atomically
//!
//! ## Example Usage
//!
//! ```rust
//! use controlmap::graph::{Control, EdgeBatch, EdgeDraft, GraphStore, MappingMethod,
//!     RelationKind, ReviewStatus, Standard, VerifierIdentity};
//!
//! let mut store = GraphStore::new();
//! store.insert_standard(Standard::new("NIST", "NIST SP 800-53", "rev5"));
//! store.insert_standard(Standard::new("CSF", "NIST CSF", "1.1"));
//! store.insert_control(Control::new("AC-2", "NIST", "Account Management")).unwrap();
//! store.insert_control(Control::new("PR.AC-1", "CSF", "Identities and credentials are managed")).unwrap();
//!
//! let mut batch = EdgeBatch::new("AC-2".into(), store.revision(&"AC-2".into()));
//! batch.create.push(EdgeDraft {
//!     source: "AC-2".into(),
//!     target: "PR.AC-1".into(),
//!     kind: RelationKind::Equivalent,
//!     confidence: 0.82,
//!     rationale: "Both govern the account lifecycle".to_string(),
//!     previous_rationale: None,
//!     verifier: VerifierIdentity::new("mistral", "7b"),
//!     method: MappingMethod::Llm,
//!     status: ReviewStatus::Unreviewed,
//!     low_trust: false,
//!     similarity: Some(0.78),
//!     similarity_category: None,
//! });
//! let receipt = store.commit(batch).unwrap();
//!
//! assert_eq!(receipt.created.len(), 1);
//! assert_eq!(store.statistics().active_edges, 1);
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod candidate;
pub mod config;
pub mod embed;
pub mod graph;
pub mod mapping;
pub mod persistence;
pub mod pipeline;
pub mod repository;
pub mod retry;
pub mod vector;
pub mod verify;

// Re-export main types for convenience
pub use graph::{
    Control, ControlId, EdgeId, GraphError, GraphResult, GraphStore, MappingEdge, RelationKind,
    ReviewStatus, Standard, StandardId, VerifierIdentity,
};

pub use persistence::{PersistentStorage, StorageError, StorageResult};

pub use repository::{ControlRepository, GraphRepository, RepositoryError, RepositoryResult};

pub use embed::{Embedding, EmbeddingCache, EmbeddingClient, EmbeddingService, EmbedError, EmbedResult};

pub use candidate::{CandidateError, CandidateGenerator, CandidateResult, MappingCandidate};

pub use verify::{
    LlmClient, MappingJudgment, VerificationAdapter, VerificationService, VerifyError, VerifyResult,
};

pub use mapping::{
    AggregationPolicy, MappingAggregator, ReconcileOutcome, ReviewError, ReviewService,
};

pub use pipeline::{
    CancelSignal, FailureCategory, MappingPipeline, PipelineError, PipelineResult, RunRequest,
    RunSummary, SourceSelection,
};

pub use config::{AppConfig, ConfigError, RunConfig};
pub use retry::RetryPolicy;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}
