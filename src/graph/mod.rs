//! Control graph data model
//!
//! This module implements the graph the mapping pipeline reads and writes:
//! - Standards and their controls, immutable once imported
//! - Directed mapping edges between controls, superseded but never deleted
//! - In-memory storage with hash-based adjacency lists
//! - Atomic per-source edge batches guarded by a revision counter

pub mod control;
pub mod edge;
pub mod property;
pub mod store;
pub mod types;

// Re-export main types
pub use control::{Control, ControlMetadata, Standard};
pub use edge::{
    EdgeDraft, MappingEdge, MappingMethod, ParseRelationKindError, RelationKind, ReviewStatus,
    SimilarityCategory, VerifierIdentity,
};
pub use property::{PropertyMap, PropertyValue};
pub use store::{
    CommitReceipt, EdgeBatch, EdgeSnapshot, GraphError, GraphResult, GraphStatistics, GraphStore,
    PreparedCommit,
};
pub use types::{ControlId, EdgeId, StandardId};
