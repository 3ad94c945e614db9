//! Control Repository
//!
//! Read access to standards and controls, read/write access to mapping edges.
//! Edge writes are atomic per source control and guarded by the revision the
//! caller read; a stale revision is reported as [`RepositoryError::WriteConflict`].

pub mod graph;

pub use graph::GraphRepository;

use crate::graph::{
    CommitReceipt, Control, ControlId, EdgeBatch, EdgeId, EdgeSnapshot, GraphError,
    GraphStatistics, MappingEdge, Standard, StandardId,
};
use crate::persistence::StorageError;
use async_trait::async_trait;
use thiserror::Error;

/// Repository errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// The control's edges changed since they were read
    #[error("Write conflict on {control}: expected revision {expected}, found {actual}")]
    WriteConflict {
        control: ControlId,
        expected: u64,
        actual: u64,
    },

    /// The write would break a graph invariant and was rejected as a whole
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

impl From<GraphError> for RepositoryError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::RevisionMismatch {
                control,
                expected,
                actual,
            } => RepositoryError::WriteConflict {
                control,
                expected,
                actual,
            },
            GraphError::StandardNotFound(_)
            | GraphError::ControlNotFound(_)
            | GraphError::EdgeNotFound(_) => RepositoryError::NotFound(e.to_string()),
            other => RepositoryError::InvariantViolation(other.to_string()),
        }
    }
}

/// Access to controls and their mapping edges
#[async_trait]
pub trait ControlRepository: Send + Sync {
    async fn get_standard(&self, id: &StandardId) -> RepositoryResult<Standard>;

    /// Controls of a standard, ordered by control id
    async fn get_controls(&self, standard: &StandardId) -> RepositoryResult<Vec<Control>>;

    async fn get_control(&self, id: &ControlId) -> RepositoryResult<Control>;

    async fn get_edge(&self, id: EdgeId) -> RepositoryResult<MappingEdge>;

    /// Outgoing edges of a control with the revision they were read at
    async fn snapshot_edges(&self, control: &ControlId) -> RepositoryResult<EdgeSnapshot>;

    /// Outgoing edges of a control, active and superseded, in creation order
    async fn get_edges(&self, control: &ControlId) -> RepositoryResult<Vec<MappingEdge>> {
        Ok(self.snapshot_edges(control).await?.edges)
    }

    /// Apply all edge changes of one source control atomically
    async fn write_edges(&self, batch: EdgeBatch) -> RepositoryResult<CommitReceipt>;

    async fn statistics(&self) -> RepositoryResult<GraphStatistics>;
}
