//! Pipeline Orchestrator
//!
//! Drives source controls through embedding, candidate generation,
//! verification and aggregation. Each control is an independent unit: its
//! failures are recorded in the [`RunSummary`] and the run moves on. Only a
//! verification service that keeps failing stops the whole run.

pub mod cancel;
pub mod health;
pub mod orchestrator;
pub mod summary;

pub use cancel::CancelSignal;
pub use health::FailureMonitor;
pub use orchestrator::MappingPipeline;
pub use summary::{ControlReport, ControlStatus, FailureCategory, ItemFailure, RunSummary};

use crate::config::ConfigError;
use crate::embed::EmbedError;
use crate::graph::{ControlId, StandardId};
use crate::repository::RepositoryError;
use crate::verify::VerifyError;
use thiserror::Error;

/// Errors that end a run as a whole
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Embedding service setup failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("Verification service setup failed: {0}")]
    Verification(#[from] VerifyError),

    /// The verification service failed too many times in a row; the partial
    /// summary covers what ran before the halt
    #[error("Verification service failed {consecutive} consecutive times, run halted: {last_error}")]
    SystemicFailure {
        consecutive: usize,
        last_error: String,
        summary: Box<RunSummary>,
    },
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Source controls of a run
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSelection {
    /// Every control of one standard, in control id order
    Standard(StandardId),
    /// An explicit list, processed in the given order
    Controls(Vec<ControlId>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub sources: SourceSelection,
    /// Target standards; empty means the configured `target_standards`
    pub targets: Vec<StandardId>,
}

impl RunRequest {
    pub fn standard(standard: impl Into<StandardId>) -> Self {
        Self {
            sources: SourceSelection::Standard(standard.into()),
            targets: Vec::new(),
        }
    }

    pub fn controls<I, C>(controls: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ControlId>,
    {
        Self {
            sources: SourceSelection::Controls(controls.into_iter().map(Into::into).collect()),
            targets: Vec::new(),
        }
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StandardId>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }
}
