//! Mapping edges between controls
//!
//! A mapping edge is a directed, persisted assertion of how a source control
//! relates to a target control. Edges are never deleted: a newer judgment
//! supersedes the old edge, which stays in the graph as history.

use super::types::{ControlId, EdgeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Slack used when comparing confidences against a tolerance
const CONFIDENCE_EPSILON: f64 = 1e-9;

/// Semantic relation between a source and a target control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// Both controls describe the same goal and scope
    Equivalent,
    /// The source covers everything in the target and more
    Broader,
    /// The source is a more specific part of the target
    Narrower,
    /// Overlapping topics, neither contains the other
    Related,
    /// Thematically unrelated
    Unrelated,
}

impl RelationKind {
    pub const ALL: [RelationKind; 5] = [
        RelationKind::Equivalent,
        RelationKind::Broader,
        RelationKind::Narrower,
        RelationKind::Related,
        RelationKind::Unrelated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Equivalent => "equivalent",
            RelationKind::Broader => "broader",
            RelationKind::Narrower => "narrower",
            RelationKind::Related => "related",
            RelationKind::Unrelated => "unrelated",
        }
    }

    /// Rank used to break exact confidence ties; higher is more specific
    pub fn specificity(&self) -> u8 {
        match self {
            RelationKind::Equivalent => 3,
            RelationKind::Broader | RelationKind::Narrower => 2,
            RelationKind::Related => 1,
            RelationKind::Unrelated => 0,
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a string is not one of the five relation kinds
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown relation kind '{0}'")]
pub struct ParseRelationKindError(pub String);

impl FromStr for RelationKind {
    type Err = ParseRelationKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        RelationKind::ALL
            .iter()
            .find(|kind| kind.as_str() == normalized)
            .copied()
            .ok_or_else(|| ParseRelationKindError(s.to_string()))
    }
}

/// Similarity band of a candidate pair, stored on edges for audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityCategory {
    High,
    Medium,
    Low,
    VeryLow,
}

impl SimilarityCategory {
    pub fn from_score(score: f32) -> Self {
        if score >= 0.75 {
            SimilarityCategory::High
        } else if score >= 0.5 {
            SimilarityCategory::Medium
        } else if score >= 0.3 {
            SimilarityCategory::Low
        } else {
            SimilarityCategory::VeryLow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityCategory::High => "high",
            SimilarityCategory::Medium => "medium",
            SimilarityCategory::Low => "low",
            SimilarityCategory::VeryLow => "very_low",
        }
    }
}

/// How an edge was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingMethod {
    Llm,
    Human,
}

impl MappingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingMethod::Llm => "llm",
            MappingMethod::Human => "human",
        }
    }
}

/// Analyst review state of an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Unreviewed,
    /// An analyst accepted the machine judgment as-is
    HumanValidated,
    /// An analyst authored or corrected the judgment
    Confirmed,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Unreviewed => "unreviewed",
            ReviewStatus::HumanValidated => "human_validated",
            ReviewStatus::Confirmed => "confirmed",
        }
    }
}

/// Identity of whoever produced a judgment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerifierIdentity {
    pub model: String,
    pub version: String,
}

impl VerifierIdentity {
    pub fn new(model: impl Into<String>, version: impl Into<String>) -> Self {
        VerifierIdentity {
            model: model.into(),
            version: version.into(),
        }
    }

    pub fn human() -> Self {
        VerifierIdentity::new("human", "-")
    }
}

impl fmt::Display for VerifierIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.model, self.version)
    }
}

/// An edge that has not been committed yet; the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDraft {
    pub source: ControlId,
    pub target: ControlId,
    pub kind: RelationKind,
    pub confidence: f64,
    pub rationale: String,
    pub previous_rationale: Option<String>,
    pub verifier: VerifierIdentity,
    pub method: MappingMethod,
    pub status: ReviewStatus,
    pub low_trust: bool,
    pub similarity: Option<f32>,
    pub similarity_category: Option<SimilarityCategory>,
}

impl EdgeDraft {
    /// Materialize the draft as a stored edge
    pub fn into_edge(self, id: EdgeId, created_at: i64) -> MappingEdge {
        MappingEdge {
            id,
            source: self.source,
            target: self.target,
            kind: self.kind,
            confidence: self.confidence,
            rationale: self.rationale,
            previous_rationale: self.previous_rationale,
            verifier: self.verifier,
            method: self.method,
            status: self.status,
            low_trust: self.low_trust,
            similarity: self.similarity,
            similarity_category: self.similarity_category,
            created_at,
            superseded: false,
            superseded_at: None,
        }
    }
}

/// A persisted mapping edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingEdge {
    pub id: EdgeId,

    /// Source control (edge goes FROM this control)
    pub source: ControlId,

    /// Target control (edge goes TO this control)
    pub target: ControlId,

    pub kind: RelationKind,

    /// Always within [0, 1]
    pub confidence: f64,

    pub rationale: String,

    /// Rationale of the edge this one replaced during human review
    pub previous_rationale: Option<String>,

    pub verifier: VerifierIdentity,

    pub method: MappingMethod,

    pub status: ReviewStatus,

    /// The verifier returned an out-of-range confidence that was clamped
    pub low_trust: bool,

    /// Embedding similarity of the candidate pair, if machine generated
    pub similarity: Option<f32>,

    pub similarity_category: Option<SimilarityCategory>,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    pub superseded: bool,

    /// When the edge was superseded (Unix milliseconds)
    pub superseded_at: Option<i64>,
}

impl MappingEdge {
    pub fn is_active(&self) -> bool {
        !self.superseded
    }

    /// Edges touched by an analyst are off limits for automated supersession
    pub fn is_reviewed(&self) -> bool {
        self.method == MappingMethod::Human || self.status != ReviewStatus::Unreviewed
    }

    /// Check if this edge goes FROM `source` TO `target`
    pub fn connects(&self, source: &ControlId, target: &ControlId) -> bool {
        &self.source == source && &self.target == target
    }

    /// True if a judgment of `kind` with `confidence` would replace this edge
    pub fn differs_from(&self, kind: RelationKind, confidence: f64, tolerance: f64) -> bool {
        self.kind != kind || (self.confidence - confidence).abs() > tolerance + CONFIDENCE_EPSILON
    }

    pub(crate) fn mark_superseded(&mut self, at: i64) {
        self.superseded = true;
        self.superseded_at = Some(at);
    }
}

impl PartialEq for MappingEdge {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MappingEdge {}

/// Current time in Unix milliseconds
pub(crate) fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
