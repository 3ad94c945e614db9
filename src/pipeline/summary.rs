//! Run summary

use crate::candidate::CandidateError;
use crate::embed::EmbedError;
use crate::graph::{ControlId, VerifierIdentity};
use crate::mapping::ReconcileOutcome;
use crate::repository::RepositoryError;
use crate::vector::VectorError;
use crate::verify::VerifyError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Failure classes reported by a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    EmbeddingUnavailable,
    IncompatibleEmbeddingVersion,
    VerificationUnavailable,
    VerificationParseError,
    RepositoryWriteConflict,
    Repository,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::EmbeddingUnavailable => "embedding_unavailable",
            FailureCategory::IncompatibleEmbeddingVersion => "incompatible_embedding_version",
            FailureCategory::VerificationUnavailable => "verification_unavailable",
            FailureCategory::VerificationParseError => "verification_parse_error",
            FailureCategory::RepositoryWriteConflict => "repository_write_conflict",
            FailureCategory::Repository => "repository",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&RepositoryError> for FailureCategory {
    fn from(e: &RepositoryError) -> Self {
        match e {
            RepositoryError::WriteConflict { .. } => FailureCategory::RepositoryWriteConflict,
            _ => FailureCategory::Repository,
        }
    }
}

impl From<&VerifyError> for FailureCategory {
    fn from(e: &VerifyError) -> Self {
        match e {
            VerifyError::Parse { .. } => FailureCategory::VerificationParseError,
            _ => FailureCategory::VerificationUnavailable,
        }
    }
}

impl From<&CandidateError> for FailureCategory {
    fn from(e: &CandidateError) -> Self {
        match e {
            CandidateError::IncompatibleEmbeddingVersion { .. }
            | CandidateError::Embedding(EmbedError::DimensionMismatch { .. })
            | CandidateError::Vector(VectorError::DimensionMismatch { .. }) => {
                FailureCategory::IncompatibleEmbeddingVersion
            }
            CandidateError::Embedding(_) => FailureCategory::EmbeddingUnavailable,
            CandidateError::Repository(e) => e.into(),
            CandidateError::Vector(_) => FailureCategory::Repository,
        }
    }
}

/// How one source control ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    /// Every candidate was judged and the edges were committed
    Succeeded,
    /// Some candidates failed; the judged ones were committed
    Partial,
    /// No candidate could be judged, or the commit failed
    Failed,
    /// Stopped by the cancellation signal before committing
    Cancelled,
    /// Not started because the run was halting
    Skipped,
}

impl ControlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlStatus::Succeeded => "succeeded",
            ControlStatus::Partial => "partial",
            ControlStatus::Failed => "failed",
            ControlStatus::Cancelled => "cancelled",
            ControlStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ControlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub category: FailureCategory,
    /// Target control of the failed candidate, if the failure was per candidate
    pub target: Option<ControlId>,
    pub message: String,
}

/// Result of processing one source control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReport {
    pub control: ControlId,
    pub status: ControlStatus,
    pub candidates: usize,
    pub verified: usize,
    pub retries: usize,
    pub low_trust: usize,
    pub outcome: Option<ReconcileOutcome>,
    pub failures: Vec<ItemFailure>,
}

impl ControlReport {
    pub fn new(control: ControlId) -> Self {
        Self {
            control,
            status: ControlStatus::Succeeded,
            candidates: 0,
            verified: 0,
            retries: 0,
            low_trust: 0,
            outcome: None,
            failures: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: ControlStatus) -> Self {
        self.status = status;
        self
    }

    pub fn fail(&mut self, category: FailureCategory, target: Option<ControlId>, message: impl Into<String>) {
        self.failures.push(ItemFailure {
            category,
            target,
            message: message.into(),
        });
    }

    /// Counts toward `controls_processed`
    pub fn was_processed(&self) -> bool {
        matches!(
            self.status,
            ControlStatus::Succeeded | ControlStatus::Partial | ControlStatus::Failed
        )
    }
}

/// Structured report of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Unix milliseconds
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub embedding_model_version: String,
    pub verifier: VerifierIdentity,

    pub controls_processed: usize,
    pub controls_succeeded: usize,
    pub controls_partial: usize,
    pub controls_failed: usize,
    pub controls_cancelled: usize,
    pub controls_skipped: usize,

    pub candidates_generated: usize,
    pub candidates_verified: usize,
    pub verification_retries: usize,
    pub low_trust_judgments: usize,

    pub edges_created: usize,
    pub edges_superseded: usize,
    pub edges_unchanged: usize,
    pub edges_protected: usize,

    pub failures_by_category: BTreeMap<FailureCategory, usize>,
    pub controls: Vec<ControlReport>,
}

impl RunSummary {
    pub fn new(embedding_model_version: impl Into<String>, verifier: VerifierIdentity) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: chrono::Utc::now().timestamp_millis(),
            finished_at: None,
            embedding_model_version: embedding_model_version.into(),
            verifier,
            controls_processed: 0,
            controls_succeeded: 0,
            controls_partial: 0,
            controls_failed: 0,
            controls_cancelled: 0,
            controls_skipped: 0,
            candidates_generated: 0,
            candidates_verified: 0,
            verification_retries: 0,
            low_trust_judgments: 0,
            edges_created: 0,
            edges_superseded: 0,
            edges_unchanged: 0,
            edges_protected: 0,
            failures_by_category: BTreeMap::new(),
            controls: Vec::new(),
        }
    }

    /// Fold one control's report into the totals
    pub fn record(&mut self, report: ControlReport) {
        if report.was_processed() {
            self.controls_processed += 1;
        }
        match report.status {
            ControlStatus::Succeeded => self.controls_succeeded += 1,
            ControlStatus::Partial => self.controls_partial += 1,
            ControlStatus::Failed => self.controls_failed += 1,
            ControlStatus::Cancelled => self.controls_cancelled += 1,
            ControlStatus::Skipped => self.controls_skipped += 1,
        }

        self.candidates_generated += report.candidates;
        self.candidates_verified += report.verified;
        self.verification_retries += report.retries;
        self.low_trust_judgments += report.low_trust;

        if let Some(outcome) = &report.outcome {
            self.edges_created += outcome.created;
            self.edges_superseded += outcome.superseded;
            self.edges_unchanged += outcome.unchanged;
            self.edges_protected += outcome.protected;
        }

        for failure in &report.failures {
            *self.failures_by_category.entry(failure.category).or_insert(0) += 1;
        }

        self.controls.push(report);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(chrono::Utc::now().timestamp_millis());
    }

    pub fn failure_count(&self) -> usize {
        self.failures_by_category.values().sum()
    }

    pub fn failures(&self, category: FailureCategory) -> usize {
        self.failures_by_category.get(&category).copied().unwrap_or(0)
    }

    pub fn report(&self, control: &ControlId) -> Option<&ControlReport> {
        self.controls.iter().find(|r| &r.control == control)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_totals() {
        let mut summary = RunSummary::new("nomic-embed-text", VerifierIdentity::new("mistral", "7b"));

        let mut ok = ControlReport::new(ControlId::new("AC-2"));
        ok.candidates = 3;
        ok.verified = 3;
        ok.retries = 1;
        ok.outcome = Some(ReconcileOutcome {
            created: 2,
            superseded: 1,
            ..Default::default()
        });
        summary.record(ok);

        let mut failed = ControlReport::new(ControlId::new("AC-3")).with_status(ControlStatus::Failed);
        failed.fail(FailureCategory::EmbeddingUnavailable, None, "connection refused");
        summary.record(failed);

        summary.record(ControlReport::new(ControlId::new("AC-4")).with_status(ControlStatus::Cancelled));

        assert_eq!(summary.controls_processed, 2);
        assert_eq!(summary.controls_succeeded, 1);
        assert_eq!(summary.controls_failed, 1);
        assert_eq!(summary.controls_cancelled, 1);
        assert_eq!(summary.candidates_verified, 3);
        assert_eq!(summary.verification_retries, 1);
        assert_eq!(summary.edges_created, 2);
        assert_eq!(summary.edges_superseded, 1);
        assert_eq!(summary.failures(FailureCategory::EmbeddingUnavailable), 1);
        assert_eq!(summary.failure_count(), 1);
        assert!(summary.report(&ControlId::new("AC-3")).is_some());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            FailureCategory::from(&VerifyError::Parse {
                attempts: 2,
                reason: "not json".to_string()
            }),
            FailureCategory::VerificationParseError
        );
        assert_eq!(
            FailureCategory::from(&VerifyError::Unavailable("timeout".to_string())),
            FailureCategory::VerificationUnavailable
        );
        assert_eq!(
            FailureCategory::from(&CandidateError::Embedding(EmbedError::Unavailable(
                "down".to_string()
            ))),
            FailureCategory::EmbeddingUnavailable
        );
        assert_eq!(
            FailureCategory::from(&RepositoryError::WriteConflict {
                control: ControlId::new("AC-2"),
                expected: 1,
                actual: 2
            }),
            FailureCategory::RepositoryWriteConflict
        );
    }

    #[test]
    fn test_summary_serializes_categories_as_keys() {
        let mut summary = RunSummary::new("v1", VerifierIdentity::new("stub", "1"));
        let mut report = ControlReport::new(ControlId::new("AC-2")).with_status(ControlStatus::Partial);
        report.fail(FailureCategory::VerificationParseError, Some(ControlId::new("PR.AC-1")), "bad");
        summary.record(report);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["failures_by_category"]["verification_parse_error"], 1);
        assert_eq!(json["controls"][0]["status"], "partial");
    }
}
