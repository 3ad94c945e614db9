//! Analyst review of mapping edges
//!
//! Reviewed edges are never superseded by automated runs. Revising or
//! rejecting an edge supersedes it, so the machine judgment stays in the
//! history.

use crate::graph::{
    CommitReceipt, EdgeBatch, EdgeDraft, EdgeId, MappingEdge, MappingMethod, RelationKind,
    ReviewStatus, VerifierIdentity,
};
use crate::repository::{ControlRepository, RepositoryError};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("Edge {0} is superseded and can no longer be reviewed")]
    EdgeSuperseded(EdgeId),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type ReviewResult<T> = Result<T, ReviewError>;

pub struct ReviewService {
    repository: Arc<dyn ControlRepository>,
}

impl ReviewService {
    pub fn new(repository: Arc<dyn ControlRepository>) -> Self {
        Self { repository }
    }

    /// Accept an edge as-is
    pub async fn confirm(&self, edge_id: EdgeId) -> ReviewResult<MappingEdge> {
        self.apply(edge_id, |edge, batch| {
            batch.review.push((edge.id, ReviewStatus::HumanValidated));
        })
        .await?;
        info!(edge = %edge_id, "edge confirmed");
        Ok(self.repository.get_edge(edge_id).await?)
    }

    /// Replace an edge with an analyst-authored judgment
    pub async fn revise(
        &self,
        edge_id: EdgeId,
        kind: RelationKind,
        rationale: impl Into<String>,
    ) -> ReviewResult<MappingEdge> {
        let rationale = rationale.into();
        let receipt = self
            .apply(edge_id, |edge, batch| {
                batch.retire.push(edge.id);
                batch.create.push(EdgeDraft {
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    kind,
                    confidence: 1.0,
                    rationale: rationale.clone(),
                    previous_rationale: Some(edge.rationale.clone()),
                    verifier: VerifierIdentity::human(),
                    method: MappingMethod::Human,
                    status: ReviewStatus::Confirmed,
                    low_trust: false,
                    similarity: edge.similarity,
                    similarity_category: edge.similarity_category,
                });
            })
            .await?;

        let new_id = receipt
            .created
            .first()
            .copied()
            .ok_or_else(|| RepositoryError::InvariantViolation("revision created no edge".to_string()))?;
        info!(edge = %edge_id, replacement = %new_id, kind = %kind, "edge revised");
        Ok(self.repository.get_edge(new_id).await?)
    }

    /// Supersede an edge without replacement
    pub async fn reject(&self, edge_id: EdgeId) -> ReviewResult<MappingEdge> {
        self.apply(edge_id, |edge, batch| {
            batch.retire.push(edge.id);
        })
        .await?;
        info!(edge = %edge_id, "edge rejected");
        Ok(self.repository.get_edge(edge_id).await?)
    }

    /// Build a batch from the edge's current state and write it, re-reading once on conflict
    async fn apply<F>(&self, edge_id: EdgeId, build: F) -> ReviewResult<CommitReceipt>
    where
        F: Fn(&MappingEdge, &mut EdgeBatch) + Send + Sync,
    {
        let mut conflicts = 0;
        loop {
            let edge = self.repository.get_edge(edge_id).await?;
            if !edge.is_active() {
                return Err(ReviewError::EdgeSuperseded(edge_id));
            }

            let snapshot = self.repository.snapshot_edges(&edge.source).await?;
            let mut batch = EdgeBatch::new(edge.source.clone(), snapshot.revision);
            build(&edge, &mut batch);

            // A revision may collide with another active edge of the new kind
            for draft in &batch.create {
                for other in snapshot.active_to(&draft.target) {
                    if other.id != edge.id && other.kind == draft.kind {
                        batch.retire.push(other.id);
                    }
                }
            }

            match self.repository.write_edges(batch).await {
                Ok(receipt) => return Ok(receipt),
                Err(RepositoryError::WriteConflict { .. }) if conflicts == 0 => conflicts += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Control, ControlId, Standard};
    use crate::repository::GraphRepository;

    async fn repo_with_edge() -> (Arc<GraphRepository>, EdgeId) {
        let repo = Arc::new(GraphRepository::new());
        repo.import_standard(
            Standard::new("NIST", "NIST SP 800-53", "rev5"),
            vec![Control::new("AC-2", "NIST", "Account Management")],
        )
        .await
        .unwrap();
        repo.import_standard(
            Standard::new("CSF", "NIST CSF", "1.1"),
            vec![Control::new("PR.AC-1", "CSF", "Identities and credentials are managed")],
        )
        .await
        .unwrap();

        let mut batch = EdgeBatch::new(ControlId::new("AC-2"), 0);
        batch.create.push(EdgeDraft {
            source: ControlId::new("AC-2"),
            target: ControlId::new("PR.AC-1"),
            kind: RelationKind::Related,
            confidence: 0.7,
            rationale: "model rationale".to_string(),
            previous_rationale: None,
            verifier: VerifierIdentity::new("mistral", "7b"),
            method: MappingMethod::Llm,
            status: ReviewStatus::Unreviewed,
            low_trust: false,
            similarity: Some(0.8),
            similarity_category: None,
        });
        let receipt = repo.write_edges(batch).await.unwrap();
        (repo, receipt.created[0])
    }

    #[tokio::test]
    async fn test_confirm() {
        let (repo, edge_id) = repo_with_edge().await;
        let review = ReviewService::new(repo.clone());

        let edge = review.confirm(edge_id).await.unwrap();
        assert_eq!(edge.status, ReviewStatus::HumanValidated);
        assert!(edge.is_active());
        assert!(edge.is_reviewed());
    }

    #[tokio::test]
    async fn test_revise_supersedes_and_keeps_history() {
        let (repo, edge_id) = repo_with_edge().await;
        let review = ReviewService::new(repo.clone());

        let revised = review
            .revise(edge_id, RelationKind::Equivalent, "same requirement")
            .await
            .unwrap();
        assert_eq!(revised.kind, RelationKind::Equivalent);
        assert_eq!(revised.confidence, 1.0);
        assert_eq!(revised.method, MappingMethod::Human);
        assert_eq!(revised.status, ReviewStatus::Confirmed);
        assert_eq!(revised.previous_rationale.as_deref(), Some("model rationale"));

        let old = repo.get_edge(edge_id).await.unwrap();
        assert!(old.superseded);
        assert_eq!(repo.get_edges(&ControlId::new("AC-2")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_revise_to_same_kind() {
        let (repo, edge_id) = repo_with_edge().await;
        let review = ReviewService::new(repo.clone());

        let revised = review.revise(edge_id, RelationKind::Related, "checked").await.unwrap();
        assert_eq!(revised.kind, RelationKind::Related);
        assert_eq!(repo.statistics().await.unwrap().active_edges, 1);
    }

    #[tokio::test]
    async fn test_reject_and_superseded_edge_cannot_be_reviewed() {
        let (repo, edge_id) = repo_with_edge().await;
        let review = ReviewService::new(repo.clone());

        let rejected = review.reject(edge_id).await.unwrap();
        assert!(rejected.superseded);
        assert_eq!(repo.statistics().await.unwrap().active_edges, 0);

        assert!(matches!(
            review.confirm(edge_id).await,
            Err(ReviewError::EdgeSuperseded(_))
        ));
    }
}
