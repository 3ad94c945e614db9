//! Mapping Aggregator
//!
//! Turns the judgments of one source control into a single [`EdgeBatch`]:
//! one winning judgment per target, compared against the target's active
//! edges. Planning is pure; [`MappingAggregator::commit`] wraps it with the
//! snapshot/write cycle and one retry on a write conflict.

use crate::config::RunConfig;
use crate::graph::{
    ControlId, EdgeBatch, EdgeDraft, EdgeSnapshot, MappingMethod, RelationKind, ReviewStatus,
};
use crate::repository::{ControlRepository, RepositoryError, RepositoryResult};
use crate::verify::MappingJudgment;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Thresholds applied when turning judgments into edges
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationPolicy {
    pub acceptance_threshold: f64,
    pub supersede_tolerance: f64,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.6,
            supersede_tolerance: 0.05,
        }
    }
}

impl From<&RunConfig> for AggregationPolicy {
    fn from(config: &RunConfig) -> Self {
        Self {
            acceptance_threshold: config.acceptance_threshold,
            supersede_tolerance: config.supersede_tolerance,
        }
    }
}

impl AggregationPolicy {
    fn accepts(&self, judgment: &MappingJudgment) -> bool {
        judgment.kind != RelationKind::Unrelated && judgment.confidence >= self.acceptance_threshold
    }
}

/// What a commit did for one source control
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub created: usize,
    pub superseded: usize,
    /// Targets whose active edge already matched the judgment
    pub unchanged: usize,
    /// Targets left alone because an analyst reviewed their edge
    pub protected: usize,
    /// Judgments dropped as unrelated or below the acceptance threshold
    pub discarded: usize,
    /// Edge revision after the commit
    pub revision: u64,
}

/// Planned writes for one source control
#[derive(Debug, Clone)]
pub struct EdgePlan {
    pub batch: EdgeBatch,
    pub outcome: ReconcileOutcome,
}

/// Pick the winning judgment per target
///
/// Highest confidence wins; on an exact tie the more specific kind wins
/// (equivalent > broader = narrower > related); a remaining tie keeps the
/// judgment that came first. Targets keep the order of their first judgment.
pub fn select_best<'a>(
    judgments: &'a [MappingJudgment],
    policy: &AggregationPolicy,
) -> IndexMap<&'a ControlId, &'a MappingJudgment> {
    let mut best: IndexMap<&ControlId, &MappingJudgment> = IndexMap::new();

    for judgment in judgments.iter().filter(|j| policy.accepts(j)) {
        match best.get_mut(&judgment.target) {
            Some(current) => {
                let better = judgment.confidence > current.confidence
                    || (judgment.confidence == current.confidence
                        && judgment.kind.specificity() > current.kind.specificity());
                if better {
                    *current = judgment;
                }
            }
            None => {
                best.insert(&judgment.target, judgment);
            }
        }
    }

    best
}

/// Plan the edge changes for `source` against its current edges
pub fn plan_edges(
    source: &ControlId,
    judgments: &[MappingJudgment],
    snapshot: &EdgeSnapshot,
    policy: &AggregationPolicy,
) -> EdgePlan {
    let mut batch = EdgeBatch::new(source.clone(), snapshot.revision);
    let mut outcome = ReconcileOutcome {
        revision: snapshot.revision,
        ..Default::default()
    };

    let best = select_best(judgments, policy);
    outcome.discarded = judgments.iter().filter(|j| !policy.accepts(j)).count();

    // Targets visited in judgment order so the batch is reproducible
    let mut seen: FxHashSet<&ControlId> = FxHashSet::default();
    for judgment in judgments {
        let target = &judgment.target;
        if !seen.insert(target) {
            continue;
        }

        let active: Vec<_> = snapshot.active_to(target).collect();
        if active.iter().any(|e| e.is_reviewed()) {
            outcome.protected += 1;
            continue;
        }

        match best.get(target) {
            Some(winner) => {
                let mut matched = false;
                for edge in &active {
                    if !matched
                        && !edge.differs_from(winner.kind, winner.confidence, policy.supersede_tolerance)
                    {
                        matched = true;
                    } else {
                        batch.retire.push(edge.id);
                    }
                }

                if matched {
                    outcome.unchanged += 1;
                } else {
                    batch.create.push(draft_from(source, winner));
                }
            }
            None => {
                // An explicit, confident "unrelated" retires the pair's edges;
                // an inconclusive judgment leaves them alone.
                let refuted = judgments.iter().any(|j| {
                    &j.target == target
                        && j.kind == RelationKind::Unrelated
                        && j.confidence >= policy.acceptance_threshold
                });
                if refuted {
                    batch.retire.extend(active.iter().map(|e| e.id));
                }
            }
        }
    }

    outcome.created = batch.create.len();
    outcome.superseded = batch.retire.len();
    EdgePlan { batch, outcome }
}

fn draft_from(source: &ControlId, judgment: &MappingJudgment) -> EdgeDraft {
    EdgeDraft {
        source: source.clone(),
        target: judgment.target.clone(),
        kind: judgment.kind,
        confidence: judgment.confidence,
        rationale: judgment.rationale.clone(),
        previous_rationale: None,
        verifier: judgment.verifier.clone(),
        method: MappingMethod::Llm,
        status: ReviewStatus::Unreviewed,
        low_trust: judgment.low_trust,
        similarity: Some(judgment.similarity),
        similarity_category: Some(judgment.similarity_category),
    }
}

/// Applies judgments to the repository, one source control at a time
pub struct MappingAggregator {
    repository: Arc<dyn ControlRepository>,
    policy: AggregationPolicy,
}

impl MappingAggregator {
    pub fn new(repository: Arc<dyn ControlRepository>, policy: AggregationPolicy) -> Self {
        Self { repository, policy }
    }

    pub fn policy(&self) -> &AggregationPolicy {
        &self.policy
    }

    /// Reconcile and atomically write the judgments of one source control
    ///
    /// A write conflict triggers one fresh snapshot and re-plan; a second
    /// conflict is returned to the caller.
    pub async fn commit(
        &self,
        source: &ControlId,
        judgments: &[MappingJudgment],
    ) -> RepositoryResult<ReconcileOutcome> {
        let mut conflicts = 0;
        loop {
            let snapshot = self.repository.snapshot_edges(source).await?;
            let plan = plan_edges(source, judgments, &snapshot, &self.policy);

            if plan.batch.is_empty() {
                debug!(source = %source, "no edge changes");
                return Ok(plan.outcome);
            }

            match self.repository.write_edges(plan.batch).await {
                Ok(receipt) => {
                    let outcome = ReconcileOutcome {
                        revision: receipt.revision,
                        ..plan.outcome
                    };
                    info!(
                        source = %source,
                        created = outcome.created,
                        superseded = outcome.superseded,
                        unchanged = outcome.unchanged,
                        revision = outcome.revision,
                        "edges committed"
                    );
                    return Ok(outcome);
                }
                Err(RepositoryError::WriteConflict { expected, actual, .. }) if conflicts == 0 => {
                    conflicts += 1;
                    warn!(source = %source, expected, actual, "write conflict, re-planning");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
