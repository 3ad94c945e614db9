//! End-to-end mapping runs

use super::{
    CancelSignal, ControlReport, ControlStatus, FailureCategory, FailureMonitor, PipelineError,
    PipelineResult, RunRequest, RunSummary, SourceSelection,
};
use crate::candidate::{CandidateGenerator, MappingCandidate};
use crate::config::{AppConfig, RunConfig};
use crate::embed::{EmbeddingCache, EmbeddingClient};
use crate::graph::{Control, StandardId, VerifierIdentity};
use crate::mapping::{AggregationPolicy, MappingAggregator};
use crate::repository::{ControlRepository, GraphRepository, RepositoryError};
use crate::verify::{LlmClient, MappingJudgment, VerificationAdapter, VerificationService, VerifyError};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Result of one verification slot
enum Verdict {
    Judged(MappingJudgment),
    /// Failed after the given number of retries
    Failed(VerifyError, usize),
    /// Not dispatched because the run was cancelled
    Cancelled,
    /// Not dispatched because the failure monitor tripped
    Halted,
}

pub struct MappingPipeline {
    repository: Arc<dyn ControlRepository>,
    cache: Arc<EmbeddingCache>,
    generator: CandidateGenerator,
    adapter: VerificationAdapter,
    aggregator: MappingAggregator,
    verifier: VerifierIdentity,
    config: RunConfig,
    /// Bounds in-flight verification calls across all controls of a run
    verification_permits: Semaphore,
}

impl MappingPipeline {
    pub fn new(
        repository: Arc<dyn ControlRepository>,
        cache: Arc<EmbeddingCache>,
        verifier: Arc<dyn VerificationService>,
        config: RunConfig,
    ) -> Self {
        let mut generator = CandidateGenerator::new(
            Arc::clone(&repository),
            Arc::clone(&cache),
            config.embedding_model_version.clone(),
        );
        if let Some(threshold) = config.ann_threshold {
            generator = generator.with_ann_threshold(threshold);
        }
        let aggregator =
            MappingAggregator::new(Arc::clone(&repository), AggregationPolicy::from(&config));

        Self {
            repository,
            cache,
            generator,
            verifier: verifier.identity(),
            adapter: VerificationAdapter::new(verifier).with_retry(config.verification_retry.clone()),
            aggregator,
            verification_permits: Semaphore::new(config.verification_concurrency.max(1)),
            config,
        }
    }

    /// Wire the HTTP services and the durable embedding cache from configuration
    pub fn from_config(config: &AppConfig, repository: Arc<GraphRepository>) -> PipelineResult<Self> {
        config.validate_services()?;

        let embedder = Arc::new(EmbeddingClient::new(&config.embedding)?);
        let mut cache = EmbeddingCache::new(embedder, config.run.embedding_concurrency)
            .with_retry(config.run.embedding_retry.clone())
            .with_chunking(config.embedding.max_chunk_chars, config.embedding.chunk_overlap);
        if let Some(storage) = repository.storage() {
            cache = cache.with_storage(storage);
        }

        let verifier = Arc::new(LlmClient::new(&config.verifier)?);
        Ok(Self::new(repository, Arc::new(cache), verifier, config.run.clone()))
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn embedding_cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    /// Run the pipeline over the requested source controls
    ///
    /// Per-control failures end up in the summary. The run itself fails only
    /// on invalid configuration, unknown standards, or a verification service
    /// that keeps failing, in which case the partial summary is attached to
    /// [`PipelineError::SystemicFailure`].
    pub async fn run(&self, request: RunRequest, cancel: &CancelSignal) -> PipelineResult<RunSummary> {
        let targets = if request.targets.is_empty() {
            self.config.target_standards.clone()
        } else {
            request.targets
        };
        RunConfig {
            target_standards: targets.clone(),
            ..self.config.clone()
        }
        .validate()?;
        for standard in &targets {
            self.repository.get_standard(standard).await?;
        }

        let mut summary = RunSummary::new(&self.config.embedding_model_version, self.verifier.clone());
        info!(
            run_id = %summary.run_id,
            model_version = %self.config.embedding_model_version,
            verifier = %self.verifier,
            targets = targets.len(),
            "mapping run started"
        );

        let (sources, unresolved) = self.resolve_sources(&request.sources).await?;
        for report in unresolved {
            summary.record(report);
        }

        let monitor = FailureMonitor::new(self.config.systemic_failure_threshold);
        let targets = targets.as_slice();
        let monitor_ref = &monitor;
        let reports: Vec<ControlReport> = stream::iter(sources)
            .map(move |source| self.process_control(source, targets, cancel, monitor_ref))
            .buffered(self.config.control_concurrency.max(1))
            .collect()
            .await;
        for report in reports {
            summary.record(report);
        }
        summary.finish();

        if monitor.is_tripped() {
            let last_error = monitor.last_error().unwrap_or_default();
            error!(
                run_id = %summary.run_id,
                processed = summary.controls_processed,
                skipped = summary.controls_skipped,
                "mapping run halted by verification outage"
            );
            return Err(PipelineError::SystemicFailure {
                consecutive: monitor.threshold(),
                last_error,
                summary: Box::new(summary),
            });
        }

        info!(
            run_id = %summary.run_id,
            processed = summary.controls_processed,
            failed = summary.controls_failed,
            cancelled = summary.controls_cancelled,
            created = summary.edges_created,
            superseded = summary.edges_superseded,
            failures = summary.failure_count(),
            "mapping run finished"
        );
        Ok(summary)
    }

    /// Load the source controls; unknown ids in an explicit list become failed reports
    async fn resolve_sources(
        &self,
        selection: &SourceSelection,
    ) -> PipelineResult<(Vec<Arc<Control>>, Vec<ControlReport>)> {
        match selection {
            SourceSelection::Standard(standard) => {
                let controls = self.repository.get_controls(standard).await?;
                Ok((controls.into_iter().map(Arc::new).collect(), Vec::new()))
            }
            SourceSelection::Controls(ids) => {
                let mut controls = Vec::with_capacity(ids.len());
                let mut unresolved = Vec::new();
                for id in ids {
                    match self.repository.get_control(id).await {
                        Ok(control) => controls.push(Arc::new(control)),
                        Err(e @ RepositoryError::NotFound(_)) => {
                            warn!(control = %id, "unknown source control");
                            let mut report =
                                ControlReport::new(id.clone()).with_status(ControlStatus::Failed);
                            report.fail(FailureCategory::Repository, None, e.to_string());
                            unresolved.push(report);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok((controls, unresolved))
            }
        }
    }

    async fn process_control(
        &self,
        source: Arc<Control>,
        targets: &[StandardId],
        cancel: &CancelSignal,
        monitor: &FailureMonitor,
    ) -> ControlReport {
        let report = ControlReport::new(source.id.clone());
        if cancel.is_cancelled() {
            return report.with_status(ControlStatus::Cancelled);
        }
        if monitor.is_tripped() {
            return report.with_status(ControlStatus::Skipped);
        }
        self.map_control(&source, targets, cancel, monitor, report).await
    }

    async fn map_control(
        &self,
        source: &Arc<Control>,
        targets: &[StandardId],
        cancel: &CancelSignal,
        monitor: &FailureMonitor,
        mut report: ControlReport,
    ) -> ControlReport {
        let mut candidates: Vec<MappingCandidate> = Vec::new();
        for standard in targets {
            // Each target standard may call the embedding service
            if cancel.is_cancelled() {
                return report.with_status(ControlStatus::Cancelled);
            }
            match self
                .generator
                .rank_candidates(
                    source,
                    standard,
                    self.config.candidate_count,
                    self.config.min_similarity,
                )
                .await
            {
                Ok(found) => candidates.extend(found),
                Err(e) => {
                    warn!(control = %source.id, target_standard = %standard, error = %e, "candidate generation failed");
                    report.fail(FailureCategory::from(&e), None, e.to_string());
                    return report.with_status(ControlStatus::Failed);
                }
            }
        }
        report.candidates = candidates.len();

        // join_all keeps candidate order regardless of completion order
        let verdicts = join_all(
            candidates
                .iter()
                .map(|candidate| self.verify(candidate, cancel, monitor)),
        )
        .await;

        let mut judgments = Vec::with_capacity(verdicts.len());
        let mut interrupted: Option<ControlStatus> = None;
        for (candidate, verdict) in candidates.iter().zip(verdicts) {
            match verdict {
                Verdict::Judged(judgment) => {
                    report.verified += 1;
                    report.retries += judgment.retries();
                    if judgment.low_trust {
                        report.low_trust += 1;
                    }
                    judgments.push(judgment);
                }
                Verdict::Failed(e, retries) => {
                    report.retries += retries;
                    warn!(
                        control = %source.id,
                        target = %candidate.target.id,
                        error = %e,
                        "verification failed"
                    );
                    report.fail(
                        FailureCategory::from(&e),
                        Some(candidate.target.id.clone()),
                        e.to_string(),
                    );
                }
                Verdict::Cancelled => interrupted = Some(ControlStatus::Cancelled),
                Verdict::Halted => {
                    interrupted.get_or_insert(ControlStatus::Failed);
                }
            }
        }

        // Partial judgments of an interrupted control are never aggregated
        if let Some(status) = interrupted {
            info!(control = %source.id, status = %status, "control interrupted before commit");
            return report.with_status(status);
        }
        if cancel.is_cancelled() {
            return report.with_status(ControlStatus::Cancelled);
        }

        match self.aggregator.commit(&source.id, &judgments).await {
            Ok(outcome) => {
                report.outcome = Some(outcome);
                let status = if report.failures.is_empty() {
                    ControlStatus::Succeeded
                } else if report.verified > 0 {
                    ControlStatus::Partial
                } else {
                    ControlStatus::Failed
                };
                report.with_status(status)
            }
            Err(e) => {
                warn!(control = %source.id, error = %e, "edge commit failed");
                report.fail(FailureCategory::from(&e), None, e.to_string());
                report.with_status(ControlStatus::Failed)
            }
        }
    }

    async fn verify(
        &self,
        candidate: &MappingCandidate,
        cancel: &CancelSignal,
        monitor: &FailureMonitor,
    ) -> Verdict {
        let Ok(_permit) = self.verification_permits.acquire().await else {
            return Verdict::Halted;
        };
        // Checked after queueing for a permit; work is dispatched only here
        if cancel.is_cancelled() {
            return Verdict::Cancelled;
        }
        if monitor.is_tripped() {
            return Verdict::Halted;
        }

        match self.adapter.judge_counted(candidate).await {
            (Ok(judgment), _) => {
                monitor.record_success();
                Verdict::Judged(judgment)
            }
            (Err(e @ VerifyError::Parse { .. }), retries) => {
                // The service answered, so it is reachable
                monitor.record_success();
                Verdict::Failed(e, retries)
            }
            (Err(e), retries) => {
                monitor.record_failure(&e);
                Verdict::Failed(e, retries)
            }
        }
    }
}
