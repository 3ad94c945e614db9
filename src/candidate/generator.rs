//! Candidate Generator

use super::{rank_embeddings, CandidateResult, MappingCandidate};
use crate::embed::{Embedding, EmbeddingCache};
use crate::graph::{Control, ControlId, StandardId};
use crate::repository::ControlRepository;
use crate::vector::{IndexKey, VectorIndexManager};
use futures::future::try_join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// How many approximate neighbors to pull per requested candidate before exact re-scoring
const ANN_OVERSAMPLE: usize = 16;

pub struct CandidateGenerator {
    repository: Arc<dyn ControlRepository>,
    cache: Arc<EmbeddingCache>,
    indices: VectorIndexManager,
    model_version: String,
    ann_threshold: usize,
}

impl CandidateGenerator {
    pub fn new(
        repository: Arc<dyn ControlRepository>,
        cache: Arc<EmbeddingCache>,
        model_version: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            cache,
            indices: VectorIndexManager::new(),
            model_version: model_version.into(),
            ann_threshold: usize::MAX,
        }
    }

    /// Use the HNSW index for target standards with at least `threshold` controls
    ///
    /// Exact scoring is the default. The approximate pool depends on the index
    /// build, so two processes can disagree on the candidates.
    pub fn with_ann_threshold(mut self, threshold: usize) -> Self {
        self.ann_threshold = threshold;
        self
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Top-`k` controls of `target_standard` most similar to `source`
    pub async fn rank_candidates(
        &self,
        source: &Arc<Control>,
        target_standard: &StandardId,
        k: usize,
        min_similarity: f32,
    ) -> CandidateResult<Vec<MappingCandidate>> {
        let source_embedding = self.cache.get_or_compute(source, &self.model_version).await?;

        let targets: Vec<Arc<Control>> = self
            .repository
            .get_controls(target_standard)
            .await?
            .into_iter()
            .filter(|c| c.id != source.id)
            .map(Arc::new)
            .collect();

        let target_embeddings = try_join_all(
            targets
                .iter()
                .map(|t| self.cache.get_or_compute(t, &self.model_version)),
        )
        .await?;

        let pool = if targets.len() >= self.ann_threshold {
            self.approximate_pool(&source_embedding, target_standard, &target_embeddings, k)?
        } else {
            target_embeddings
        };

        let ranked = rank_embeddings(&source_embedding, &pool, k, min_similarity)?;

        let by_id: HashMap<&ControlId, &Arc<Control>> = targets.iter().map(|t| (&t.id, t)).collect();
        let candidates: Vec<MappingCandidate> = ranked
            .into_iter()
            .filter_map(|scored| {
                by_id.get(&scored.control_id).map(|target| {
                    MappingCandidate::new(Arc::clone(source), Arc::clone(target), scored.similarity)
                })
            })
            .collect();

        debug!(
            source = %source.id,
            target_standard = %target_standard,
            pool = pool.len(),
            candidates = candidates.len(),
            "ranked candidates"
        );
        Ok(candidates)
    }

    /// Narrow the target set with the HNSW index; exact scores are recomputed afterwards
    fn approximate_pool(
        &self,
        source: &Embedding,
        target_standard: &StandardId,
        targets: &[Arc<Embedding>],
        k: usize,
    ) -> CandidateResult<Vec<Arc<Embedding>>> {
        let key = IndexKey {
            standard: target_standard.clone(),
            model_version: self.model_version.clone(),
        };
        let index = self.indices.get_or_build(key, targets)?;
        let neighbors: HashSet<ControlId> = index
            .search(&source.vector, k.saturating_mul(ANN_OVERSAMPLE).max(k + 1))?
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        Ok(targets
            .iter()
            .filter(|e| neighbors.contains(&e.control_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{EmbedResult, EmbeddingService};
    use crate::graph::Standard;
    use crate::repository::GraphRepository;
    use async_trait::async_trait;

    /// Maps known texts to fixed vectors
    struct TableService;

    #[async_trait]
    impl EmbeddingService for TableService {
        async fn embed(&self, text: &str, _model_version: &str) -> EmbedResult<Vec<f32>> {
            Ok(match text {
                "Account Management" => vec![1.0, 0.0, 0.0],
                "Identities and credentials are managed" => vec![0.9, 0.1, 0.0],
                "Access permissions are managed" => vec![0.6, 0.6, 0.0],
                _ => vec![0.0, 0.0, 1.0],
            })
        }
    }

    async fn generator(ann_threshold: usize) -> (CandidateGenerator, Arc<Control>) {
        let repo = GraphRepository::new();
        repo.import_standard(
            Standard::new("NIST", "NIST SP 800-53", "rev5"),
            vec![Control::new("AC-2", "NIST", "Account Management")],
        )
        .await
        .unwrap();
        repo.import_standard(
            Standard::new("CSF", "NIST CSF", "1.1"),
            vec![
                Control::new("PR.AC-1", "CSF", "Identities and credentials are managed"),
                Control::new("PR.AC-4", "CSF", "Access permissions are managed"),
                Control::new("PR.DS-1", "CSF", "Data-at-rest is protected"),
            ],
        )
        .await
        .unwrap();

        let source = Arc::new(repo.get_control(&ControlId::new("AC-2")).await.unwrap());
        let cache = Arc::new(EmbeddingCache::new(Arc::new(TableService), 2));
        let generator = CandidateGenerator::new(Arc::new(repo), cache, "v1")
            .with_ann_threshold(ann_threshold);
        (generator, source)
    }

    #[tokio::test]
    async fn test_rank_candidates() {
        let (generator, source) = generator(usize::MAX).await;
        let candidates = generator
            .rank_candidates(&source, &StandardId::new("CSF"), 5, 0.3)
            .await
            .unwrap();

        let ids: Vec<&str> = candidates.iter().map(|c| c.target.id.as_str()).collect();
        assert_eq!(ids, vec!["PR.AC-1", "PR.AC-4"]);
        assert!(candidates[0].similarity > candidates[1].similarity);
        assert_eq!(candidates[0].source.id, ControlId::new("AC-2"));
    }

    #[tokio::test]
    async fn test_ann_path_matches_exact_path() {
        let (exact, source) = generator(usize::MAX).await;
        let (approx, _) = generator(1).await;
        let target = StandardId::new("CSF");

        let a = exact.rank_candidates(&source, &target, 2, 0.0).await.unwrap();
        let b = approx.rank_candidates(&source, &target, 2, 0.0).await.unwrap();

        let ids = |c: &[MappingCandidate]| c.iter().map(|c| c.target.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
    }

    /// Pseudo-random vector seeded from the text
    struct HashedService;

    #[async_trait]
    impl EmbeddingService for HashedService {
        async fn embed(&self, text: &str, _model_version: &str) -> EmbedResult<Vec<f32>> {
            let mut state = text
                .bytes()
                .fold(0xcbf29ce484222325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100000001b3));
            Ok((0..32)
                .map(|_| {
                    state = state
                        .wrapping_mul(6364136223846793005)
                        .wrapping_add(1442695040888963407);
                    ((state >> 33) as f32 / u32::MAX as f32) - 0.25
                })
                .collect())
        }
    }

    async fn large_repository(size: usize) -> Arc<GraphRepository> {
        let repo = GraphRepository::new();
        repo.import_standard(
            Standard::new("SRC", "Source", "1"),
            vec![Control::new("Q-1", "SRC", "query control")],
        )
        .await
        .unwrap();
        let controls = (0..size)
            .map(|i| Control::new(format!("T-{:05}", i), "BIG", format!("target control {}", i)))
            .collect();
        repo.import_standard(Standard::new("BIG", "Large standard", "1"), controls)
            .await
            .unwrap();
        Arc::new(repo)
    }

    #[tokio::test]
    async fn test_large_standard_ranking_is_reproducible() {
        let repo = large_repository(3000).await;
        let source = Arc::new(repo.get_control(&ControlId::new("Q-1")).await.unwrap());
        let target = StandardId::new("BIG");
        let fresh = || {
            let cache = Arc::new(EmbeddingCache::new(Arc::new(HashedService), 8));
            CandidateGenerator::new(repo.clone(), cache, "v1")
        };

        let first = fresh().rank_candidates(&source, &target, 5, 0.0).await.unwrap();
        let second = fresh().rank_candidates(&source, &target, 5, 0.0).await.unwrap();

        let ids = |c: &[MappingCandidate]| c.iter().map(|c| c.target.id.clone()).collect::<Vec<_>>();
        assert_eq!(first.len(), 5);
        assert_eq!(ids(&first), ids(&second));

        // Brute force over every target
        let query = HashedService.embed("query control", "v1").await.unwrap();
        let mut scored = Vec::new();
        for control in repo.get_controls(&target).await.unwrap() {
            let vector = HashedService.embed(&control.description, "v1").await.unwrap();
            let similarity = crate::vector::cosine_similarity(&query, &vector).clamp(0.0, 1.0);
            scored.push((similarity, control.id));
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        let expected: Vec<ControlId> = scored.into_iter().take(5).map(|(_, id)| id).collect();
        assert_eq!(ids(&first), expected);
    }

    #[tokio::test]
    async fn test_unknown_target_standard() {
        let (generator, source) = generator(usize::MAX).await;
        let result = generator
            .rank_candidates(&source, &StandardId::new("ISO"), 5, 0.3)
            .await;
        assert!(result.is_err());
    }
}
