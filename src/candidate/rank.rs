//! Deterministic similarity ranking

use super::{CandidateError, CandidateResult};
use crate::embed::Embedding;
use crate::graph::ControlId;
use crate::vector::{cosine_similarity, VectorError};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::sync::Arc;

/// Target sets at least this large are scored on the rayon pool
const PARALLEL_THRESHOLD: usize = 1024;

/// A target control with its similarity to the source
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTarget {
    pub control_id: ControlId,
    pub similarity: f32,
}

/// Rank `targets` by cosine similarity to `source`
///
/// Output is ordered by similarity descending, ties broken by target id
/// ascending, holds at most `k` entries and nothing below `min_similarity`.
/// Negative similarities count as 0. The source never ranks against itself.
pub fn rank_embeddings(
    source: &Embedding,
    targets: &[Arc<Embedding>],
    k: usize,
    min_similarity: f32,
) -> CandidateResult<Vec<ScoredTarget>> {
    for target in targets {
        if target.model_version != source.model_version {
            return Err(CandidateError::IncompatibleEmbeddingVersion {
                source_version: source.model_version.clone(),
                target_version: target.model_version.clone(),
            });
        }
        if target.dimensions() != source.dimensions() {
            return Err(VectorError::DimensionMismatch {
                expected: source.dimensions(),
                got: target.dimensions(),
            }
            .into());
        }
    }

    let score = |target: &Arc<Embedding>| -> Option<ScoredTarget> {
        if target.control_id == source.control_id {
            return None;
        }
        let raw = cosine_similarity(&source.vector, &target.vector);
        let similarity = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) };
        (similarity >= min_similarity).then(|| ScoredTarget {
            control_id: target.control_id.clone(),
            similarity,
        })
    };

    let mut scored: Vec<ScoredTarget> = if targets.len() >= PARALLEL_THRESHOLD {
        targets.par_iter().filter_map(score).collect()
    } else {
        targets.iter().filter_map(score).collect()
    };

    scored.sort_by(compare_ranked);
    scored.truncate(k);
    Ok(scored)
}

fn compare_ranked(a: &ScoredTarget, b: &ScoredTarget) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| a.control_id.cmp(&b.control_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(id: &str, version: &str, vector: Vec<f32>) -> Arc<Embedding> {
        Arc::new(Embedding {
            control_id: ControlId::new(id),
            model_version: version.to_string(),
            text_hash: format!("hash-{}", id),
            vector,
        })
    }

    fn ids(ranked: &[ScoredTarget]) -> Vec<&str> {
        ranked.iter().map(|s| s.control_id.as_str()).collect()
    }

    #[test]
    fn test_orders_by_similarity_then_id() {
        let source = emb("AC-2", "v1", vec![1.0, 0.0]);
        let targets = vec![
            emb("PR.AC-4", "v1", vec![1.0, 1.0]),
            emb("PR.AC-1", "v1", vec![1.0, 0.0]),
            emb("PR.AC-3", "v1", vec![1.0, 1.0]),
            emb("PR.AC-2", "v1", vec![0.0, 1.0]),
        ];

        let ranked = rank_embeddings(&source, &targets, 10, 0.3).unwrap();
        assert_eq!(ids(&ranked), vec!["PR.AC-1", "PR.AC-3", "PR.AC-4"]);
        assert!((ranked[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_k_bounds_output() {
        let source = emb("AC-2", "v1", vec![1.0, 0.0]);
        let targets = vec![
            emb("B", "v1", vec![1.0, 0.1]),
            emb("A", "v1", vec![1.0, 0.2]),
            emb("C", "v1", vec![1.0, 0.3]),
        ];

        assert_eq!(ids(&rank_embeddings(&source, &targets, 2, 0.0).unwrap()), vec!["B", "A"]);
        assert_eq!(rank_embeddings(&source, &targets, 10, 0.0).unwrap().len(), 3);
        assert!(rank_embeddings(&source, &targets, 0, 0.0).unwrap().is_empty());
    }

    #[test]
    fn test_min_similarity_and_negative_clamp() {
        let source = emb("AC-2", "v1", vec![1.0, 0.0]);
        let targets = vec![
            emb("OPPOSITE", "v1", vec![-1.0, 0.0]),
            emb("ORTHOGONAL", "v1", vec![0.0, 1.0]),
        ];

        assert!(rank_embeddings(&source, &targets, 5, 0.3).unwrap().is_empty());

        let all = rank_embeddings(&source, &targets, 5, 0.0).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|s| s.similarity == 0.0));
        assert_eq!(ids(&all), vec!["OPPOSITE", "ORTHOGONAL"]);
    }

    #[test]
    fn test_self_is_excluded() {
        let source = emb("AC-2", "v1", vec![1.0, 0.0]);
        let targets = vec![emb("AC-2", "v1", vec![1.0, 0.0]), emb("AC-3", "v1", vec![1.0, 0.1])];

        assert_eq!(ids(&rank_embeddings(&source, &targets, 5, 0.0).unwrap()), vec!["AC-3"]);
    }

    #[test]
    fn test_mixed_versions_rejected() {
        let source = emb("AC-2", "v1", vec![1.0, 0.0]);
        let targets = vec![emb("PR.AC-1", "v2", vec![1.0, 0.0])];

        let err = rank_embeddings(&source, &targets, 5, 0.0).unwrap_err();
        assert!(matches!(err, CandidateError::IncompatibleEmbeddingVersion { .. }));
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let source = emb("SRC", "v1", vec![0.3, 0.7, 0.1]);
        let targets: Vec<_> = (0..2000)
            .map(|i| {
                let x = (i % 7) as f32;
                emb(&format!("T-{:04}", i), "v1", vec![x, 1.0, (i % 3) as f32])
            })
            .collect();

        let first = rank_embeddings(&source, &targets, 25, 0.3).unwrap();
        let second = rank_embeddings(&source, &targets, 25, 0.3).unwrap();
        assert_eq!(first, second);

        assert_eq!(first.len(), 25);
        for pair in first.windows(2) {
            assert!(
                pair[0].similarity > pair[1].similarity
                    || (pair[0].similarity == pair[1].similarity
                        && pair[0].control_id < pair[1].control_id)
            );
        }
    }
}
