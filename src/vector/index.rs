//! Vector index implementation using HNSW
//!
//! Wraps hnsw_rs for approximate nearest neighbor search over the embeddings
//! of one target standard. Exact cosine similarity lives here as well since
//! both the index and the candidate generator need it.

use crate::graph::ControlId;
use hnsw_rs::prelude::*;
use thiserror::Error;

/// Vector index errors
#[derive(Error, Debug, PartialEq)]
pub enum VectorError {
    #[error("Index error: {0}")]
    IndexError(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

pub type VectorResult<T> = Result<T, VectorError>;

/// Lower bound on the HNSW search beam
const MIN_EF_SEARCH: usize = 512;

/// Cosine similarity of two vectors
///
/// Returns 0.0 when either vector has zero norm.
pub fn cosine_similarity(va: &[f32], vb: &[f32]) -> f32 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (a, b) in va.iter().zip(vb.iter()) {
        dot += a * b;
        norm_a += a * a;
        norm_b += b * b;
    }

    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Cosine distance implementation for hnsw_rs
#[derive(Clone, Copy, Debug, Default)]
pub struct CosineDistance;

impl Distance<f32> for CosineDistance {
    fn eval(&self, va: &[f32], vb: &[f32]) -> f32 {
        // Cosine distance = 1.0 - cosine similarity
        1.0 - cosine_similarity(va, vb)
    }
}

/// HNSW index over the controls of one standard
pub struct VectorIndex {
    dimensions: usize,
    hnsw: Hnsw<'static, f32, CosineDistance>,
    /// Position in this vector is the HNSW data id
    controls: Vec<ControlId>,
}

// Implement Debug manually because Hnsw doesn't implement it
impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dimensions", &self.dimensions)
            .field("len", &self.controls.len())
            .finish()
    }
}

impl VectorIndex {
    /// Create a new vector index sized for `capacity` vectors
    pub fn new(dimensions: usize, capacity: usize) -> Self {
        let max_elements = capacity.max(1);
        let m = 16;
        let ef_construction = 200;

        let hnsw = Hnsw::new(m, max_elements, 16, ef_construction, CosineDistance);

        Self {
            dimensions,
            hnsw,
            controls: Vec::with_capacity(max_elements),
        }
    }

    /// Add a control's vector to the index
    pub fn add(&mut self, control_id: ControlId, vector: &Vec<f32>) -> VectorResult<()> {
        if vector.len() != self.dimensions {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }

        let data_id = self.controls.len();
        self.hnsw.insert((vector, data_id));
        self.controls.push(control_id);

        Ok(())
    }

    /// Approximate nearest neighbors as `(control, cosine similarity)`, closest first
    pub fn search(&self, query: &[f32], k: usize) -> VectorResult<Vec<(ControlId, f32)>> {
        if query.len() != self.dimensions {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }
        if self.controls.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let ef_search = (k * 2).max(MIN_EF_SEARCH);
        let results = self.hnsw.search(query, k, ef_search);

        let mut neighbors = Vec::with_capacity(results.len());
        for res in results {
            let control = self.controls.get(res.d_id).ok_or_else(|| {
                VectorError::IndexError(format!("unknown data id {}", res.d_id))
            })?;
            neighbors.push((control.clone(), 1.0 - res.distance));
        }

        Ok(neighbors)
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_index_basic() {
        let mut index = VectorIndex::new(3, 16);

        index.add(ControlId::new("AC-1"), &vec![1.0, 0.0, 0.0]).unwrap();
        index.add(ControlId::new("AC-2"), &vec![0.0, 1.0, 0.0]).unwrap();
        index.add(ControlId::new("AC-3"), &vec![0.0, 0.1, 0.9]).unwrap();

        let results = index.search(&[1.0, 0.1, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, ControlId::new("AC-1"));
        assert!(results[0].1 > 0.9);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = VectorIndex::new(3, 4);
        let err = index.add(ControlId::new("AC-1"), &vec![1.0, 0.0]).unwrap_err();
        assert_eq!(err, VectorError::DimensionMismatch { expected: 3, got: 2 });
        assert!(index.search(&[1.0], 1).is_err());
    }

    #[test]
    fn test_cosine_similarity() {
        let v1 = vec![1.0, 0.0];
        let v2 = vec![0.0, 1.0];
        let v3 = vec![1.0, 1.0];

        assert!((cosine_similarity(&v1, &v1) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&v1, &v2).abs() < 1e-6);
        assert!((cosine_similarity(&v1, &v3) - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert_eq!(cosine_similarity(&v1, &[0.0, 0.0]), 0.0);

        let cosine = CosineDistance;
        assert!((cosine.eval(&v1, &v2) - 1.0).abs() < 1e-6);
        assert!(cosine.eval(&v1, &v1).abs() < 1e-6);
    }
}
