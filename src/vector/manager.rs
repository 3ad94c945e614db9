//! Manager for per-standard vector indices
//!
//! One HNSW index per (target standard, embedding model version). An index is
//! rebuilt when the set of embedded controls or their texts change.

use crate::embed::Embedding;
use crate::graph::StandardId;
use crate::vector::index::{VectorIndex, VectorResult};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Key for identifying a vector index
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct IndexKey {
    pub standard: StandardId,
    pub model_version: String,
}

struct IndexEntry {
    fingerprint: String,
    index: Arc<VectorIndex>,
}

/// Manager for all vector indices in the system
#[derive(Default)]
pub struct VectorIndexManager {
    indices: Mutex<HashMap<IndexKey, IndexEntry>>,
}

impl std::fmt::Debug for VectorIndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndexManager")
            .field("indices", &self.list_indices())
            .finish()
    }
}

impl VectorIndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the index for `key`, building it from `embeddings` if it is missing or stale
    pub fn get_or_build(
        &self,
        key: IndexKey,
        embeddings: &[Arc<Embedding>],
    ) -> VectorResult<Arc<VectorIndex>> {
        let fingerprint = fingerprint(embeddings);

        let mut indices = self.indices.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = indices.get(&key) {
            if entry.fingerprint == fingerprint {
                return Ok(Arc::clone(&entry.index));
            }
        }

        let dimensions = embeddings.first().map(|e| e.dimensions()).unwrap_or(0);
        let mut index = VectorIndex::new(dimensions, embeddings.len());
        for embedding in embeddings {
            index.add(embedding.control_id.clone(), &embedding.vector)?;
        }

        info!(
            standard = %key.standard,
            model_version = %key.model_version,
            vectors = index.len(),
            "built vector index"
        );

        let index = Arc::new(index);
        indices.insert(
            key,
            IndexEntry {
                fingerprint,
                index: Arc::clone(&index),
            },
        );
        Ok(index)
    }

    /// List all indices
    pub fn list_indices(&self) -> Vec<IndexKey> {
        let indices = self.indices.lock().unwrap_or_else(|e| e.into_inner());
        indices.keys().cloned().collect()
    }
}

/// Order-independent digest of the (control, text hash) pairs
fn fingerprint(embeddings: &[Arc<Embedding>]) -> String {
    let mut pairs: Vec<(&str, &str)> = embeddings
        .iter()
        .map(|e| (e.control_id.as_str(), e.text_hash.as_str()))
        .collect();
    pairs.sort_unstable();

    let mut hasher = Sha256::new();
    for (control, text_hash) in pairs {
        hasher.update(control.as_bytes());
        hasher.update([0u8]);
        hasher.update(text_hash.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ControlId;

    fn embedding(id: &str, hash: &str, vector: Vec<f32>) -> Arc<Embedding> {
        Arc::new(Embedding {
            control_id: ControlId::new(id),
            model_version: "v1".to_string(),
            text_hash: hash.to_string(),
            vector,
        })
    }

    fn key() -> IndexKey {
        IndexKey {
            standard: StandardId::new("CSF"),
            model_version: "v1".to_string(),
        }
    }

    #[test]
    fn test_index_is_reused_until_inputs_change() {
        let manager = VectorIndexManager::new();
        let embeddings = vec![
            embedding("PR.AC-1", "h1", vec![1.0, 0.0]),
            embedding("PR.AC-4", "h2", vec![0.0, 1.0]),
        ];

        let first = manager.get_or_build(key(), &embeddings).unwrap();
        let reversed: Vec<_> = embeddings.iter().rev().cloned().collect();
        let second = manager.get_or_build(key(), &reversed).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let changed = vec![
            embedding("PR.AC-1", "h1-edited", vec![1.0, 0.0]),
            embedding("PR.AC-4", "h2", vec![0.0, 1.0]),
        ];
        let third = manager.get_or_build(key(), &changed).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(manager.list_indices(), vec![key()]);
    }
}
