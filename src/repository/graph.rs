//! Graph-backed Control Repository
//!
//! Serves reads from the in-memory [`GraphStore`]. With storage attached,
//! every batch is validated in memory, written to RocksDB in one write batch,
//! and only then applied in memory, all under the store's write lock.

use super::{ControlRepository, RepositoryError, RepositoryResult};
use crate::graph::{
    CommitReceipt, Control, ControlId, EdgeBatch, EdgeId, EdgeSnapshot, GraphError,
    GraphStatistics, GraphStore, MappingEdge, Standard, StandardId,
};
use crate::persistence::PersistentStorage;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub struct GraphRepository {
    store: Arc<RwLock<GraphStore>>,
    storage: Option<Arc<PersistentStorage>>,
}

impl GraphRepository {
    /// In-memory repository
    pub fn new() -> Self {
        Self::with_store(GraphStore::new())
    }

    pub fn with_store(store: GraphStore) -> Self {
        Self {
            store: Arc::new(RwLock::new(store)),
            storage: None,
        }
    }

    /// Open a persistent repository, recovering whatever is on disk
    pub fn open(path: impl AsRef<Path>) -> RepositoryResult<Self> {
        let storage = Arc::new(PersistentStorage::open(path)?);
        let store = storage.recover()?;
        let stats = store.statistics();
        info!(
            standards = stats.standards,
            controls = stats.controls,
            active_edges = stats.active_edges,
            "repository recovered"
        );
        Ok(Self {
            store: Arc::new(RwLock::new(store)),
            storage: Some(storage),
        })
    }

    /// Durable storage, shared with the embedding cache
    pub fn storage(&self) -> Option<Arc<PersistentStorage>> {
        self.storage.clone()
    }

    /// Load a standard and its controls
    ///
    /// Controls that already exist with identical content are skipped.
    pub async fn import_standard(
        &self,
        standard: Standard,
        controls: Vec<Control>,
    ) -> RepositoryResult<usize> {
        let mut store = self.store.write().await;

        for control in &controls {
            if control.standard != standard.id {
                return Err(RepositoryError::InvariantViolation(format!(
                    "control {} belongs to {}, not {}",
                    control.id, control.standard, standard.id
                )));
            }
            if let Some(existing) = store.get_control(&control.id) {
                if existing != control {
                    return Err(GraphError::ControlAlreadyExists(control.id.clone()).into());
                }
            }
        }

        if let Some(storage) = &self.storage {
            storage.put_standard(&standard)?;
        }
        store.insert_standard(standard);

        let mut imported = 0;
        for control in controls {
            if store.has_control(&control.id) {
                continue;
            }
            if let Some(storage) = &self.storage {
                storage.put_control(&control)?;
            }
            store.insert_control(control)?;
            imported += 1;
        }

        Ok(imported)
    }

    pub async fn flush(&self) -> RepositoryResult<()> {
        if let Some(storage) = &self.storage {
            storage.flush()?;
        }
        Ok(())
    }
}

impl Default for GraphRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlRepository for GraphRepository {
    async fn get_standard(&self, id: &StandardId) -> RepositoryResult<Standard> {
        let store = self.store.read().await;
        store
            .get_standard(id)
            .cloned()
            .ok_or_else(|| GraphError::StandardNotFound(id.clone()).into())
    }

    async fn get_controls(&self, standard: &StandardId) -> RepositoryResult<Vec<Control>> {
        let store = self.store.read().await;
        let controls = store.controls_in_standard(standard)?;
        Ok(controls.into_iter().cloned().collect())
    }

    async fn get_control(&self, id: &ControlId) -> RepositoryResult<Control> {
        let store = self.store.read().await;
        store
            .get_control(id)
            .cloned()
            .ok_or_else(|| GraphError::ControlNotFound(id.clone()).into())
    }

    async fn get_edge(&self, id: EdgeId) -> RepositoryResult<MappingEdge> {
        let store = self.store.read().await;
        store
            .get_edge(id)
            .cloned()
            .ok_or_else(|| GraphError::EdgeNotFound(id).into())
    }

    async fn snapshot_edges(&self, control: &ControlId) -> RepositoryResult<EdgeSnapshot> {
        let store = self.store.read().await;
        Ok(store.snapshot(control)?)
    }

    async fn write_edges(&self, batch: EdgeBatch) -> RepositoryResult<CommitReceipt> {
        let mut store = self.store.write().await;
        let prepared = store.prepare(batch)?;

        if let Some(storage) = &self.storage {
            storage.commit_edges(&prepared)?;
        }

        let receipt = store.apply(prepared);
        debug!(
            revision = receipt.revision,
            created = receipt.created.len(),
            retired = receipt.retired.len(),
            reviewed = receipt.reviewed.len(),
            "edge batch committed"
        );
        Ok(receipt)
    }

    async fn statistics(&self) -> RepositoryResult<GraphStatistics> {
        let store = self.store.read().await;
        Ok(store.statistics())
    }
}
