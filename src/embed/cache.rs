//! Single-flight embedding cache
//!
//! Each key owns a `OnceCell`; concurrent callers for the same key wait on the
//! same initialization, so the embedding service sees at most one successful
//! computation per key. A failed initialization drops the cell unless another
//! caller is still waiting on it, so the next caller starts fresh.

use super::{mean_pool, split_text, EmbedError, EmbedResult, Embedding, EmbeddingKey, EmbeddingService};
use crate::graph::Control;
use crate::persistence::PersistentStorage;
use crate::retry::RetryPolicy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, Semaphore};
use tracing::{debug, warn};

/// Embedding cache in front of an [`EmbeddingService`]
pub struct EmbeddingCache {
    service: Arc<dyn EmbeddingService>,
    /// Write-through durable layer
    storage: Option<Arc<PersistentStorage>>,
    entries: Mutex<HashMap<EmbeddingKey, Arc<OnceCell<Arc<Embedding>>>>>,
    /// Bounds concurrent requests to the embedding service
    permits: Semaphore,
    retry: RetryPolicy,
    max_chunk_chars: usize,
    chunk_overlap: usize,
    computed: AtomicUsize,
}

impl EmbeddingCache {
    pub fn new(service: Arc<dyn EmbeddingService>, concurrency: usize) -> Self {
        Self {
            service,
            storage: None,
            entries: Mutex::new(HashMap::new()),
            permits: Semaphore::new(concurrency.max(1)),
            retry: RetryPolicy::default(),
            max_chunk_chars: 2000,
            chunk_overlap: 200,
            computed: AtomicUsize::new(0),
        }
    }

    pub fn with_storage(mut self, storage: Arc<PersistentStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_chunking(mut self, max_chunk_chars: usize, chunk_overlap: usize) -> Self {
        self.max_chunk_chars = max_chunk_chars;
        self.chunk_overlap = chunk_overlap;
        self
    }

    /// Return the cached embedding of `control` or compute it once
    pub async fn get_or_compute(
        &self,
        control: &Control,
        model_version: &str,
    ) -> EmbedResult<Arc<Embedding>> {
        let key = EmbeddingKey::for_control(control, model_version);
        let cell = {
            let mut entries = self.entries.lock().await;
            entries.entry(key.clone()).or_default().clone()
        };

        let result = cell
            .get_or_try_init(|| self.load_or_compute(control, key.clone()))
            .await
            .cloned();

        if result.is_err() {
            let mut entries = self.entries.lock().await;
            // Clones are taken under this lock: map + ours means nobody else waits
            let idle = entries
                .get(&key)
                .is_some_and(|held| Arc::ptr_eq(held, &cell) && Arc::strong_count(&cell) == 2);
            if idle && !cell.initialized() {
                entries.remove(&key);
            }
        }
        result
    }

    /// Number of vectors obtained from the embedding service
    pub fn computed_count(&self) -> usize {
        self.computed.load(Ordering::SeqCst)
    }

    /// Number of keys resident in memory
    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.values().filter(|cell| cell.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn load_or_compute(&self, control: &Control, key: EmbeddingKey) -> EmbedResult<Arc<Embedding>> {
        if let Some(storage) = &self.storage {
            match storage.get_embedding(&key.model_version, &key.control_id) {
                Ok(Some(stored)) if stored.text_hash == key.text_hash => {
                    debug!(control = %key.control_id, "embedding loaded from storage");
                    return Ok(Arc::new(stored));
                }
                Ok(_) => {}
                Err(e) => warn!(control = %key.control_id, error = %e, "embedding lookup failed"),
            }
        }

        let vector = self.compute(&control.description, &key.model_version).await?;
        self.computed.fetch_add(1, Ordering::SeqCst);

        let embedding = Embedding {
            control_id: key.control_id,
            model_version: key.model_version,
            text_hash: key.text_hash,
            vector,
        };

        if let Some(storage) = &self.storage {
            if let Err(e) = storage.put_embedding(&embedding) {
                warn!(control = %embedding.control_id, error = %e, "embedding write-through failed");
            }
        }

        debug!(
            control = %embedding.control_id,
            dimensions = embedding.dimensions(),
            "embedding computed"
        );
        Ok(Arc::new(embedding))
    }

    async fn compute(&self, text: &str, model_version: &str) -> EmbedResult<Vec<f32>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| EmbedError::Unavailable(e.to_string()))?;

        let chunks = split_text(text, self.max_chunk_chars, self.chunk_overlap);
        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let (result, _attempts) = self
                .retry
                .run(|| self.service.embed(chunk, model_version), EmbedError::is_transient)
                .await;
            vectors.push(result?);
        }

        if vectors.len() == 1 {
            return Ok(vectors.remove(0));
        }
        mean_pool(&vectors)
    }
}
