//! RocksDB storage layer
//!
//! Standards, controls, mapping edges, per-control edge revisions and cached
//! embeddings each live in their own column family. Values are bincode encoded.

use crate::embed::Embedding;
use crate::graph::{Control, ControlId, GraphStore, MappingEdge, PreparedCommit, Standard};
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

const CF_STANDARDS: &str = "standards";
const CF_CONTROLS: &str = "controls";
const CF_EDGES: &str = "edges";
const CF_REVISIONS: &str = "revisions";
const CF_EMBEDDINGS: &str = "embeddings";

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB error
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Column family error
    #[error("Column family error: {0}")]
    ColumnFamily(String),

    /// Persisted data does not form a valid graph
    #[error("Corrupt data: {0}")]
    Corrupt(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// RocksDB-based persistent storage
pub struct PersistentStorage {
    db: Arc<DB>,
    path: PathBuf,
}

impl PersistentStorage {
    /// Open or create a new persistent storage
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        info!("Opening persistent storage at: {}", path.display());

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        opts.set_write_buffer_size(64 * 1024 * 1024); // 64 MB
        opts.set_max_write_buffer_number(3);
        opts.set_min_write_buffer_number_to_merge(1);

        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_wal_recovery_mode(rocksdb::DBRecoveryMode::PointInTime);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new("default", Options::default()),
            ColumnFamilyDescriptor::new(CF_STANDARDS, Self::catalog_cf_options()),
            ColumnFamilyDescriptor::new(CF_CONTROLS, Self::catalog_cf_options()),
            ColumnFamilyDescriptor::new(CF_EDGES, Self::edge_cf_options()),
            ColumnFamilyDescriptor::new(CF_REVISIONS, Options::default()),
            ColumnFamilyDescriptor::new(CF_EMBEDDINGS, Self::embedding_cf_options()),
        ];

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        info!("Persistent storage opened successfully");

        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Column family options for standards and controls
    fn catalog_cf_options() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    /// Column family options for edges
    fn edge_cf_options() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    /// Embedding vectors compress poorly with LZ4; Zstd does better on floats
    fn embedding_cf_options() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf(&self, name: &str) -> StorageResult<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamily(name.to_string()))
    }

    /// Store a standard
    pub fn put_standard(&self, standard: &Standard) -> StorageResult<()> {
        let cf = self.cf(CF_STANDARDS)?;
        let value = bincode::serialize(standard)?;
        self.db.put_cf(&cf, standard.id.as_str().as_bytes(), value)?;
        debug!("Stored standard {}", standard.id);
        Ok(())
    }

    /// Store a control
    pub fn put_control(&self, control: &Control) -> StorageResult<()> {
        let cf = self.cf(CF_CONTROLS)?;
        let value = bincode::serialize(control)?;
        self.db.put_cf(&cf, control.id.as_str().as_bytes(), value)?;
        debug!("Stored control {}", control.id);
        Ok(())
    }

    /// Get an edge
    pub fn get_edge(&self, edge_id: u64) -> StorageResult<Option<MappingEdge>> {
        let cf = self.cf(CF_EDGES)?;
        match self.db.get_cf(&cf, Self::edge_key(edge_id))? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Write every edge of a prepared commit plus the new revision in one batch
    pub fn commit_edges(&self, prepared: &PreparedCommit) -> StorageResult<()> {
        let edges_cf = self.cf(CF_EDGES)?;
        let revisions_cf = self.cf(CF_REVISIONS)?;

        let mut batch = WriteBatch::default();
        for edge in &prepared.edges {
            batch.put_cf(&edges_cf, Self::edge_key(edge.id.as_u64()), bincode::serialize(edge)?);
        }
        batch.put_cf(
            &revisions_cf,
            prepared.source.as_str().as_bytes(),
            prepared.revision.to_be_bytes(),
        );
        self.db.write(batch)?;

        debug!(
            "Committed {} edges for {} at revision {}",
            prepared.edges.len(),
            prepared.source,
            prepared.revision
        );
        Ok(())
    }

    /// Store an embedding
    pub fn put_embedding(&self, embedding: &Embedding) -> StorageResult<()> {
        let cf = self.cf(CF_EMBEDDINGS)?;
        let key = Self::embedding_key(&embedding.model_version, &embedding.control_id);
        self.db.put_cf(&cf, key, bincode::serialize(embedding)?)?;
        Ok(())
    }

    /// Get the cached embedding of a control for a model version
    ///
    /// The caller compares the text hash; a stale entry is simply overwritten.
    pub fn get_embedding(
        &self,
        model_version: &str,
        control_id: &ControlId,
    ) -> StorageResult<Option<Embedding>> {
        let cf = self.cf(CF_EMBEDDINGS)?;
        match self.db.get_cf(&cf, Self::embedding_key(model_version, control_id))? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Number of stored embeddings
    pub fn embedding_count(&self) -> StorageResult<usize> {
        let cf = self.cf(CF_EMBEDDINGS)?;
        let mut count = 0;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Flush all data to disk
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        debug!("Flushed storage to disk");
        Ok(())
    }

    pub fn scan_standards(&self) -> StorageResult<Vec<Standard>> {
        self.scan(CF_STANDARDS)
    }

    pub fn scan_controls(&self) -> StorageResult<Vec<Control>> {
        self.scan(CF_CONTROLS)
    }

    /// All edges in id order
    pub fn scan_edges(&self) -> StorageResult<Vec<MappingEdge>> {
        self.scan(CF_EDGES)
    }

    pub fn scan_revisions(&self) -> StorageResult<Vec<(ControlId, u64)>> {
        let cf = self.cf(CF_REVISIONS)?;
        let mut revisions = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item?;
            let control = std::str::from_utf8(&key)
                .map_err(|e| StorageError::Corrupt(format!("revision key: {}", e)))?;
            let bytes: [u8; 8] = value
                .as_ref()
                .try_into()
                .map_err(|_| StorageError::Corrupt(format!("revision of {}", control)))?;
            revisions.push((ControlId::new(control), u64::from_be_bytes(bytes)));
        }
        Ok(revisions)
    }

    /// Rebuild the in-memory graph from disk
    pub fn recover(&self) -> StorageResult<GraphStore> {
        let mut store = GraphStore::new();

        let standards = self.scan_standards()?;
        let controls = self.scan_controls()?;
        let edges = self.scan_edges()?;
        let revisions = self.scan_revisions()?;

        info!(
            "Recovering {} standards, {} controls, {} edges",
            standards.len(),
            controls.len(),
            edges.len()
        );

        for standard in standards {
            store.insert_standard(standard);
        }
        for control in controls {
            store
                .insert_control(control)
                .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        }
        for edge in edges {
            store
                .insert_recovered_edge(edge)
                .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        }
        for (control, revision) in revisions {
            store.set_recovered_revision(control, revision);
        }

        Ok(store)
    }

    fn scan<T: serde::de::DeserializeOwned>(&self, cf_name: &str) -> StorageResult<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut items = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_key, value) = item?;
            items.push(bincode::deserialize(&value)?);
        }
        Ok(items)
    }

    /// Big-endian hex keeps edges in id order under RocksDB's byte ordering
    fn edge_key(edge_id: u64) -> Vec<u8> {
        format!("e:{:016x}", edge_id).into_bytes()
    }

    fn embedding_key(model_version: &str, control_id: &ControlId) -> Vec<u8> {
        format!("{}:{}", model_version, control_id).into_bytes()
    }
}
