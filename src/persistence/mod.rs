//! Persistence layer
//!
//! Durable storage of the control graph and the embedding cache in RocksDB.
//! Edge batches are written with a single RocksDB write batch, which gives the
//! all-or-nothing guarantee the repository promises.

pub mod storage;

pub use storage::{PersistentStorage, StorageError, StorageResult};
