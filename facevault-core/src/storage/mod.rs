//! Durable keyed storage of one canonical embedding per identity.
//!
//! This module provides:
//! - The [`EmbeddingStore`] trait consumed by enrollment and matching
//! - [`MemoryStore`], a lock-protected in-process map
//! - [`FileStore`], an append-only checksummed record log on disk

pub mod file_store;
pub mod memory;
pub mod record_log;

use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::vector::{Embedding, IdentityId};

pub use file_store::FileStore;
pub use memory::MemoryStore;
pub use record_log::{RecordLog, SyncMode};

/// A lazily evaluated pass over the stored population.
///
/// Each item is read when the iterator reaches it, so records written after
/// the scan started may or may not be observed. An `Err` item means a record
/// could not be read; consumers must treat it as fatal.
pub type Scan<'a> = Box<dyn Iterator<Item = Result<(IdentityId, Embedding)>> + Send + 'a>;

/// The stored state of one enrolled identity.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    pub identity_id: IdentityId,
    pub embedding: Embedding,
    pub enrolled_at: SystemTime,
}

/// Keyed storage of canonical embeddings.
///
/// Implementations must make [`upsert`](EmbeddingStore::upsert) atomic per
/// identity: concurrent readers observe either the previous vector or the new
/// one, never a mix. Nothing is promised across identities.
pub trait EmbeddingStore: Send + Sync {
    /// Dimensionality every stored vector must have.
    fn dimension(&self) -> usize;

    /// Replaces the record for `id`, creating it if absent.
    ///
    /// Returns once the write is durable by the store's own standard.
    fn upsert(&self, id: IdentityId, embedding: Embedding) -> Result<()>;

    /// Fetches the full record for `id`.
    fn record(&self, id: IdentityId) -> Result<IdentityRecord>;

    /// Fetches the canonical embedding for `id`.
    fn get(&self, id: IdentityId) -> Result<Embedding> {
        self.record(id).map(|r| r.embedding)
    }

    /// Starts a new pass over every identity present at call time,
    /// in ascending identity order.
    fn scan(&self) -> Result<Scan<'_>>;

    /// Deletes the record for `id`. Returns false if it did not exist.
    fn remove(&self, id: IdentityId) -> Result<bool>;

    /// Returns true if a record exists for `id`.
    fn contains(&self, id: IdentityId) -> bool;

    /// Number of enrolled identities.
    fn len(&self) -> usize;

    /// Returns true if no identity is enrolled.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Configuration shared by store implementations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Dimensionality of embeddings.
    pub dimension: usize,
    /// Durability of record log appends.
    pub sync_mode: SyncMode,
    /// Upper bound on waiting for a store lock. `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,
}

impl StoreConfig {
    /// Creates a config for the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            sync_mode: SyncMode::default(),
            lock_timeout: None,
        }
    }

    /// Sets the sync mode. Chainable.
    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Sets the lock timeout. Chainable.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}

pub(crate) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    timeout: Option<Duration>,
    operation: &'static str,
) -> Result<RwLockReadGuard<'a, T>> {
    match timeout {
        None => Ok(lock.read()),
        Some(after) => lock
            .try_read_for(after)
            .ok_or(Error::Timeout { operation, after }),
    }
}

pub(crate) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    timeout: Option<Duration>,
    operation: &'static str,
) -> Result<RwLockWriteGuard<'a, T>> {
    match timeout {
        None => Ok(lock.write()),
        Some(after) => lock
            .try_write_for(after)
            .ok_or(Error::Timeout { operation, after }),
    }
}

pub(crate) fn lock_mutex<'a, T>(
    lock: &'a Mutex<T>,
    timeout: Option<Duration>,
    operation: &'static str,
) -> Result<MutexGuard<'a, T>> {
    match timeout {
        None => Ok(lock.lock()),
        Some(after) => lock
            .try_lock_for(after)
            .ok_or(Error::Timeout { operation, after }),
    }
}
