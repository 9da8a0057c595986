//! In-process embedding store.

use std::collections::BTreeMap;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::storage::{read_lock, write_lock, EmbeddingStore, IdentityRecord, Scan, StoreConfig};
use crate::vector::{Embedding, IdentityId};

/// Embedding store backed by an ordered map behind a `RwLock`.
///
/// Nothing survives the process. Useful for tests and for deployments that
/// rebuild their population from elsewhere on start.
///
/// # Example
///
/// ```
/// use facevault_core::{Embedding, EmbeddingStore, MemoryStore, StoreConfig};
///
/// let store = MemoryStore::new(StoreConfig::new(3));
/// store.upsert(1, Embedding::new(&[1.0, 0.0, 0.0])).unwrap();
/// assert_eq!(store.get(1).unwrap().as_slice(), &[1.0, 0.0, 0.0]);
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    config: StoreConfig,
    records: RwLock<BTreeMap<IdentityId, IdentityRecord>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

impl EmbeddingStore for MemoryStore {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn upsert(&self, id: IdentityId, embedding: Embedding) -> Result<()> {
        embedding.validate(self.config.dimension)?;

        let record = IdentityRecord {
            identity_id: id,
            embedding,
            enrolled_at: SystemTime::now(),
        };

        let mut records = write_lock(&self.records, self.config.lock_timeout, "store write")?;
        records.insert(id, record);
        Ok(())
    }

    fn record(&self, id: IdentityId) -> Result<IdentityRecord> {
        let records = read_lock(&self.records, self.config.lock_timeout, "store read")?;
        records.get(&id).cloned().ok_or(Error::NotFound(id))
    }

    fn scan(&self) -> Result<Scan<'_>> {
        let ids: Vec<IdentityId> = {
            let records = read_lock(&self.records, self.config.lock_timeout, "store scan")?;
            records.keys().copied().collect()
        };

        let timeout = self.config.lock_timeout;
        let iter = ids.into_iter().filter_map(move |id| {
            let records = match read_lock(&self.records, timeout, "store scan") {
                Ok(guard) => guard,
                Err(e) => return Some(Err(e)),
            };
            // Removed since the scan started.
            records
                .get(&id)
                .map(|r| Ok((id, r.embedding.clone())))
        });

        Ok(Box::new(iter))
    }

    fn remove(&self, id: IdentityId) -> Result<bool> {
        let mut records = write_lock(&self.records, self.config.lock_timeout, "store write")?;
        Ok(records.remove(&id).is_some())
    }

    fn contains(&self, id: IdentityId) -> bool {
        self.records.read().contains_key(&id)
    }

    fn len(&self) -> usize {
        self.records.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn create_test_store() -> MemoryStore {
        let store = MemoryStore::new(StoreConfig::new(3));
        store.upsert(1, Embedding::new(&[1.0, 0.0, 0.0])).unwrap();
        store.upsert(2, Embedding::new(&[0.0, 1.0, 0.0])).unwrap();
        store.upsert(3, Embedding::new(&[0.0, 0.0, 1.0])).unwrap();
        store
    }

    #[test]
    fn test_upsert_and_get() {
        let store = create_test_store();
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(2).unwrap().as_slice(), &[0.0, 1.0, 0.0]);
        assert!(store.contains(3));
    }

    #[test]
    fn test_upsert_replaces() {
        let store = create_test_store();
        store.upsert(1, Embedding::new(&[0.6, 0.8, 0.0])).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(1).unwrap().as_slice(), &[0.6, 0.8, 0.0]);
    }

    #[test]
    fn test_get_not_found() {
        let store = create_test_store();
        assert!(matches!(store.get(99), Err(Error::NotFound(99))));
    }

    #[test]
    fn test_upsert_rejects_invalid_vectors() {
        let store = MemoryStore::new(StoreConfig::new(3));
        assert!(matches!(
            store.upsert(1, Embedding::new(&[1.0, 0.0])),
            Err(Error::DimensionMismatch { .. })
        ));
        assert!(matches!(
            store.upsert(1, Embedding::new(&[1.0, f32::NAN, 0.0])),
            Err(Error::NonFiniteComponent { index: 1 })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_scan_is_ordered_and_restartable() {
        let store = create_test_store();

        let first: Vec<IdentityId> = store.scan().unwrap().map(|r| r.unwrap().0).collect();
        let second: Vec<IdentityId> = store.scan().unwrap().map(|r| r.unwrap().0).collect();
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_scan_sees_removal_during_iteration() {
        let store = create_test_store();
        let mut scan = store.scan().unwrap();

        assert_eq!(scan.next().unwrap().unwrap().0, 1);
        store.remove(2).unwrap();
        assert_eq!(scan.next().unwrap().unwrap().0, 3);
        assert!(scan.next().is_none());
    }

    #[test]
    fn test_scan_empty() {
        let store = MemoryStore::new(StoreConfig::new(3));
        assert_eq!(store.scan().unwrap().count(), 0);
    }

    #[test]
    fn test_remove() {
        let store = create_test_store();
        assert!(store.remove(1).unwrap());
        assert!(!store.remove(1).unwrap());
        assert!(!store.contains(1));
    }

    #[test]
    fn test_upsert_times_out_under_held_lock() {
        let store = MemoryStore::new(
            StoreConfig::new(3).with_lock_timeout(Duration::from_millis(20)),
        );
        store.upsert(1, Embedding::new(&[1.0, 0.0, 0.0])).unwrap();

        let held = store.records.read();
        let err = store
            .upsert(1, Embedding::new(&[0.0, 1.0, 0.0]))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        drop(held);

        assert_eq!(store.get(1).unwrap().as_slice(), &[1.0, 0.0, 0.0]);
    }
}
