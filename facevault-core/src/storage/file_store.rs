//! Persistent embedding store on top of the record log.
//!
//! A `FileStore` directory contains:
//! - `meta.json` with the embedding dimension and format version
//! - `records.log`, the append-only frame log
//!
//! Only the byte offset of each identity's latest frame is held in memory;
//! vectors are read from disk on every lookup and scan.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::storage::record_log::{FrameKind, LogRecord, RecordLog};
use crate::storage::{
    lock_mutex, read_lock, write_lock, EmbeddingStore, IdentityRecord, Scan, StoreConfig,
};
use crate::vector::{Embedding, IdentityId};

const META_FILE: &str = "meta.json";
const LOG_FILE: &str = "records.log";
const COMPACT_FILE: &str = "records.log.compact";
const FORMAT_VERSION: u32 = 1;

/// Metadata for the store, persisted to disk.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoreMeta {
    dimension: usize,
    format_version: u32,
}

/// A durable embedding store.
///
/// Upserts append a frame to the log and, once the frame is on disk, publish
/// its offset. Readers resolve offsets under a read lock, so they see either
/// the previous frame or the new one.
///
/// # Example
///
/// ```no_run
/// use facevault_core::{Embedding, EmbeddingStore, FileStore, StoreConfig};
///
/// let store = FileStore::open_or_create("./identities", StoreConfig::new(128)).unwrap();
/// store.upsert(42, Embedding::from_vec(vec![0.0; 128])).unwrap();
///
/// // Reclaim space held by superseded frames.
/// store.compact().unwrap();
/// ```
pub struct FileStore {
    /// Path to the store directory.
    path: PathBuf,
    /// Configuration.
    config: StoreConfig,
    /// Append handle. Held by writers for the duration of an append.
    log: Mutex<RecordLog>,
    /// Offset of the latest frame per identity.
    offsets: RwLock<BTreeMap<IdentityId, u64>>,
}

impl FileStore {
    /// Opens an existing store or creates a new one.
    pub fn open_or_create<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            fs::create_dir_all(&path).map_err(|e| Error::io("create dir failed", e))?;
        }

        let meta_path = path.join(META_FILE);
        if meta_path.exists() {
            let content =
                fs::read_to_string(&meta_path).map_err(|e| Error::io("read meta failed", e))?;
            let meta: StoreMeta = serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("parse meta failed: {}", e)))?;

            if meta.format_version != FORMAT_VERSION {
                return Err(Error::Config(format!(
                    "unsupported store format version {}",
                    meta.format_version
                )));
            }
            if meta.dimension != config.dimension {
                return Err(Error::Config(format!(
                    "dimension mismatch: store has {}, config has {}",
                    meta.dimension, config.dimension
                )));
            }
        } else {
            let meta = StoreMeta {
                dimension: config.dimension,
                format_version: FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&meta)
                .map_err(|e| Error::Config(format!("serialize meta failed: {}", e)))?;
            fs::write(&meta_path, content).map_err(|e| Error::io("write meta failed", e))?;
        }

        let log_path = path.join(LOG_FILE);
        let offsets = recover(&log_path, config.dimension)?;
        let log = RecordLog::open(&log_path, config.sync_mode)?;

        tracing::info!(
            path = %path.display(),
            identities = offsets.len(),
            dimension = config.dimension,
            "opened embedding store"
        );

        Ok(Self {
            path,
            config,
            log: Mutex::new(log),
            offsets: RwLock::new(offsets),
        })
    }

    /// Returns the store directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Rewrites the log keeping only the latest frame of each identity.
    ///
    /// Readers and writers wait while compaction runs. The new log replaces
    /// the old one by rename, so a crash leaves one of the two intact. Once
    /// the rename succeeds, the store switches to the new log and offsets
    /// together.
    pub fn compact(&self) -> Result<()> {
        let mut log = lock_mutex(&self.log, self.config.lock_timeout, "store compaction")?;
        let mut offsets = write_lock(&self.offsets, self.config.lock_timeout, "store compaction")?;

        let log_path = self.path.join(LOG_FILE);
        let compact_path = self.path.join(COMPACT_FILE);
        let _ = fs::remove_file(&compact_path);

        let before = log.write_position();
        let mut new_offsets = BTreeMap::new();
        let mut compacted = RecordLog::open(&compact_path, self.config.sync_mode)?;
        for (&id, &offset) in offsets.iter() {
            let record = RecordLog::read_at(&log_path, offset, self.config.dimension)?;
            let new_offset = compacted.append(&record)?;
            new_offsets.insert(id, new_offset);
        }
        compacted.sync()?;

        compacted.rename_to(&log_path)?;
        *log = compacted;
        *offsets = new_offsets;
        sync_dir(&self.path)?;

        tracing::info!(
            path = %self.path.display(),
            bytes_before = before,
            bytes_after = log.write_position(),
            "compacted record log"
        );

        Ok(())
    }

    fn read_record(&self, id: IdentityId, offset: u64) -> Result<IdentityRecord> {
        let record = RecordLog::read_at(self.path.join(LOG_FILE), offset, self.config.dimension)?;
        if record.kind != FrameKind::Upsert || record.id != id {
            return Err(Error::Corrupted(format!(
                "frame at offset {} does not hold identity {}",
                offset, id
            )));
        }
        let embedding = Embedding::from_vec(record.vector);
        embedding
            .validate(self.config.dimension)
            .map_err(|e| Error::Corrupted(format!("identity {}: {}", id, e)))?;

        Ok(IdentityRecord {
            identity_id: id,
            embedding,
            enrolled_at: UNIX_EPOCH + Duration::from_millis(record.enrolled_at_ms),
        })
    }

    fn append(&self, record: &LogRecord) -> Result<u64> {
        let mut log = lock_mutex(&self.log, self.config.lock_timeout, "store write")?;
        let offset = log.append(record)?;

        // Still holding the log lock, so offsets are published in append order.
        let mut offsets = self.offsets.write();
        match record.kind {
            FrameKind::Upsert => {
                offsets.insert(record.id, offset);
            }
            FrameKind::Remove => {
                offsets.remove(&record.id);
            }
        }
        Ok(offset)
    }
}

impl EmbeddingStore for FileStore {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn upsert(&self, id: IdentityId, embedding: Embedding) -> Result<()> {
        embedding.validate(self.config.dimension)?;

        let enrolled_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        self.append(&LogRecord::upsert(id, enrolled_at_ms, embedding.into_inner()))?;
        tracing::debug!(identity = id, "upserted embedding");
        Ok(())
    }

    fn record(&self, id: IdentityId) -> Result<IdentityRecord> {
        let offsets = read_lock(&self.offsets, self.config.lock_timeout, "store read")?;
        let offset = *offsets.get(&id).ok_or(Error::NotFound(id))?;
        self.read_record(id, offset)
    }

    fn scan(&self) -> Result<Scan<'_>> {
        let ids: Vec<IdentityId> = {
            let offsets = read_lock(&self.offsets, self.config.lock_timeout, "store scan")?;
            offsets.keys().copied().collect()
        };

        let timeout = self.config.lock_timeout;
        let iter = ids.into_iter().filter_map(move |id| {
            let offsets = match read_lock(&self.offsets, timeout, "store scan") {
                Ok(guard) => guard,
                Err(e) => return Some(Err(e)),
            };
            // Removed since the scan started.
            let offset = *offsets.get(&id)?;
            Some(self.read_record(id, offset).map(|r| (id, r.embedding)))
        });

        Ok(Box::new(iter))
    }

    fn remove(&self, id: IdentityId) -> Result<bool> {
        if !self.contains(id) {
            return Ok(false);
        }
        self.append(&LogRecord::remove(id))?;
        tracing::debug!(identity = id, "removed identity");
        Ok(true)
    }

    fn contains(&self, id: IdentityId) -> bool {
        self.offsets.read().contains_key(&id)
    }

    fn len(&self) -> usize {
        self.offsets.read().len()
    }
}

/// Replays the log into an offset table, cutting away a torn tail.
fn recover(log_path: &Path, dimension: usize) -> Result<BTreeMap<IdentityId, u64>> {
    let replay = RecordLog::replay(log_path, dimension)?;

    if replay.torn_bytes > 0 {
        tracing::warn!(
            path = %log_path.display(),
            torn_bytes = replay.torn_bytes,
            "truncating torn frame at end of record log"
        );
        RecordLog::truncate(log_path, replay.valid_len)?;
    }

    let mut offsets = BTreeMap::new();
    for (offset, record) in replay.records {
        match record.kind {
            FrameKind::Upsert => {
                if record.vector.len() != dimension {
                    return Err(Error::Corrupted(format!(
                        "identity {} stored with dimension {}, expected {}",
                        record.id,
                        record.vector.len(),
                        dimension
                    )));
                }
                offsets.insert(record.id, offset);
            }
            FrameKind::Remove => {
                offsets.remove(&record.id);
            }
        }
    }

    Ok(offsets)
}

/// Makes a rename inside `dir` durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| Error::io("directory sync failed", e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SyncMode;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_store_path() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir()
            .join("facevault_test_store")
            .join(format!("store_{}_{}", std::process::id(), id));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_store_create_and_upsert() {
        let path = temp_store_path();
        let store = FileStore::open_or_create(&path, StoreConfig::new(3)).unwrap();

        store.upsert(1, Embedding::new(&[1.0, 0.0, 0.0])).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(1).unwrap().as_slice(), &[1.0, 0.0, 0.0]);

        let record = store.record(1).unwrap();
        assert_eq!(record.identity_id, 1);
        assert!(record.enrolled_at > UNIX_EPOCH);

        let _ = fs::remove_dir_all(&path);
    }

    #[test]
    fn test_store_persistence() {
        let path = temp_store_path();
        let config = StoreConfig::new(3);

        {
            let store = FileStore::open_or_create(&path, config.clone()).unwrap();
            store.upsert(1, Embedding::new(&[1.0, 0.0, 0.0])).unwrap();
            store.upsert(2, Embedding::new(&[0.0, 1.0, 0.0])).unwrap();
            store.upsert(1, Embedding::new(&[0.0, 0.0, 1.0])).unwrap();
            store.remove(2).unwrap();
        }

        {
            let store = FileStore::open_or_create(&path, config).unwrap();
            assert_eq!(store.len(), 1);
            assert_eq!(store.get(1).unwrap().as_slice(), &[0.0, 0.0, 1.0]);
            assert!(matches!(store.get(2), Err(Error::NotFound(2))));
        }

        let _ = fs::remove_dir_all(&path);
    }

    #[test]
    fn test_store_dimension_mismatch_on_reopen() {
        let path = temp_store_path();
        {
            FileStore::open_or_create(&path, StoreConfig::new(3)).unwrap();
        }

        let result = FileStore::open_or_create(&path, StoreConfig::new(128));
        assert!(matches!(result, Err(Error::Config(_))));

        let _ = fs::remove_dir_all(&path);
    }

    #[test]
    fn test_store_recovers_from_torn_tail() {
        let path = temp_store_path();
        let config = StoreConfig::new(3);

        {
            let store = FileStore::open_or_create(&path, config.clone()).unwrap();
            store.upsert(1, Embedding::new(&[1.0, 0.0, 0.0])).unwrap();
        }

        // A crash mid-append leaves a partial header behind.
        let mut file = OpenOptions::new()
            .append(true)
            .open(path.join(LOG_FILE))
            .unwrap();
        file.write_all(&[0xAB, 0xCD, 0xEF]).unwrap();
        drop(file);

        {
            let store = FileStore::open_or_create(&path, config.clone()).unwrap();
            assert_eq!(store.len(), 1);
            store.upsert(2, Embedding::new(&[0.0, 1.0, 0.0])).unwrap();
        }

        let store = FileStore::open_or_create(&path, config).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(2).unwrap().as_slice(), &[0.0, 1.0, 0.0]);

        let _ = fs::remove_dir_all(&path);
    }

    #[test]
    fn test_scan_fails_on_corrupt_record() {
        let path = temp_store_path();
        let store = FileStore::open_or_create(
            &path,
            StoreConfig::new(3).with_sync_mode(SyncMode::NoSync),
        )
        .unwrap();
        store.upsert(1, Embedding::new(&[1.0, 0.0, 0.0])).unwrap();
        store.upsert(2, Embedding::new(&[0.0, 1.0, 0.0])).unwrap();

        // Damage the first frame's vector blob in place.
        let log_path = path.join(LOG_FILE);
        let mut bytes = fs::read(&log_path).unwrap();
        bytes[8 + 21] ^= 0xFF;
        fs::write(&log_path, &bytes).unwrap();

        let results: Vec<_> = store.scan().unwrap().collect();
        assert!(matches!(results[0], Err(Error::Corrupted(_))));
        assert!(results[1].is_ok());

        let _ = fs::remove_dir_all(&path);
    }

    #[test]
    fn test_compact_keeps_latest_records() {
        let path = temp_store_path();
        let config = StoreConfig::new(3);

        {
            let store = FileStore::open_or_create(&path, config.clone()).unwrap();
            for i in 0..10 {
                let x = i as f32 / 10.0;
                store.upsert(1, Embedding::new(&[x, 0.0, 0.0])).unwrap();
            }
            store.upsert(2, Embedding::new(&[0.0, 1.0, 0.0])).unwrap();
            store.upsert(3, Embedding::new(&[0.0, 0.0, 1.0])).unwrap();
            store.remove(3).unwrap();

            let before = fs::metadata(path.join(LOG_FILE)).unwrap().len();
            store.compact().unwrap();
            let after = fs::metadata(path.join(LOG_FILE)).unwrap().len();
            assert!(after < before);

            assert_eq!(store.get(1).unwrap().as_slice(), &[0.9, 0.0, 0.0]);
            store.upsert(4, Embedding::new(&[1.0, 0.0, 0.0])).unwrap();
        }

        let store = FileStore::open_or_create(&path, config).unwrap();
        let ids: Vec<IdentityId> = store.scan().unwrap().map(|r| r.unwrap().0).collect();
        assert_eq!(ids, vec![1, 2, 4]);

        let _ = fs::remove_dir_all(&path);
    }

    #[test]
    fn test_scan_concurrent_with_upserts() {
        let path = temp_store_path();
        let store = FileStore::open_or_create(
            &path,
            StoreConfig::new(4).with_sync_mode(SyncMode::NoSync),
        )
        .unwrap();
        for id in 0..16u64 {
            store.upsert(id, Embedding::new(&[1.0, 0.0, 0.0, 0.0])).unwrap();
        }

        std::thread::scope(|s| {
            for writer in 0..4u64 {
                let store = &store;
                s.spawn(move || {
                    for round in 0..50u64 {
                        let id = (writer * 4 + round) % 16;
                        let x = round as f32;
                        store.upsert(id, Embedding::new(&[x, x, x, x])).unwrap();
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..20 {
                    let mut seen = 0;
                    for item in store.scan().unwrap() {
                        let (_, embedding) = item.unwrap();
                        assert_eq!(embedding.dimension(), 4);
                        // Never a mix of two writes.
                        assert!(embedding.as_slice().windows(2).all(|w| w[0] == w[1])
                            || embedding.as_slice() == [1.0, 0.0, 0.0, 0.0]);
                        seen += 1;
                    }
                    assert_eq!(seen, 16);
                }
            });
        });

        let _ = fs::remove_dir_all(&path);
    }

    #[test]
    fn test_open_rejects_corrupt_length_mid_log() {
        let path = temp_store_path();
        let config = StoreConfig::new(3).with_sync_mode(SyncMode::NoSync);

        {
            let store = FileStore::open_or_create(&path, config.clone()).unwrap();
            for id in 1..=5u64 {
                store.upsert(id, Embedding::new(&[id as f32, 0.0, 0.0])).unwrap();
            }
        }

        // Frames are equally sized; damage the length of the second one.
        let log_path = path.join(LOG_FILE);
        let mut bytes = fs::read(&log_path).unwrap();
        let frame_len = bytes.len() / 5;
        bytes[frame_len + 7] ^= 0x01;
        fs::write(&log_path, &bytes).unwrap();

        let result = FileStore::open_or_create(&path, config);
        assert!(matches!(result, Err(Error::Corrupted(_))));
        assert_eq!(fs::read(&log_path).unwrap(), bytes);

        let _ = fs::remove_dir_all(&path);
    }

    #[test]
    fn test_upsert_times_out_while_log_held() {
        let path = temp_store_path();
        let store = FileStore::open_or_create(
            &path,
            StoreConfig::new(3).with_lock_timeout(Duration::from_millis(20)),
        )
        .unwrap();
        store.upsert(1, Embedding::new(&[1.0, 0.0, 0.0])).unwrap();
        let log_len = fs::metadata(path.join(LOG_FILE)).unwrap().len();

        {
            let _held = store.log.lock();
            let err = store
                .upsert(1, Embedding::new(&[0.0, 1.0, 0.0]))
                .unwrap_err();
            assert!(matches!(
                err,
                Error::Timeout {
                    operation: "store write",
                    ..
                }
            ));
            let err = store.upsert(2, Embedding::new(&[0.0, 0.0, 1.0])).unwrap_err();
            assert!(matches!(err, Error::Timeout { .. }));
        }

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(1).unwrap().as_slice(), &[1.0, 0.0, 0.0]);
        assert!(!store.contains(2));
        assert_eq!(fs::metadata(path.join(LOG_FILE)).unwrap().len(), log_len);

        let _ = fs::remove_dir_all(&path);
    }

    #[test]
    fn test_compact_switches_to_new_log() {
        let path = temp_store_path();
        let store = FileStore::open_or_create(&path, StoreConfig::new(3)).unwrap();
        store.upsert(1, Embedding::new(&[1.0, 0.0, 0.0])).unwrap();
        store.upsert(1, Embedding::new(&[0.0, 1.0, 0.0])).unwrap();

        // Leftover from a compaction interrupted before its rename.
        fs::write(path.join(COMPACT_FILE), b"garbage").unwrap();

        store.compact().unwrap();
        assert!(!path.join(COMPACT_FILE).exists());
        {
            let log = store.log.lock();
            assert_eq!(log.path(), path.join(LOG_FILE).as_path());
            assert_eq!(
                log.write_position(),
                fs::metadata(path.join(LOG_FILE)).unwrap().len()
            );
        }

        store.upsert(2, Embedding::new(&[0.0, 0.0, 1.0])).unwrap();
        assert_eq!(store.get(1).unwrap().as_slice(), &[0.0, 1.0, 0.0]);
        assert_eq!(store.get(2).unwrap().as_slice(), &[0.0, 0.0, 1.0]);

        let _ = fs::remove_dir_all(&path);
    }

    #[test]
    fn test_remove_missing_writes_nothing() {
        let path = temp_store_path();
        let store = FileStore::open_or_create(&path, StoreConfig::new(3)).unwrap();
        assert!(!store.remove(5).unwrap());
        assert_eq!(fs::metadata(path.join(LOG_FILE)).unwrap().len(), 0);

        let _ = fs::remove_dir_all(&path);
    }
}
