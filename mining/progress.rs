//! Durable per-session nonce checkpoints
//!
//! The store keeps one record per [`SessionId`] of the shape
//! `{"nonce": "<decimal>"}`, read when a session starts and written as the
//! search advances.

use crate::errors::{StoreError, StoreResult};
use crate::job::SessionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persisted checkpoint of one session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(with = "crate::job::nonce_string")]
    pub nonce: u64,
}

/// Key-value record of the last evaluated nonce per mining session
pub trait ProgressStore: Send + Sync {
    fn load(&self, session: &SessionId) -> StoreResult<Option<u64>>;

    /// Records `nonce`; a stored cursor is never moved backwards
    fn save(&self, session: &SessionId, nonce: u64) -> StoreResult<()>;

    fn clear(&self, session: &SessionId) -> StoreResult<()>;
}

/// In-process store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    records: Mutex<BTreeMap<String, ProgressRecord>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressStore for MemoryProgressStore {
    fn load(&self, session: &SessionId) -> StoreResult<Option<u64>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(session.as_str()).map(|r| r.nonce))
    }

    fn save(&self, session: &SessionId, nonce: u64) -> StoreResult<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let entry = records
            .entry(session.as_str().to_string())
            .or_insert(ProgressRecord { nonce });
        entry.nonce = entry.nonce.max(nonce);
        Ok(())
    }

    fn clear(&self, session: &SessionId) -> StoreResult<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.remove(session.as_str());
        Ok(())
    }
}

/// JSON file store surviving process restarts
///
/// The whole map is rewritten on every save through a temporary file and a
/// rename, so a crash leaves either the old or the new file in place.
#[derive(Debug)]
pub struct FileProgressStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> StoreResult<BTreeMap<String, ProgressRecord>> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Like [`read_all`](Self::read_all), but an unreadable map is replaced by
    /// an empty one so the next write repairs the file
    fn read_for_update(&self) -> StoreResult<BTreeMap<String, ProgressRecord>> {
        match self.read_all() {
            Err(StoreError::Serialization(e)) => {
                log::warn!(
                    "Discarding corrupt progress file {}: {}",
                    self.path.display(),
                    e
                );
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }

    fn write_all(&self, records: &BTreeMap<String, ProgressRecord>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| StoreError::InvalidData(format!("not a file path: {}", self.path.display())))?;
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&serde_json::to_vec_pretty(records)?)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl ProgressStore for FileProgressStore {
    fn load(&self, session: &SessionId) -> StoreResult<Option<u64>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_all()?.get(session.as_str()).map(|r| r.nonce))
    }

    fn save(&self, session: &SessionId, nonce: u64) -> StoreResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records = self.read_for_update()?;
        let entry = records
            .entry(session.as_str().to_string())
            .or_insert(ProgressRecord { nonce });
        if entry.nonce > nonce {
            return Ok(());
        }
        entry.nonce = nonce;
        self.write_all(&records)
    }

    fn clear(&self, session: &SessionId) -> StoreResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records = self.read_all()?;
        if records.remove(session.as_str()).is_some() {
            self.write_all(&records)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::SignerId;
    use miner_hashes::Hash;

    fn session(n: u8) -> SessionId {
        SessionId::new(&SignerId::new([n; 32]), &Hash::from_low_byte(n))
    }

    #[test]
    fn test_memory_store_is_monotonic() {
        let store = MemoryProgressStore::new();
        let id = session(1);
        assert_eq!(store.load(&id).unwrap(), None);
        store.save(&id, 100).unwrap();
        store.save(&id, 50).unwrap();
        assert_eq!(store.load(&id).unwrap(), Some(100));
        store.clear(&id).unwrap();
        assert_eq!(store.load(&id).unwrap(), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let id = session(2);

        FileProgressStore::new(&path).save(&id, 12_345).unwrap();

        let reopened = FileProgressStore::new(&path);
        assert_eq!(reopened.load(&id).unwrap(), Some(12_345));
        assert_eq!(reopened.load(&session(3)).unwrap(), None);
    }

    #[test]
    fn test_file_store_record_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("progress.json");
        let store = FileProgressStore::new(&path);
        let id = session(4);
        store.save(&id, u64::MAX).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw[id.as_str()]["nonce"], "18446744073709551615");
    }

    #[test]
    fn test_file_store_ignores_lower_cursor_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProgressStore::new(dir.path().join("progress.json"));
        let id = session(5);
        store.save(&id, 10).unwrap();
        store.save(&id, 9).unwrap();
        assert_eq!(store.load(&id).unwrap(), Some(10));
        store.clear(&id).unwrap();
        assert_eq!(store.load(&id).unwrap(), None);
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = FileProgressStore::new(&path);
        assert!(matches!(store.load(&session(6)), Err(StoreError::Serialization(_))));
    }

    #[test]
    fn test_save_repairs_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = FileProgressStore::new(&path);
        let id = session(7);

        store.save(&id, 77).unwrap();
        assert_eq!(store.load(&id).unwrap(), Some(77));
        store.save(&id, 88).unwrap();
        assert_eq!(FileProgressStore::new(&path).load(&id).unwrap(), Some(88));
    }
}
