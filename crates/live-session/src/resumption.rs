//! Persistence of server-issued session resumption handles.
//!
//! Handles are stored per session id with the time they were received and
//! are treated as gone once older than two hours.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub const RESUMPTION_KEY_PREFIX: &str = "gemini-live-resumption-";
pub const HANDLE_TTL_MS: i64 = 2 * 60 * 60 * 1000;

/// A minimal string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Lowercase letters, digits and `-` are kept; every other byte becomes
    /// `_` plus two hex digits, so distinct keys never share a file, even on
    /// case-insensitive filesystems.
    fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' {
                name.push(byte as char);
            } else {
                name.push_str(&format!("_{byte:02x}"));
            }
        }
        self.dir.join(format!("{name}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        std::fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Wall clock in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResumptionRecord {
    pub handle: String,
    /// Epoch milliseconds when the handle was received.
    pub timestamp: i64,
}

#[derive(Clone)]
pub struct ResumptionStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
}

impl ResumptionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            ttl_ms: HANDLE_TTL_MS,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn key(session_id: Option<&str>) -> String {
        format!("{RESUMPTION_KEY_PREFIX}{}", session_id.unwrap_or("default"))
    }

    pub fn save(&self, session_id: Option<&str>, handle: &str) -> Result<(), StoreError> {
        let record = ResumptionRecord {
            handle: handle.to_string(),
            timestamp: self.clock.now_ms(),
        };
        self.store
            .set(&Self::key(session_id), &serde_json::to_string(&record)?)?;
        tracing::debug!(session_id = session_id.unwrap_or("default"), "Stored resumption handle");
        Ok(())
    }

    /// The stored handle, if any and not expired. Expired or unreadable
    /// records are removed.
    pub fn get(&self, session_id: Option<&str>) -> Option<ResumptionRecord> {
        let key = Self::key(session_id);
        let raw = match self.store.get(&key) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(%key, "Failed to read resumption handle: {}", e);
                return None;
            }
        };

        let record = match serde_json::from_str::<ResumptionRecord>(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(%key, "Discarding malformed resumption record: {}", e);
                self.purge(&key);
                return None;
            }
        };

        let age = self.clock.now_ms() - record.timestamp;
        if age > self.ttl_ms {
            tracing::info!(%key, age_ms = age, "Resumption handle expired");
            self.purge(&key);
            return None;
        }
        Some(record)
    }

    pub fn clear(&self, session_id: Option<&str>) -> Result<(), StoreError> {
        self.store.remove(&Self::key(session_id))
    }

    fn purge(&self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            tracing::warn!(%key, "Failed to remove resumption record: {}", e);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ManualClock;
    use super::*;

    const T: i64 = 1_700_000_000_000;

    fn store_at(clock: Arc<ManualClock>) -> (ResumptionStore, Arc<MemoryStore>) {
        let backing = Arc::new(MemoryStore::new());
        (ResumptionStore::with_clock(backing.clone(), clock), backing)
    }

    #[test]
    fn test_key_uses_default_without_session_id() {
        assert_eq!(ResumptionStore::key(None), "gemini-live-resumption-default");
        assert_eq!(ResumptionStore::key(Some("abc")), "gemini-live-resumption-abc");
    }

    #[test]
    fn test_fresh_handle_is_returned() {
        let clock = Arc::new(ManualClock::at(T));
        let (store, _) = store_at(clock.clone());
        store.save(Some("s1"), "h1").unwrap();

        clock.advance(60 * 60 * 1000);
        let record = store.get(Some("s1")).unwrap();
        assert_eq!(record.handle, "h1");
        assert_eq!(record.timestamp, T);
        assert!(store.get(Some("other")).is_none());
    }

    #[test]
    fn test_expired_handle_is_purged() {
        let clock = Arc::new(ManualClock::at(T));
        let (store, backing) = store_at(clock.clone());
        store.save(Some("s1"), "h1").unwrap();

        clock.advance(HANDLE_TTL_MS + 1);
        assert!(store.get(Some("s1")).is_none());
        assert_eq!(backing.get(&ResumptionStore::key(Some("s1"))).unwrap(), None);
    }

    #[test]
    fn test_handle_at_exact_ttl_is_kept() {
        let clock = Arc::new(ManualClock::at(T));
        let (store, _) = store_at(clock.clone());
        store.save(None, "h1").unwrap();
        clock.advance(HANDLE_TTL_MS);
        assert!(store.get(None).is_some());
    }

    #[test]
    fn test_malformed_record_is_purged() {
        let clock = Arc::new(ManualClock::at(T));
        let (store, backing) = store_at(clock);
        let key = ResumptionStore::key(None);
        backing.set(&key, "not json").unwrap();
        assert!(store.get(None).is_none());
        assert_eq!(backing.get(&key).unwrap(), None);
    }

    #[test]
    fn test_clear() {
        let store = ResumptionStore::in_memory();
        store.save(Some("s1"), "h1").unwrap();
        store.clear(Some("s1")).unwrap();
        assert!(store.get(Some("s1")).is_none());
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at(T));

        let first = ResumptionStore::with_clock(
            Arc::new(FileStore::new(dir.path()).unwrap()),
            clock.clone(),
        );
        first.save(Some("lecture/1"), "h1").unwrap();

        let second = ResumptionStore::with_clock(
            Arc::new(FileStore::new(dir.path()).unwrap()),
            clock,
        );
        assert_eq!(second.get(Some("lecture/1")).unwrap().handle, "h1");
        assert!(dir.path().join("gemini-live-resumption-lecture_2f1.json").exists());
    }

    #[test]
    fn test_file_store_keeps_similar_keys_apart() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.set("a/1", "slash").unwrap();
        store.set("a_1", "underscore").unwrap();
        store.set("A_1", "upper").unwrap();

        assert_eq!(store.get("a/1").unwrap().as_deref(), Some("slash"));
        assert_eq!(store.get("a_1").unwrap().as_deref(), Some("underscore"));
        assert_eq!(store.get("A_1").unwrap().as_deref(), Some("upper"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
    }

    #[test]
    fn test_file_store_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(store.remove("missing").is_ok());
        assert_eq!(store.get("missing").unwrap(), None);
    }
}
