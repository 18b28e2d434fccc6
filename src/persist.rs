//! Selection persistence
//!
//! The reconciled selection survives restarts through a key/value store of
//! JSON records, one per theater. Persistence is best-effort: in-memory state
//! stays authoritative for the running session, and a corrupt record is
//! always replaced with sentinel defaults rather than left in place.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Selection shown when nothing has been chosen yet or the stored record is
/// unreadable.
pub const SENTINEL_ACTIVITY: &str = "All Off";
pub const SENTINEL_DEVICE: &str = "None";

/// Storage key scoped to one theater.
pub fn storage_key(title: &str) -> String {
    format!("theater-{}", title)
}

/// The persisted selection. Written with canonical field names; the legacy
/// `activeActivity`/`activeDevice` names from earlier panel builds are still
/// accepted on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRecord {
    #[serde(rename = "currentActivity", alias = "activeActivity")]
    pub current_activity: String,

    #[serde(rename = "currentDevice", alias = "activeDevice")]
    pub current_device: String,
}

impl Default for SelectionRecord {
    fn default() -> Self {
        Self {
            current_activity: SENTINEL_ACTIVITY.to_string(),
            current_device: SENTINEL_DEVICE.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no record for key {0}")]
    Missing(String),

    #[error("invalid record: {0}")]
    Invalid(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("store unavailable")]
    Unavailable,
}

/// Key/value storage for selection records.
#[async_trait]
pub trait SelectionStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<SelectionRecord, StoreError>;
    async fn save(&self, key: &str, record: &SelectionRecord) -> Result<(), StoreError>;
}

/// File-backed store: one `<key>.json` per theater under the data directory.
pub struct FileSelectionStore {
    data_dir: PathBuf,
}

impl FileSelectionStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl SelectionStore for FileSelectionStore {
    async fn load(&self, key: &str) -> Result<SelectionRecord, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Err(StoreError::Missing(key.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn save(&self, key: &str, record: &SelectionRecord) -> Result<(), StoreError> {
        fs::create_dir_all(&self.data_dir)?;
        let json = serde_json::to_string_pretty(record)?;
        fs::write(self.path_for(key), json)?;
        Ok(())
    }
}

/// In-process store used by tests and broker-less demos. Records are held as
/// raw JSON so loads exercise the same decode path as the file store; writes
/// can be made to fail and are counted.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw JSON value under a key, bypassing the write counter.
    pub fn seed_raw(&self, key: &str, json: &str) {
        self.records
            .lock()
            .unwrap()
            .insert(key.to_string(), json.to_string());
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.records.lock().unwrap().get(key).cloned()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SelectionStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<SelectionRecord, StoreError> {
        let records = self.records.lock().unwrap();
        let raw = records
            .get(key)
            .ok_or_else(|| StoreError::Missing(key.to_string()))?;
        Ok(serde_json::from_str(raw)?)
    }

    async fn save(&self, key: &str, record: &SelectionRecord) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        let json = serde_json::to_string(record)?;
        self.records.lock().unwrap().insert(key.to_string(), json);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
