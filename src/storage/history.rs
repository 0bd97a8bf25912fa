//! Bounded alert history backed by sled.
//!
//! Keys are sled-generated ids as u64 big-endian bytes, so iteration order is
//! insertion order. Values are JSON-serialized [`AlertRecord`]s. Once the
//! tree exceeds its capacity the oldest entries are popped.

use std::path::Path;
use tracing::{debug, warn};

use crate::types::AlertRecord;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

const TREE_NAME: &str = "alerts";

#[derive(Clone)]
pub struct AlertHistory {
    db: sled::Db,
    tree: sled::Tree,
    capacity: usize,
}

impl AlertHistory {
    /// Open or create the history database at `path`.
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::with_db(db, capacity)
    }

    /// In-memory history removed on drop. For tests and dry runs.
    pub fn temporary(capacity: usize) -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::with_db(db, capacity)
    }

    fn with_db(db: sled::Db, capacity: usize) -> Result<Self, StorageError> {
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self {
            db,
            tree,
            capacity: capacity.max(1),
        })
    }

    /// Append a record, dropping the oldest entries beyond capacity.
    pub fn append(&self, record: &AlertRecord) -> Result<(), StorageError> {
        let key = self.db.generate_id()?.to_be_bytes();
        let value = serde_json::to_vec(record)?;
        self.tree.insert(key, value)?;

        while self.tree.len() > self.capacity {
            if self.tree.pop_min()?.is_none() {
                break;
            }
        }
        debug!(id = %record.id, camera = %record.camera, "Alert recorded");
        Ok(())
    }

    /// All records, newest first. Undecodable entries are skipped.
    pub fn list(&self) -> Vec<AlertRecord> {
        self.tree
            .iter()
            .rev()
            .filter_map(|item| {
                let (_key, value) = item.ok()?;
                match serde_json::from_slice::<AlertRecord>(&value) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(error = %e, "Skipping corrupt alert history entry");
                        None
                    }
                }
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<AlertRecord> {
        self.find(id).map(|(_, record)| record)
    }

    /// Remove the record with the given id. Returns whether one existed.
    pub fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let Some((key, _)) = self.find(id) else {
            return Ok(false);
        };
        Ok(self.tree.remove(key)?.is_some())
    }

    fn find(&self, id: &str) -> Option<(sled::IVec, AlertRecord)> {
        self.tree.iter().filter_map(Result::ok).find_map(|(key, value)| {
            let record: AlertRecord = serde_json::from_slice(&value).ok()?;
            (record.id == id).then_some((key, record))
        })
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.tree.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertKind, CameraId, DispatchStatus};
    use chrono::Utc;

    fn record(detail: &str) -> AlertRecord {
        AlertRecord {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            camera: CameraId::new("hall"),
            camera_name: "Hallway".to_string(),
            event_type: AlertKind::Fall,
            status: DispatchStatus::Sent,
            detail: detail.to_string(),
            evidence_path: None,
        }
    }

    #[test]
    fn test_list_is_newest_first() {
        let history = AlertHistory::temporary(10).expect("open");
        for i in 0..3 {
            history.append(&record(&format!("n{i}"))).expect("append");
        }
        let details: Vec<String> = history.list().into_iter().map(|r| r.detail).collect();
        assert_eq!(details, vec!["n2", "n1", "n0"]);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let history = AlertHistory::temporary(3).expect("open");
        for i in 0..5 {
            history.append(&record(&format!("n{i}"))).expect("append");
        }
        assert_eq!(history.len(), 3);
        let details: Vec<String> = history.list().into_iter().map(|r| r.detail).collect();
        assert_eq!(details, vec!["n4", "n3", "n2"]);
    }

    #[test]
    fn test_delete_by_id() {
        let history = AlertHistory::temporary(10).expect("open");
        let keep = record("keep");
        let drop = record("drop");
        history.append(&keep).expect("append");
        history.append(&drop).expect("append");

        assert!(history.delete(&drop.id).expect("delete"));
        assert!(!history.delete(&drop.id).expect("second delete"));
        assert!(!history.delete("no-such-id").expect("unknown id"));
        assert_eq!(history.list(), vec![keep]);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.db");
        let rec = record("persisted");
        {
            let history = AlertHistory::open(&path, 10).expect("open");
            history.append(&rec).expect("append");
            history.flush().expect("flush");
        }
        let history = AlertHistory::open(&path, 10).expect("reopen");
        assert_eq!(history.get(&rec.id), Some(rec));
    }
}
