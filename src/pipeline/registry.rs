//! Camera-keyed registry.
//!
//! Holds at most one entry per [`CameraId`]. Entries are handed out as
//! `Arc`s so the map lock is only held for the lookup itself; per-camera
//! mutation is serialized by the entry's own lock, never by the map.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::CameraId;

pub struct CameraRegistry<T> {
    entries: RwLock<HashMap<CameraId, Arc<T>>>,
}

impl<T> Default for CameraRegistry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> CameraRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<CameraId, Arc<T>>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CameraId, Arc<T>>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert if absent. Returns the rejected value when the id is taken.
    pub fn insert(&self, id: CameraId, value: T) -> Result<Arc<T>, T> {
        let mut entries = self.write();
        if entries.contains_key(&id) {
            return Err(value);
        }
        let entry = Arc::new(value);
        entries.insert(id, Arc::clone(&entry));
        Ok(entry)
    }

    pub fn get(&self, id: &CameraId) -> Option<Arc<T>> {
        self.read().get(id).cloned()
    }

    pub fn remove(&self, id: &CameraId) -> Option<Arc<T>> {
        self.write().remove(id)
    }

    pub fn contains(&self, id: &CameraId) -> bool {
        self.read().contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<CameraId> {
        let mut ids: Vec<CameraId> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove and return every entry.
    pub fn drain(&self) -> Vec<(CameraId, Arc<T>)> {
        self.write().drain().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_entry_per_camera() {
        let reg: CameraRegistry<u32> = CameraRegistry::new();
        assert!(reg.insert(CameraId::new("a"), 1).is_ok());
        assert_eq!(reg.insert(CameraId::new("a"), 2).err(), Some(2));
        assert_eq!(reg.get(&CameraId::new("a")).map(|v| *v), Some(1));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_remove_and_reinsert() {
        let reg: CameraRegistry<u32> = CameraRegistry::new();
        reg.insert(CameraId::new("b"), 1).ok();
        reg.insert(CameraId::new("a"), 1).ok();
        assert_eq!(reg.ids(), vec![CameraId::new("a"), CameraId::new("b")]);

        assert!(reg.remove(&CameraId::new("a")).is_some());
        assert!(reg.remove(&CameraId::new("a")).is_none());
        assert!(reg.insert(CameraId::new("a"), 3).is_ok());
        assert_eq!(reg.drain().len(), 2);
        assert!(reg.is_empty());
    }
}
