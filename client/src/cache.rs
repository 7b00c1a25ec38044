//! Seam between the network engine and whatever draws the world
//!
//! The comm engine never touches rendering state directly. Every valid
//! position update and object deletion is forwarded through [`ObjectCache`];
//! the renderer (or a test) decides what to do with it.

use log::debug;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

pub trait ObjectCache: Send + Sync {
    /// Called exactly once per valid inbound POSUPD
    fn update_object(
        &self,
        object_id: u64,
        frame_number: u16,
        position: [f64; 3],
        orientation: [f64; 4],
        look: [f64; 3],
    );

    fn delete_object(&self, object_id: u64) {
        debug!("Object {} deleted", object_id);
    }
}

/// Last known state of one remote object
#[derive(Debug, Clone, PartialEq)]
pub struct CachedObject {
    pub frame_number: u16,
    pub position: [f64; 3],
    pub orientation: [f64; 4],
    pub look: [f64; 3],
}

/// In-memory object cache keeping the latest update per object
#[derive(Default)]
pub struct ObjectStore {
    objects: Mutex<HashMap<u64, CachedObject>>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, object_id: u64) -> Option<CachedObject> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&object_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectCache for ObjectStore {
    fn update_object(
        &self,
        object_id: u64,
        frame_number: u16,
        position: [f64; 3],
        orientation: [f64; 4],
        look: [f64; 3],
    ) {
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        objects.insert(
            object_id,
            CachedObject {
                frame_number,
                position,
                orientation,
                look,
            },
        );
    }

    fn delete_object(&self, object_id: u64) {
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        if objects.remove(&object_id).is_some() {
            debug!("Removed object {} from cache", object_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_keeps_latest_update() {
        let store = ObjectStore::new();
        assert!(store.is_empty());

        store.update_object(4, 1, [1.0, 2.0, 3.0], [1.0, 0.0, 0.0, 0.0], [0.0; 3]);
        store.update_object(4, 2, [1.5, 2.0, 3.0], [1.0, 0.0, 0.0, 0.0], [0.0; 3]);

        assert_eq!(store.len(), 1);
        let object = store.get(4).unwrap();
        assert_eq!(object.frame_number, 2);
        assert_eq!(object.position, [1.5, 2.0, 3.0]);
    }

    #[test]
    fn test_store_delete() {
        let store = ObjectStore::new();
        store.update_object(8, 0, [0.0; 3], [1.0, 0.0, 0.0, 0.0], [0.0; 3]);
        store.delete_object(8);
        store.delete_object(9);
        assert!(store.get(8).is_none());
        assert!(store.is_empty());
    }
}
