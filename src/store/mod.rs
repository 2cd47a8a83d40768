//! Pluggable state persistence.
//!
//! The store holds one document per principal plus the global cursor
//! document, keyed by object id. The capability surface is deliberately
//! small (read, write, init) so nothing above this boundary depends on a
//! particular store's query dialect. [`MemoryStateStore`] backs the test
//! suites; [`http::HttpStateStore`] talks to the production document
//! store.

pub mod http;

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::PrincipalObject;

pub use http::HttpStateStore;

/// State document persistence.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetches a document by object id; `None` when absent.
    async fn read(&self, object_id: &str) -> Result<Option<PrincipalObject>>;

    /// Upserts a document under its object id.
    async fn write(&self, object: &PrincipalObject) -> Result<()>;

    /// Prepares the backing index. With `delete_existing` the index is
    /// wiped and recreated.
    async fn init(&self, delete_existing: bool) -> Result<()>;
}

/// In-memory store used by tests.
#[derive(Default)]
pub struct MemoryStateStore {
    objects: Mutex<HashMap<String, PrincipalObject>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every stored document.
    pub fn snapshot(&self) -> Vec<PrincipalObject> {
        self.objects.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn read(&self, object_id: &str) -> Result<Option<PrincipalObject>> {
        Ok(self.objects.lock().unwrap().get(object_id).cloned())
    }

    async fn write(&self, object: &PrincipalObject) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(object.object_id.clone(), object.clone());
        Ok(())
    }

    async fn init(&self, delete_existing: bool) -> Result<()> {
        if delete_existing {
            self.objects.lock().unwrap().clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_read_absent() {
        let store = MemoryStateStore::new();
        assert!(store.read("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_write_read_round_trip() {
        let store = MemoryStateStore::new();
        let obj = PrincipalObject::new("user@host.com", "ctx").unwrap();
        store.write(&obj).await.unwrap();

        let got = store.read(&obj.object_id).await.unwrap().unwrap();
        assert_eq!(got.object_id_string, "user@host.com");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_write_is_upsert() {
        let store = MemoryStateStore::new();
        let mut obj = PrincipalObject::new("user@host.com", "ctx").unwrap();
        store.write(&obj).await.unwrap();
        obj.num_centers = 3;
        store.write(&obj).await.unwrap();

        assert_eq!(store.len(), 1);
        let got = store.read(&obj.object_id).await.unwrap().unwrap();
        assert_eq!(got.num_centers, 3);
    }

    #[tokio::test]
    async fn test_memory_store_init_wipe() {
        let store = MemoryStateStore::new();
        let obj = PrincipalObject::new("user@host.com", "ctx").unwrap();
        store.write(&obj).await.unwrap();

        store.init(false).await.unwrap();
        assert_eq!(store.len(), 1);
        store.init(true).await.unwrap();
        assert!(store.is_empty());
    }
}
