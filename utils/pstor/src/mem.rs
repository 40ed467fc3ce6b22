use crate::{Store, StoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// An in-memory [`Store`], used by tests that exercise the nexus-info
/// operations without a real etcd cluster.
#[derive(Default)]
pub struct MemStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
