use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::{ByteRange, NodeKey, Store, StoreError};

/// In-memory store backed by a hash map, mainly for testing and
/// ephemeral arrays.
#[derive(Default)]
pub struct MemoryStore {
    map: RwLock<HashMap<NodeKey, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &NodeKey) -> Result<Option<Bytes>, StoreError> {
        let map = self.map.read();
        // Bytes clones are cheap (refcounted)
        Ok(map.get(key).cloned())
    }

    async fn get_partial_values(
        &self,
        key: &NodeKey,
        ranges: &[ByteRange],
    ) -> Result<Option<Vec<Bytes>>, StoreError> {
        let map = self.map.read();
        match map.get(key) {
            None => Ok(None),
            Some(value) => ranges
                .iter()
                .map(|r| r.extract(value))
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
        }
    }

    async fn set(&self, key: &NodeKey, value: Bytes) -> Result<(), StoreError> {
        let mut map = self.map.write();
        map.insert(key.clone(), value);
        Ok(())
    }

    async fn set_partial_values(
        &self,
        key: &NodeKey,
        writes: &[(u64, Bytes)],
    ) -> Result<(), StoreError> {
        let mut map = self.map.write();
        let mut buf = map.get(key).map(|b| b.to_vec()).unwrap_or_default();
        for (offset, data) in writes {
            let offset = *offset as usize;
            let end = offset + data.len();
            if buf.len() < end {
                buf.resize(end, 0);
            }
            buf[offset..end].copy_from_slice(data);
        }
        map.insert(key.clone(), buf.into());
        Ok(())
    }

    async fn erase(&self, key: &NodeKey) -> Result<(), StoreError> {
        let mut map = self.map.write();
        map.remove(key);
        Ok(())
    }

    async fn has_key(&self, key: &NodeKey) -> Result<bool, StoreError> {
        let map = self.map.read();
        Ok(map.contains_key(key))
    }

    async fn list_prefix(&self, prefix: &NodeKey) -> Result<Vec<NodeKey>, StoreError> {
        let map = self.map.read();
        Ok(map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
