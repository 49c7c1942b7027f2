//! In-memory implementation of the ObjectStore trait.
//!
//! All data is lost when the store is dropped.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use objnet_core::{Digest, Object};

use crate::error::{Result, StoreError};
use crate::traits::{Filter, ObjectStore};

/// In-memory object store keyed by content hash.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<Digest, Object>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, hash: &Digest) -> Result<Object> {
        self.objects
            .read()
            .get(hash)
            .cloned()
            .ok_or(StoreError::NotFound(*hash))
    }

    async fn put(&self, object: &Object) -> Result<Digest> {
        let hash = object.hash();
        let mut objects = self.objects.write();
        // A re-put may carry a newer signature; keep the latest copy.
        objects.insert(hash, object.clone());
        debug!(hash = %hash, object_type = %object.object_type, "stored object");
        Ok(hash)
    }

    async fn filter(&self, filter: &Filter) -> Result<Vec<Object>> {
        Ok(self
            .objects
            .read()
            .iter()
            .filter(|(hash, object)| filter.matches(hash, object))
            .map(|(_, object)| object.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StoreExt;
    use objnet_core::{sign, Keypair};

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();
        let object = Object::new("test/msg").with_field("body", "hello");

        let hash = store.put(&object).await.unwrap();
        assert_eq!(hash, object.hash());

        let retrieved = store.get(&hash).await.unwrap();
        assert_eq!(retrieved, object);
    }

    #[tokio::test]
    async fn test_memory_store_idempotent() {
        let store = MemoryStore::new();
        let keypair = Keypair::generate();
        let mut object = Object::new("test/msg").with_field("body", "hello");

        let first = store.put(&object).await.unwrap();
        sign(&keypair, &mut object).unwrap();
        let second = store.put(&object).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
        assert!(store.get(&first).await.unwrap().metadata.signature.is_some());
    }

    #[tokio::test]
    async fn test_memory_store_not_found() {
        let store = MemoryStore::new();
        let err = store.get(&Digest::ZERO).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(d) if d == Digest::ZERO));
        assert!(store.get_optional(&Digest::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_filter() {
        let store = MemoryStore::new();
        let owner = Keypair::generate().public_key();
        store
            .put(&Object::new("note").with_owner(owner).with_field("n", 1i64))
            .await
            .unwrap();
        store
            .put(&Object::new("note").with_field("n", 2i64))
            .await
            .unwrap();
        store
            .put(&Object::new("post").with_field("n", 3i64))
            .await
            .unwrap();

        let notes = store
            .filter(&Filter::new().object_type("note"))
            .await
            .unwrap();
        assert_eq!(notes.len(), 2);

        let owned = store.filter(&Filter::new().owner(owner)).await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].data.get("n").and_then(|v| v.as_int()), Some(1));

        assert_eq!(store.filter(&Filter::new()).await.unwrap().len(), 3);
    }
}
