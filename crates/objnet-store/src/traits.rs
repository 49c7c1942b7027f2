//! ObjectStore trait: the abstract interface for object persistence.
//!
//! The exchange only needs to look objects up by hash, so the trait is kept
//! narrow. Storage engines live outside this workspace.

use async_trait::async_trait;
use objnet_core::{Digest, Object, PublicKey};

use crate::error::{Result, StoreError};

/// Selects objects by type, owner, root or hash.
///
/// Every non-empty dimension must match. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub object_types: Vec<String>,
    pub owners: Vec<PublicKey>,
    pub roots: Vec<Digest>,
    pub hashes: Vec<Digest>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_type(mut self, object_type: impl Into<String>) -> Self {
        self.object_types.push(object_type.into());
        self
    }

    pub fn owner(mut self, owner: PublicKey) -> Self {
        self.owners.push(owner);
        self
    }

    pub fn root(mut self, root: Digest) -> Self {
        self.roots.push(root);
        self
    }

    pub fn hash(mut self, hash: Digest) -> Self {
        self.hashes.push(hash);
        self
    }

    /// Check an object (and its precomputed hash) against the filter.
    pub fn matches(&self, hash: &Digest, object: &Object) -> bool {
        if !self.hashes.is_empty() && !self.hashes.contains(hash) {
            return false;
        }
        if !self.object_types.is_empty() && !self.object_types.contains(&object.object_type) {
            return false;
        }
        if !self.owners.is_empty() {
            match &object.metadata.owner {
                Some(owner) if self.owners.contains(owner) => {}
                _ => return false,
            }
        }
        if !self.roots.is_empty() {
            match &object.metadata.root {
                Some(root) if self.roots.contains(root) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Async interface for object persistence.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get an object by its content hash.
    ///
    /// Returns [`StoreError::NotFound`] if nothing is stored under the hash.
    async fn get(&self, hash: &Digest) -> Result<Object>;

    /// Store an object and return its hash. Storing the same content twice is
    /// not an error.
    async fn put(&self, object: &Object) -> Result<Digest>;

    /// Every stored object matching the filter, ordered by hash.
    async fn filter(&self, filter: &Filter) -> Result<Vec<Object>>;
}

/// Convenience methods available on every store.
pub trait StoreExt: ObjectStore {
    /// Like [`ObjectStore::get`], but maps not-found to `None`.
    fn get_optional(
        &self,
        hash: &Digest,
    ) -> impl std::future::Future<Output = Result<Option<Object>>> + Send;
}

impl<S: ObjectStore + ?Sized> StoreExt for S {
    async fn get_optional(&self, hash: &Digest) -> Result<Option<Object>> {
        match self.get(hash).await {
            Ok(object) => Ok(Some(object)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objnet_core::Keypair;

    #[test]
    fn test_empty_filter_matches_everything() {
        let object = Object::new("a/b");
        assert!(Filter::new().matches(&object.hash(), &object));
    }

    #[test]
    fn test_filter_dimensions() {
        let owner = Keypair::generate().public_key();
        let other = Keypair::generate().public_key();
        let object = Object::new("note").with_owner(owner);
        let hash = object.hash();

        assert!(Filter::new().object_type("note").matches(&hash, &object));
        assert!(!Filter::new().object_type("post").matches(&hash, &object));
        assert!(Filter::new().owner(owner).matches(&hash, &object));
        assert!(!Filter::new().owner(other).matches(&hash, &object));
        assert!(Filter::new().hash(hash).matches(&hash, &object));
        assert!(!Filter::new().hash(Digest::ZERO).matches(&hash, &object));
        assert!(!Filter::new().root(Digest::ZERO).matches(&hash, &object));
    }
}
