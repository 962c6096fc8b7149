//! In-memory LRU implementation of [`RepoCache`].

use std::num::NonZeroUsize;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;

use super::repo_cache::{RepoCache, Result};
use crate::repository::{ObjectId, RepoObject};

/// Fallback capacity when a zero capacity is requested.
const MIN_CAPACITY: NonZeroUsize = NonZeroUsize::MIN;

/// Keeps the most recently used trees and commits in memory.
///
/// Existence is tracked separately from content so that blob writes, which
/// are never cached as objects, can still skip redundant backend writes.
pub struct LruRepoCache {
    objects: Mutex<LruCache<ObjectId, RepoObject>>,
    exists: Mutex<LruCache<ObjectId, ()>>,
}

impl LruRepoCache {
    /// Create a cache holding at most `max_objects` objects and existence marks.
    pub fn new(max_objects: usize) -> Self {
        let capacity = NonZeroUsize::new(max_objects).unwrap_or(MIN_CAPACITY);
        Self {
            objects: Mutex::new(LruCache::new(capacity)),
            exists: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of cached objects.
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }
}

#[async_trait]
impl RepoCache for LruRepoCache {
    async fn object_exists(&self, id: &ObjectId) -> Result<bool> {
        if self.exists.lock().await.get(id).is_some() {
            return Ok(true);
        }
        Ok(self.objects.lock().await.contains(id))
    }

    async fn set_object_exists(&self, id: &ObjectId) -> Result<()> {
        self.exists.lock().await.put(id.clone(), ());
        Ok(())
    }

    async fn get_object(&self, id: &ObjectId) -> Result<Option<RepoObject>> {
        Ok(self.objects.lock().await.get(id).cloned())
    }

    async fn set_object(&self, id: &ObjectId, obj: &RepoObject) -> Result<()> {
        self.objects.lock().await.put(id.clone(), obj.clone());
        Ok(())
    }
}
