//! Repository cache trait for caching repository object existence and content.

use async_trait::async_trait;

use crate::repository::{ObjectId, RepoObject};

/// Error type for cache operations.
#[derive(Debug)]
pub enum CacheError {
    /// An I/O error occurred.
    Io(std::io::Error),
    /// A custom error message.
    Other(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Io(e) => write!(f, "I/O error: {}", e),
            CacheError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(e) => Some(e),
            CacheError::Other(_) => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Io(e)
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// A cache for repository objects.
///
/// Objects are immutable once written, so cached entries never go stale;
/// implementations only decide how much to keep.
#[async_trait]
pub trait RepoCache: Send + Sync {
    /// Check if an object is known to exist in the repository.
    async fn object_exists(&self, id: &ObjectId) -> Result<bool>;

    /// Mark an object as existing in the repository.
    async fn set_object_exists(&self, id: &ObjectId) -> Result<()>;

    /// Retrieve a cached repository object.
    ///
    /// Returns `None` if the object is not in the cache.
    async fn get_object(&self, id: &ObjectId) -> Result<Option<RepoObject>>;

    /// Store a repository object in the cache.
    async fn set_object(&self, id: &ObjectId, obj: &RepoObject) -> Result<()>;
}

// =============================================================================
// NoopCache
// =============================================================================

/// A no-op cache implementation that never caches anything.
///
/// Use this when caching is disabled via configuration.
pub struct NoopCache;

#[async_trait]
impl RepoCache for NoopCache {
    async fn object_exists(&self, _id: &ObjectId) -> Result<bool> {
        Ok(false)
    }

    async fn set_object_exists(&self, _id: &ObjectId) -> Result<()> {
        Ok(())
    }

    async fn get_object(&self, _id: &ObjectId) -> Result<Option<RepoObject>> {
        Ok(None)
    }

    async fn set_object(&self, _id: &ObjectId, _obj: &RepoObject) -> Result<()> {
        Ok(())
    }
}
