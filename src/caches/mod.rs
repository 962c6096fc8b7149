//! Caches for repository operations.
//!
//! - [`RepoCache`] - object existence and content caching interface
//! - [`NoopCache`] - disables caching
//! - [`LruRepoCache`] - bounded in-memory cache

mod lru_repo_cache;
mod repo_cache;

pub use lru_repo_cache::LruRepoCache;
pub use repo_cache::{CacheError, NoopCache, RepoCache, Result as RepoCacheResult};
