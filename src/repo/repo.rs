//! Repository interface providing caching over a storage backend.
//!
//! The [`Repo`] struct wraps a [`RepoBackend`] and adds:
//! - Content addressing (sha-256 of the stored bytes)
//! - Caching of structural objects via [`RepoCache`]
//! - Typed readers for trees and commits
//! - Branch and `HEAD` references with compare-and-swap updates

use sha2::{Digest, Sha256};
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::backend::{BackendError, RepoBackend, SwapResult};
use crate::caches::RepoCache;
use crate::repository::{
    Commit, CommitMetadata, CommitType, JsonError, ObjectId, RepoObject, Tree, from_json,
    to_canonical_json,
};

// =============================================================================
// Error Types
// =============================================================================

/// Error type for repository operations.
#[derive(Debug, Clone)]
pub enum RepoError {
    /// The object or reference was not found.
    NotFound(String),
    /// The repository has not been initialized.
    NotInitialized,
    /// The repository is already initialized.
    AlreadyInitialized,
    /// An I/O error occurred.
    Io(String),
    /// JSON serialization/deserialization error.
    Json(String),
    /// Object type mismatch.
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    /// A tree path is malformed or collides with an existing entry.
    InvalidPath(String),
    /// A reference did not hold the value the caller read earlier.
    RefChanged {
        name: String,
        expected: Option<String>,
        actual: Option<String>,
    },
    /// A commit specification could not be resolved.
    BadCommitish(String),
    /// A custom error message.
    Other(String),
}

impl std::fmt::Display for RepoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepoError::NotFound(what) => write!(f, "not found: {}", what),
            RepoError::NotInitialized => write!(f, "repository is not initialized"),
            RepoError::AlreadyInitialized => write!(f, "repository already initialized"),
            RepoError::Io(msg) => write!(f, "I/O error: {}", msg),
            RepoError::Json(msg) => write!(f, "JSON error: {}", msg),
            RepoError::TypeMismatch { expected, actual } => {
                write!(f, "type mismatch: expected {}, got {}", expected, actual)
            }
            RepoError::InvalidPath(msg) => write!(f, "invalid path: {}", msg),
            RepoError::RefChanged {
                name,
                expected,
                actual,
            } => write!(
                f,
                "reference {} changed concurrently (expected {}, found {})",
                name,
                expected.as_deref().unwrap_or("nothing"),
                actual.as_deref().unwrap_or("nothing")
            ),
            RepoError::BadCommitish(spec) => write!(f, "no such commit: {}", spec),
            RepoError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for RepoError {}

impl From<BackendError> for RepoError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::NotFound => RepoError::NotFound("object".to_string()),
            BackendError::Io(io_err) => RepoError::Io(io_err.to_string()),
            other => RepoError::Other(other.to_string()),
        }
    }
}

impl From<JsonError> for RepoError {
    fn from(e: JsonError) -> Self {
        RepoError::Json(e.to_string())
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepoError>;

// =============================================================================
// Constants
// =============================================================================

/// Symbolic reference naming the current branch.
pub const HEAD_REF: &str = "HEAD";

/// Prefix for branch references.
pub const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// Prefix marking a symbolic reference value.
const SYMBOLIC_REF_PREFIX: &str = "ref: ";

// =============================================================================
// Initialization Configuration
// =============================================================================

/// Configuration for initializing a new repository.
pub struct RepoInitialize {
    /// Name of the default branch to create.
    pub default_branch_name: String,
}

impl Default for RepoInitialize {
    fn default() -> Self {
        Self {
            default_branch_name: "main".to_string(),
        }
    }
}

/// What `HEAD` currently points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    /// `HEAD` names a branch, which may not have a commit yet.
    Branch(String),
    /// `HEAD` holds a commit directly.
    Detached(ObjectId),
}

// =============================================================================
// Repo
// =============================================================================

/// A content-addressed repository over a backend, with caching.
pub struct Repo {
    backend: Arc<dyn RepoBackend>,
    cache: Arc<dyn RepoCache>,
}

impl Repo {
    /// Create a new repository with the given backend and cache.
    pub fn new<B, C>(backend: B, cache: C) -> Self
    where
        B: RepoBackend + 'static,
        C: RepoCache + 'static,
    {
        Self {
            backend: Arc::new(backend),
            cache: Arc::new(cache),
        }
    }

    /// Create a new repository from pre-wrapped trait objects.
    pub fn from_dyn(backend: Arc<dyn RepoBackend>, cache: Arc<dyn RepoCache>) -> Self {
        Self { backend, cache }
    }

    /// Get a reference to the repository's cache.
    pub fn cache(&self) -> &Arc<dyn RepoCache> {
        &self.cache
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Check if the repository is initialized (has a `HEAD`).
    pub async fn is_initialized(&self) -> Result<bool> {
        Ok(self.backend.read_ref(HEAD_REF).await?.is_some())
    }

    /// Initialize a new repository.
    ///
    /// Writes an empty tree, a root commit pointing at it, the default branch
    /// and a symbolic `HEAD`. Returns the root commit ID.
    pub async fn initialize(&self, init: RepoInitialize) -> Result<ObjectId> {
        if self.is_initialized().await? {
            return Err(RepoError::AlreadyInitialized);
        }

        let tree_id = self.write_tree(Tree::empty()).await?;
        let commit_id = self
            .create_commit(&tree_id, vec![], "Repo initialization", None)
            .await?;

        let branch_ref = branch_ref_name(&init.default_branch_name);
        self.swap_ref(&branch_ref, None, Some(commit_id.as_str())).await?;
        let head_value = format!("{}{}", SYMBOLIC_REF_PREFIX, branch_ref);
        self.swap_ref(HEAD_REF, None, Some(head_value.as_str())).await?;

        debug!(branch = %init.default_branch_name, commit = %commit_id, "initialized repository");
        Ok(commit_id)
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Check if an object exists in the repository.
    pub async fn object_exists(&self, id: &ObjectId) -> Result<bool> {
        if let Ok(true) = self.cache.object_exists(id).await {
            return Ok(true);
        }
        let exists = self.backend.object_exists(id).await?;
        if exists {
            let _ = self.cache.set_object_exists(id).await;
        }
        Ok(exists)
    }

    /// Write raw bytes, returning their object ID.
    ///
    /// Skips the backend write when the object is already present.
    pub async fn write_blob(&self, data: &[u8]) -> Result<ObjectId> {
        let id = compute_object_id(data);
        if !self.object_exists(&id).await? {
            self.backend.write_object(&id, data).await?;
            let _ = self.cache.set_object_exists(&id).await;
        }
        Ok(id)
    }

    /// Read raw bytes by object ID.
    pub async fn read_blob(&self, id: &ObjectId) -> Result<Vec<u8>> {
        self.backend.read_object(id).await.map_err(|e| match e {
            BackendError::NotFound => RepoError::NotFound(format!("object {}", id)),
            other => other.into(),
        })
    }

    /// Serialize a structural object to canonical JSON and store it.
    pub async fn write_object(&self, obj: &RepoObject) -> Result<ObjectId> {
        let json = to_canonical_json(obj)?;
        let id = self.write_blob(&json).await?;
        let _ = self.cache.set_object(&id, obj).await;
        Ok(id)
    }

    /// Read and parse a structural object, consulting the cache first.
    pub async fn read_object(&self, id: &ObjectId) -> Result<RepoObject> {
        if let Ok(Some(obj)) = self.cache.get_object(id).await {
            return Ok(obj);
        }

        let bytes = self.read_blob(id).await?;
        let obj: RepoObject = from_json(&bytes)?;
        let _ = self.cache.set_object(id, &obj).await;
        Ok(obj)
    }

    // =========================================================================
    // Typed Object Readers and Writers
    // =========================================================================

    /// Write a tree, sorting its entries by name first.
    pub async fn write_tree(&self, mut tree: Tree) -> Result<ObjectId> {
        tree.entries.sort_by(|a, b| a.name().cmp(b.name()));
        self.write_object(&RepoObject::Tree(tree)).await
    }

    /// Read and parse a Tree object.
    pub async fn read_tree(&self, id: &ObjectId) -> Result<Tree> {
        match self.read_object(id).await? {
            RepoObject::Tree(tree) => Ok(tree),
            other => Err(RepoError::TypeMismatch {
                expected: "Tree",
                actual: other.type_name(),
            }),
        }
    }

    /// Read and parse a Commit object.
    pub async fn read_commit(&self, id: &ObjectId) -> Result<Commit> {
        match self.read_object(id).await? {
            RepoObject::Commit(commit) => Ok(commit),
            other => Err(RepoError::TypeMismatch {
                expected: "Commit",
                actual: other.type_name(),
            }),
        }
    }

    /// Create a commit object. References are not touched.
    pub async fn create_commit(
        &self,
        tree: &ObjectId,
        parents: Vec<ObjectId>,
        message: &str,
        author: Option<&str>,
    ) -> Result<ObjectId> {
        let commit = Commit {
            type_tag: CommitType::Commit,
            tree: tree.clone(),
            parents,
            metadata: Some(CommitMetadata {
                timestamp: Some(Utc::now().to_rfc3339()),
                author: author.map(str::to_string),
                message: Some(message.to_string()),
            }),
        };
        self.write_object(&RepoObject::Commit(commit)).await
    }

    // =========================================================================
    // References
    // =========================================================================

    /// Read a named reference.
    pub async fn read_ref(&self, name: &str) -> Result<Option<String>> {
        Ok(self.backend.read_ref(name).await?)
    }

    /// Atomically move a reference from `expected` to `new_value`.
    ///
    /// `new_value == None` deletes the reference. Fails with
    /// [`RepoError::RefChanged`] if someone else moved it first.
    pub async fn swap_ref(
        &self,
        name: &str,
        expected: Option<&str>,
        new_value: Option<&str>,
    ) -> Result<()> {
        match self.backend.swap_ref(name, expected, new_value).await? {
            SwapResult::Success => {
                debug!(reference = name, value = ?new_value, "updated reference");
                Ok(())
            }
            SwapResult::Mismatch(actual) => Err(RepoError::RefChanged {
                name: name.to_string(),
                expected: expected.map(str::to_string),
                actual,
            }),
        }
    }

    /// Read what `HEAD` points at.
    pub async fn head(&self) -> Result<Head> {
        let value = self
            .backend
            .read_ref(HEAD_REF)
            .await?
            .ok_or(RepoError::NotInitialized)?;
        match value.strip_prefix(SYMBOLIC_REF_PREFIX) {
            Some(target) => {
                let branch = target.strip_prefix(BRANCH_REF_PREFIX).unwrap_or(target);
                Ok(Head::Branch(branch.to_string()))
            }
            None => Ok(Head::Detached(value)),
        }
    }

    /// The name of the current branch, if `HEAD` is not detached.
    pub async fn head_branch(&self) -> Result<Option<String>> {
        match self.head().await? {
            Head::Branch(name) => Ok(Some(name)),
            Head::Detached(_) => Ok(None),
        }
    }

    /// The commit `HEAD` resolves to, if any.
    pub async fn head_commit(&self) -> Result<Option<ObjectId>> {
        match self.head().await? {
            Head::Branch(name) => self.read_ref(&branch_ref_name(&name)).await,
            Head::Detached(id) => Ok(Some(id)),
        }
    }

    /// Move `HEAD` (or the branch it names) from `expected` to `new_commit`.
    pub async fn update_head(
        &self,
        expected: Option<&ObjectId>,
        new_commit: &ObjectId,
    ) -> Result<()> {
        let name = match self.head().await? {
            Head::Branch(branch) => branch_ref_name(&branch),
            Head::Detached(_) => HEAD_REF.to_string(),
        };
        self.swap_ref(&name, expected.map(String::as_str), Some(new_commit.as_str()))
            .await
    }

    /// Point `HEAD` at an existing branch.
    pub async fn checkout_branch(&self, branch: &str) -> Result<()> {
        let branch_ref = branch_ref_name(branch);
        if self.read_ref(&branch_ref).await?.is_none() {
            return Err(RepoError::NotFound(format!("branch {}", branch)));
        }
        let current = self.backend.read_ref(HEAD_REF).await?;
        let head_value = format!("{}{}", SYMBOLIC_REF_PREFIX, branch_ref);
        self.swap_ref(HEAD_REF, current.as_deref(), Some(head_value.as_str()))
            .await
    }

    /// Create a new branch at `commit`.
    pub async fn create_branch(&self, branch: &str, commit: &ObjectId) -> Result<()> {
        self.read_commit(commit).await?;
        self.swap_ref(&branch_ref_name(branch), None, Some(commit.as_str()))
            .await
            .map_err(|e| match e {
                RepoError::RefChanged { .. } => {
                    RepoError::Other(format!("branch {} already exists", branch))
                }
                other => other,
            })
    }

    /// List all branches with their commits, sorted by name.
    pub async fn branches(&self) -> Result<Vec<(String, ObjectId)>> {
        let mut result = Vec::new();
        for name in self.backend.list_refs(BRANCH_REF_PREFIX).await? {
            if let Some(commit) = self.backend.read_ref(&name).await? {
                let branch = name.trim_start_matches(BRANCH_REF_PREFIX).to_string();
                result.push((branch, commit));
            }
        }
        Ok(result)
    }
}

/// The reference name for a branch.
pub fn branch_ref_name(branch: &str) -> String {
    format!("{}{}", BRANCH_REF_PREFIX, branch)
}

/// Compute the object ID (SHA-256 hash) for the given data.
pub fn compute_object_id(data: &[u8]) -> ObjectId {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}
