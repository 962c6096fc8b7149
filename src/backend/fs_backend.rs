use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::repo_backend::{
    BackendError, ObjectId, RepoBackend, Result, SwapResult, validate_ref_name,
};

/// Counter for generating unique temp file names.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A filesystem-based implementation of `RepoBackend`.
///
/// Layout under the base directory:
/// - `objects/{id[0..2]}/{id[2..4]}/{id}` for objects
/// - `{ref name}` for references (`HEAD`, `refs/heads/main`, `MERGE_STATE`)
/// - `tmp/` for in-flight writes
///
/// Writes are atomic: data is written to a temp file then renamed. Reference
/// swaps hold a `{ref}.lock` file, created exclusively, for the duration of the
/// compare and the rename.
pub struct FsBackend {
    base_path: PathBuf,
}

impl FsBackend {
    /// Create a new filesystem backend rooted at the given path.
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    /// The directory this backend stores everything under.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn object_path(&self, id: &ObjectId) -> Result<PathBuf> {
        if id.len() < 5 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BackendError::Other(format!("invalid object id '{}'", id)));
        }
        Ok(self
            .base_path
            .join("objects")
            .join(&id[0..2])
            .join(&id[2..4])
            .join(id))
    }

    fn ref_path(&self, name: &str) -> Result<PathBuf> {
        validate_ref_name(name)?;
        Ok(self.base_path.join(name))
    }

    fn temp_dir(&self) -> PathBuf {
        self.base_path.join("tmp")
    }

    fn temp_file_path(&self) -> PathBuf {
        let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        self.temp_dir().join(format!("tmp.{}.{}", pid, counter))
    }

    async fn write_atomic(&self, full_path: &Path, data: &[u8]) -> Result<()> {
        let temp_path = self.temp_file_path();
        fs::create_dir_all(self.temp_dir()).await?;
        fs::write(&temp_path, data).await?;

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::rename(&temp_path, full_path).await?;
        Ok(())
    }

    async fn read_ref_file(path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path).await {
            Ok(value) => Ok(Some(value.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError::Io(e)),
        }
    }

    async fn swap_locked(
        &self,
        path: &Path,
        expected: Option<&str>,
        new_value: Option<&str>,
    ) -> Result<SwapResult> {
        let current = Self::read_ref_file(path).await?;
        if current.as_deref() != expected {
            return Ok(SwapResult::Mismatch(current));
        }
        match new_value {
            Some(value) => self.write_atomic(path, value.as_bytes()).await?,
            None => fs::remove_file(path).await?,
        }
        Ok(SwapResult::Success)
    }
}

#[async_trait]
impl RepoBackend for FsBackend {
    async fn object_exists(&self, id: &ObjectId) -> Result<bool> {
        Ok(fs::try_exists(self.object_path(id)?).await?)
    }

    async fn read_object(&self, id: &ObjectId) -> Result<Vec<u8>> {
        let path = self.object_path(id)?;
        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackendError::NotFound
            } else {
                BackendError::Io(e)
            }
        })
    }

    async fn write_object(&self, id: &ObjectId, data: &[u8]) -> Result<()> {
        let path = self.object_path(id)?;
        self.write_atomic(&path, data).await
    }

    async fn read_ref(&self, name: &str) -> Result<Option<String>> {
        let path = self.ref_path(name)?;
        Self::read_ref_file(&path).await
    }

    async fn write_ref(&self, name: &str, value: &str) -> Result<()> {
        let path = self.ref_path(name)?;
        self.write_atomic(&path, value.as_bytes()).await
    }

    async fn swap_ref(
        &self,
        name: &str,
        expected: Option<&str>,
        new_value: Option<&str>,
    ) -> Result<SwapResult> {
        let path = self.ref_path(name)?;
        let lock_path = self.base_path.join(format!("{}.lock", name));
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .await
        {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(BackendError::Locked(name.to_string()));
            }
            Err(e) => return Err(BackendError::Io(e)),
        }

        let result = self.swap_locked(&path, expected, new_value).await;
        if let Err(e) = fs::remove_file(&lock_path).await {
            debug!(lock = %lock_path.display(), error = %e, "failed to remove ref lock");
        }
        result
    }

    async fn list_refs(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut queue: VecDeque<(PathBuf, String)> = VecDeque::new();
        queue.push_back((self.base_path.clone(), String::new()));

        while let Some((dir, rel)) = queue.pop_front() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(BackendError::Io(e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let child_rel = if rel.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", rel, name)
                };
                // Only descend into directories that can still produce a match
                let could_match =
                    child_rel.starts_with(prefix) || prefix.starts_with(&format!("{}/", child_rel));
                if !could_match || validate_ref_name(&child_rel).is_err() {
                    continue;
                }
                if entry.file_type().await?.is_dir() {
                    if child_rel != "objects" && child_rel != "tmp" {
                        queue.push_back((entry.path(), child_rel));
                    }
                } else if child_rel.starts_with(prefix) {
                    names.push(child_rel);
                }
            }
        }

        names.sort();
        Ok(names)
    }
}
