//! A snapshot view of a repository tree and the datasets it contains.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

use super::dataset::Dataset;
use super::error::{DatasetError, Result};
use super::path_codec::{DatasetFormat, DecodedPath};
use crate::repo::{Repo, join_path};
use crate::repository::{ObjectId, TreeEntry};

#[derive(Deserialize)]
struct VersionItem {
    version: String,
}

/// Caches owned by one snapshot and dropped with it.
#[derive(Default)]
struct SnapshotCache {
    datasets: OnceCell<BTreeMap<String, Arc<Dataset>>>,
}

/// An immutable view of one tree (usually a commit's).
pub struct RepoStructure {
    repo: Arc<Repo>,
    commit: Option<ObjectId>,
    tree: ObjectId,
    cache: SnapshotCache,
}

impl std::fmt::Debug for RepoStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoStructure")
            .field("commit", &self.commit)
            .field("tree", &self.tree)
            .finish()
    }
}

impl RepoStructure {
    /// The snapshot of a commit-ish (`HEAD`, a branch, an ID, with `^`/`~N`).
    pub async fn lookup(repo: Arc<Repo>, commitish: &str) -> Result<Self> {
        let commit = repo.resolve_commitish(commitish).await?;
        Self::from_commit(repo, commit).await
    }

    pub async fn from_commit(repo: Arc<Repo>, commit: ObjectId) -> Result<Self> {
        let tree = repo.read_commit(&commit).await?.tree;
        Ok(Self {
            repo,
            commit: Some(commit),
            tree,
            cache: SnapshotCache::default(),
        })
    }

    /// A snapshot of a bare tree, with no commit.
    pub fn from_tree(repo: Arc<Repo>, tree: ObjectId) -> Self {
        Self {
            repo,
            commit: None,
            tree,
            cache: SnapshotCache::default(),
        }
    }

    pub fn repo(&self) -> &Arc<Repo> {
        &self.repo
    }

    pub fn commit(&self) -> Option<&ObjectId> {
        self.commit.as_ref()
    }

    pub fn tree(&self) -> &ObjectId {
        &self.tree
    }

    /// Every dataset in the tree, keyed by path.
    ///
    /// The walk never descends into hidden directories, nor into a directory
    /// once it has been identified as a dataset.
    pub async fn datasets(&self) -> Result<&BTreeMap<String, Arc<Dataset>>> {
        self.cache
            .datasets
            .get_or_try_init(|| self.discover_datasets())
            .await
    }

    async fn discover_datasets(&self) -> Result<BTreeMap<String, Arc<Dataset>>> {
        let mut found = BTreeMap::new();
        let mut queue: VecDeque<(String, ObjectId)> = VecDeque::new();
        queue.push_back((String::new(), self.tree.clone()));

        while let Some((prefix, tree_id)) = queue.pop_front() {
            let tree = self.repo.read_tree(&tree_id).await?;

            let marker = tree.entries.iter().find_map(|entry| match entry {
                TreeEntry::Tree(sub) if !prefix.is_empty() => {
                    DatasetFormat::from_dirname(&sub.name).map(|format| (format, sub.tree.clone()))
                }
                _ => None,
            });
            if let Some((dir_format, inner)) = marker {
                let format = sniff_format(&self.repo, &prefix, dir_format, &inner).await?;
                let dataset = Dataset::new(self.repo.clone(), prefix.clone(), inner, format);
                found.insert(prefix, Arc::new(dataset));
                continue;
            }

            for entry in tree.entries {
                if let TreeEntry::Tree(sub) = entry
                    && !sub.name.starts_with('.')
                {
                    queue.push_back((join_path(&prefix, &sub.name), sub.tree));
                }
            }
        }

        debug!(tree = %self.tree, count = found.len(), "discovered datasets");
        Ok(found)
    }

    pub async fn get_dataset(&self, path: &str) -> Result<Option<Arc<Dataset>>> {
        Ok(self.datasets().await?.get(path.trim_matches('/')).cloned())
    }

    pub async fn dataset_paths(&self) -> Result<Vec<String>> {
        Ok(self.datasets().await?.keys().cloned().collect())
    }

    /// Find the dataset containing a repository path and decode the path
    /// within it. Returns `None` for paths outside every dataset.
    pub async fn decode_path(&self, full_path: &str) -> Result<Option<(Arc<Dataset>, DecodedPath)>> {
        for dataset in self.datasets().await?.values() {
            let prefix = format!("{}/", dataset.inner_path());
            if let Some(rel) = full_path.strip_prefix(&prefix) {
                let decoded = dataset.decode_path(rel).await?;
                return Ok(Some((dataset.clone(), decoded)));
            }
        }
        Ok(None)
    }
}

/// Determine a dataset's format from its `meta/version` item, falling back to
/// the format directory name.
pub async fn sniff_format(
    repo: &Repo,
    path: &str,
    dir_format: DatasetFormat,
    inner_tree: &ObjectId,
) -> Result<DatasetFormat> {
    let Some(bytes) = repo.read_blob_at(inner_tree, "meta/version").await? else {
        return Ok(dir_format);
    };
    let item: VersionItem = serde_json::from_slice(&bytes).map_err(|e| DatasetError::InvalidRecord {
        dataset: path.to_string(),
        message: format!("cannot parse meta/version: {}", e),
    })?;
    match DatasetFormat::from_version_str(&item.version) {
        Some(format) if format == dir_format => Ok(format),
        Some(_) => Err(DatasetError::UnsupportedVersion(format!(
            "{} in {} directory at {}",
            item.version,
            dir_format.dirname(),
            path
        ))),
        None => Err(DatasetError::UnsupportedVersion(format!("{} at {}", item.version, path))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::caches::NoopCache;
    use crate::dataset::ItemKind;
    use crate::repo::TreeOp;
    use serde_json::json;

    async fn insert(repo: &Repo, path: &str, bytes: &[u8]) -> TreeOp {
        TreeOp::Insert {
            path: path.to_string(),
            blob: repo.write_blob(bytes).await.unwrap(),
        }
    }

    #[tokio::test]
    async fn test_discover_datasets() {
        let repo = Arc::new(Repo::new(MemoryBackend::new(), NoopCache));
        let schema = br#"[{"dataType":"INTEGER","name":"id","primaryKeyIndex":0}]"#;
        let ops = vec![
            insert(&repo, "a/roads/.table-dataset/meta/schema.json", schema).await,
            insert(&repo, "a/roads/.table-dataset/meta/version", br#"{"version":"table/2"}"#).await,
            // Nested below a dataset: not a separate dataset
            insert(&repo, "a/roads/sub/.table-dataset/meta/schema.json", schema).await,
            insert(&repo, "old/.table-dataset.v1/meta/schema.json", schema).await,
            insert(&repo, "lidar/.point-cloud-dataset.v1/tile/t1", b"{}").await,
            // Hidden directories are never searched
            insert(&repo, ".hidden/x/.table-dataset/meta/schema.json", schema).await,
            insert(&repo, "README", b"hello").await,
        ];
        let tree = repo.build_tree(None, ops).await.unwrap();
        let structure = RepoStructure::from_tree(repo, tree);

        assert_eq!(
            structure.dataset_paths().await.unwrap(),
            vec!["a/roads", "lidar", "old"]
        );
        let old = structure.get_dataset("old").await.unwrap().unwrap();
        assert_eq!(old.format(), DatasetFormat::TableV1);
        let lidar = structure.get_dataset("lidar").await.unwrap().unwrap();
        assert_eq!(lidar.item_kind(), ItemKind::Tile);

        let (ds, decoded) = structure
            .decode_path("lidar/.point-cloud-dataset.v1/tile/t1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ds.path(), "lidar");
        assert_eq!(decoded, DecodedPath::Item(ItemKind::Tile, json!("t1")));
        assert!(structure.decode_path("README").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unsupported_version() {
        let repo = Arc::new(Repo::new(MemoryBackend::new(), NoopCache));
        let ops = vec![insert(&repo, "x/.table-dataset/meta/version", br#"{"version":"table/9"}"#).await];
        let tree = repo.build_tree(None, ops).await.unwrap();
        let structure = RepoStructure::from_tree(repo.clone(), tree);
        assert!(matches!(
            structure.datasets().await,
            Err(DatasetError::UnsupportedVersion(_))
        ));

        let ops = vec![
            insert(&repo, "x/.table-dataset/meta/version", br#"{"version":"point-cloud/1"}"#).await,
        ];
        let tree = repo.build_tree(None, ops).await.unwrap();
        let structure = RepoStructure::from_tree(repo, tree);
        assert!(structure.datasets().await.is_err());
    }
}
