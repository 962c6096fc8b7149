//! Tree-level primitives: path lookup, path diffs, flattening and batched
//! tree construction.
//!
//! All walks use an explicit worklist of subtrees and never recurse through
//! async calls. Subtrees whose object IDs match on both sides are skipped
//! without being read.

use std::collections::{BTreeMap, VecDeque};

use super::repo::{Repo, RepoError, Result, compute_object_id};
use crate::repository::{
    BlobEntry, ObjectId, RepoObject, SubtreeEntry, Tree, TreeEntry, TreeType, to_canonical_json,
};

// =============================================================================
// Types
// =============================================================================

/// The kind of change at a single blob path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    /// Present only in the new tree.
    Added,
    /// Present only in the old tree.
    Deleted,
    /// A blob on both sides with different content.
    Modified,
    /// A blob on one side and a tree on the other.
    TypeChanged,
}

/// A change at a single path between two trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChange {
    pub status: ChangeStatus,
    /// Slash-separated path relative to the trees being compared.
    pub path: String,
    /// Object at `path` in the old tree, if any.
    pub old_id: Option<ObjectId>,
    /// Object at `path` in the new tree, if any.
    pub new_id: Option<ObjectId>,
}

/// A single write to apply while building a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeOp {
    /// Place a blob at `path`, replacing any blob already there.
    Insert { path: String, blob: ObjectId },
    /// Remove the blob at `path`; removing a missing path is a no-op.
    Remove { path: String },
}

impl TreeOp {
    /// The path this op writes.
    pub fn path(&self) -> &str {
        match self {
            TreeOp::Insert { path, .. } | TreeOp::Remove { path } => path,
        }
    }
}

/// Join a parent path and a child name.
pub fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Split a path into validated components.
fn split_path(path: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = path.split('/').collect();
    if path.is_empty() || parts.iter().any(|p| p.is_empty() || *p == "." || *p == "..") {
        return Err(RepoError::InvalidPath(path.to_string()));
    }
    Ok(parts)
}

/// Pair up the entries of two sorted trees by name.
fn zip_entries<'a>(
    old: &'a [TreeEntry],
    new: &'a [TreeEntry],
) -> Vec<(Option<&'a TreeEntry>, Option<&'a TreeEntry>)> {
    let mut result = Vec::with_capacity(old.len().max(new.len()));
    let (mut i, mut j) = (0, 0);
    while i < old.len() || j < new.len() {
        match (old.get(i), new.get(j)) {
            (Some(a), Some(b)) => match a.name().cmp(b.name()) {
                std::cmp::Ordering::Less => {
                    result.push((Some(a), None));
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    result.push((None, Some(b)));
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    result.push((Some(a), Some(b)));
                    i += 1;
                    j += 1;
                }
            },
            (Some(a), None) => {
                result.push((Some(a), None));
                i += 1;
            }
            (None, Some(b)) => {
                result.push((None, Some(b)));
                j += 1;
            }
            (None, None) => break,
        }
    }
    result
}

// =============================================================================
// In-memory tree used while building
// =============================================================================

enum Node {
    Blob(ObjectId),
    /// An untouched subtree that is reused by ID.
    Stored(ObjectId),
    Dir(BTreeMap<String, Node>),
}

fn expand(tree: Tree) -> BTreeMap<String, Node> {
    tree.entries
        .into_iter()
        .map(|entry| match entry {
            TreeEntry::Blob(b) => (b.name, Node::Blob(b.blob)),
            TreeEntry::Tree(t) => (t.name, Node::Stored(t.tree)),
        })
        .collect()
}

/// Serialize a directory node bottom-up, collecting every new tree object.
///
/// Returns `None` for a directory that ends up empty so its parent drops it.
fn serialize_dir(
    children: &BTreeMap<String, Node>,
    out: &mut Vec<(ObjectId, RepoObject)>,
) -> Result<Option<ObjectId>> {
    let mut entries = Vec::with_capacity(children.len());
    for (name, node) in children {
        match node {
            Node::Blob(id) => entries.push(TreeEntry::Blob(BlobEntry {
                name: name.clone(),
                blob: id.clone(),
            })),
            Node::Stored(id) => entries.push(TreeEntry::Tree(SubtreeEntry {
                name: name.clone(),
                tree: id.clone(),
            })),
            Node::Dir(grandchildren) => {
                if let Some(id) = serialize_dir(grandchildren, out)? {
                    entries.push(TreeEntry::Tree(SubtreeEntry {
                        name: name.clone(),
                        tree: id,
                    }));
                }
            }
        }
    }
    if entries.is_empty() {
        return Ok(None);
    }
    let obj = RepoObject::Tree(Tree {
        type_tag: TreeType::Tree,
        entries,
    });
    let id = compute_object_id(&to_canonical_json(&obj)?);
    out.push((id.clone(), obj));
    Ok(Some(id))
}

// =============================================================================
// Repo tree operations
// =============================================================================

impl Repo {
    /// Look up the entry at `path` within a tree.
    pub async fn entry_at(&self, tree: &ObjectId, path: &str) -> Result<Option<TreeEntry>> {
        let parts = split_path(path)?;
        let mut current = self.read_tree(tree).await?;
        for (idx, part) in parts.iter().enumerate() {
            let entry = match current.get(part) {
                Some(entry) => entry.clone(),
                None => return Ok(None),
            };
            if idx + 1 == parts.len() {
                return Ok(Some(entry));
            }
            match entry {
                TreeEntry::Tree(sub) => current = self.read_tree(&sub.tree).await?,
                TreeEntry::Blob(_) => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Read the blob at `path` within a tree, if there is one.
    pub async fn read_blob_at(&self, tree: &ObjectId, path: &str) -> Result<Option<Vec<u8>>> {
        match self.entry_at(tree, path).await? {
            Some(TreeEntry::Blob(b)) => Ok(Some(self.read_blob(&b.blob).await?)),
            _ => Ok(None),
        }
    }

    /// The subtree ID at `path`, if `path` names a tree.
    pub async fn subtree_at(&self, tree: &ObjectId, path: &str) -> Result<Option<ObjectId>> {
        if path.is_empty() {
            return Ok(Some(tree.clone()));
        }
        match self.entry_at(tree, path).await? {
            Some(TreeEntry::Tree(sub)) => Ok(Some(sub.tree)),
            _ => Ok(None),
        }
    }

    /// List every blob-level change between two trees, sorted by path.
    ///
    /// A missing tree on either side is treated as empty.
    pub async fn diff_tree_paths(
        &self,
        old: Option<&ObjectId>,
        new: Option<&ObjectId>,
    ) -> Result<Vec<PathChange>> {
        let mut changes = Vec::new();
        let mut queue: VecDeque<(String, Option<ObjectId>, Option<ObjectId>)> = VecDeque::new();
        queue.push_back((String::new(), old.cloned(), new.cloned()));

        while let Some((prefix, old_id, new_id)) = queue.pop_front() {
            if old_id == new_id {
                continue;
            }
            let old_tree = match &old_id {
                Some(id) => self.read_tree(id).await?,
                None => Tree::empty(),
            };
            let new_tree = match &new_id {
                Some(id) => self.read_tree(id).await?,
                None => Tree::empty(),
            };

            for pair in zip_entries(&old_tree.entries, &new_tree.entries) {
                match pair {
                    (Some(a), Some(b)) if a == b => {}
                    (Some(TreeEntry::Tree(a)), Some(TreeEntry::Tree(b))) => {
                        queue.push_back((
                            join_path(&prefix, &a.name),
                            Some(a.tree.clone()),
                            Some(b.tree.clone()),
                        ));
                    }
                    (Some(TreeEntry::Blob(a)), Some(TreeEntry::Blob(b))) => {
                        changes.push(PathChange {
                            status: ChangeStatus::Modified,
                            path: join_path(&prefix, &a.name),
                            old_id: Some(a.blob.clone()),
                            new_id: Some(b.blob.clone()),
                        });
                    }
                    (Some(a), Some(b)) => {
                        changes.push(PathChange {
                            status: ChangeStatus::TypeChanged,
                            path: join_path(&prefix, a.name()),
                            old_id: Some(a.id().clone()),
                            new_id: Some(b.id().clone()),
                        });
                    }
                    (Some(TreeEntry::Tree(a)), None) => {
                        queue.push_back((join_path(&prefix, &a.name), Some(a.tree.clone()), None));
                    }
                    (Some(TreeEntry::Blob(a)), None) => {
                        changes.push(PathChange {
                            status: ChangeStatus::Deleted,
                            path: join_path(&prefix, &a.name),
                            old_id: Some(a.blob.clone()),
                            new_id: None,
                        });
                    }
                    (None, Some(TreeEntry::Tree(b))) => {
                        queue.push_back((join_path(&prefix, &b.name), None, Some(b.tree.clone())));
                    }
                    (None, Some(TreeEntry::Blob(b))) => {
                        changes.push(PathChange {
                            status: ChangeStatus::Added,
                            path: join_path(&prefix, &b.name),
                            old_id: None,
                            new_id: Some(b.blob.clone()),
                        });
                    }
                    (None, None) => {}
                }
            }
        }

        changes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(changes)
    }

    /// Flatten a tree into a map of blob path to blob ID.
    pub async fn list_blobs(&self, tree: &ObjectId) -> Result<BTreeMap<String, ObjectId>> {
        let mut blobs = BTreeMap::new();
        let mut queue: VecDeque<(String, ObjectId)> = VecDeque::new();
        queue.push_back((String::new(), tree.clone()));

        while let Some((prefix, id)) = queue.pop_front() {
            for entry in self.read_tree(&id).await?.entries {
                match entry {
                    TreeEntry::Blob(b) => {
                        blobs.insert(join_path(&prefix, &b.name), b.blob);
                    }
                    TreeEntry::Tree(t) => queue.push_back((join_path(&prefix, &t.name), t.tree)),
                }
            }
        }
        Ok(blobs)
    }

    /// Apply a batch of ops on top of `base` (or an empty tree) and write the result.
    ///
    /// Subtrees untouched by the ops are reused by ID. Directories left empty
    /// are removed. Inserting below an existing blob, or inserting a blob
    /// where a subtree is, fails with [`RepoError::InvalidPath`].
    pub async fn build_tree(&self, base: Option<&ObjectId>, ops: Vec<TreeOp>) -> Result<ObjectId> {
        let mut root = match base {
            Some(id) => expand(self.read_tree(id).await?),
            None => BTreeMap::new(),
        };

        for op in ops {
            let parts = split_path(op.path())?;
            let (leaf, parents) = match parts.split_last() {
                Some(split) => split,
                None => return Err(RepoError::InvalidPath(op.path().to_string())),
            };
            let is_insert = matches!(op, TreeOp::Insert { .. });

            let mut dir = &mut root;
            let mut missing = false;
            for part in parents {
                if !dir.contains_key(*part) {
                    if !is_insert {
                        missing = true;
                        break;
                    }
                    dir.insert(part.to_string(), Node::Dir(BTreeMap::new()));
                }
                let node = match dir.get_mut(*part) {
                    Some(node) => node,
                    None => return Err(RepoError::InvalidPath(op.path().to_string())),
                };
                if let Node::Stored(id) = node {
                    let id = id.clone();
                    *node = Node::Dir(expand(self.read_tree(&id).await?));
                }
                dir = match node {
                    Node::Dir(children) => children,
                    _ => {
                        return Err(RepoError::InvalidPath(format!(
                            "{}: '{}' is not a directory",
                            op.path(),
                            part
                        )));
                    }
                };
            }
            if missing {
                continue;
            }

            match op {
                TreeOp::Insert { ref blob, .. } => {
                    if matches!(dir.get(*leaf), Some(Node::Dir(_)) | Some(Node::Stored(_))) {
                        return Err(RepoError::InvalidPath(format!(
                            "{}: is a directory",
                            op.path()
                        )));
                    }
                    dir.insert(leaf.to_string(), Node::Blob(blob.clone()));
                }
                TreeOp::Remove { .. } => {
                    if matches!(dir.get(*leaf), Some(Node::Blob(_))) {
                        dir.remove(*leaf);
                    }
                }
            }
        }

        let mut new_objects = Vec::new();
        let root_id = match serialize_dir(&root, &mut new_objects)? {
            Some(id) => id,
            None => return self.write_tree(Tree::empty()).await,
        };
        for (_, obj) in &new_objects {
            self.write_object(obj).await?;
        }
        Ok(root_id)
    }
}
