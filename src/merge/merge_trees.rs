//! Three-way merge of repository trees.
//!
//! Both sides are diffed against the ancestor path by path. Record paths are
//! unique per identity, so a path-level merge is an identity-level merge: a
//! path changed on one side takes that side, identical changes merge cleanly,
//! and differing changes become a [`Conflict`] labelled by dataset, kind and
//! identity.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::dataset::{DatasetError, DecodedPath, ItemKind, RepoStructure, identity_of};
use crate::merge::change_merge::changes_to_merge;
use crate::merge::error::{MergeError, Result};
use crate::merge::item_change::to_item_change;
use crate::merge::merged_index::MergedIndex;
use crate::merge::types::{AncestorOursTheirs, Conflict, ItemChange, ItemMerge, MergeEntry, Version};
use crate::repo::{ChangeStatus, PathChange, Repo};
use crate::repository::ObjectId;

async fn changes_by_path(
    repo: &Repo,
    ancestor: &ObjectId,
    derived: &ObjectId,
) -> Result<BTreeMap<String, PathChange>> {
    Ok(repo
        .diff_tree_paths(Some(ancestor), Some(derived))
        .await?
        .into_iter()
        .map(|change| (change.path.clone(), change))
        .collect())
}

fn side_change(change: Option<&PathChange>, path: &str) -> Result<ItemChange> {
    match change {
        None => Ok(ItemChange::Unchanged),
        Some(c) if c.status == ChangeStatus::TypeChanged => Err(MergeError::StructuralViolation {
            path: path.to_string(),
            reason: "a blob on one side is a directory on the other".to_string(),
        }),
        Some(c) => to_item_change(c.old_id.as_ref(), c.new_id.as_ref(), path),
    }
}

/// Prefix for the label of a raw path whose plain label is already taken by
/// a dataset item.
const RAW_PATH_LABEL_PREFIX: &str = "path:";

/// Label a conflicting path by the first snapshot (ours, theirs, ancestor)
/// with a dataset containing it. Paths outside datasets, or outside a
/// dataset's item namespaces, keep their raw path as the identity.
async fn label_conflict(
    structures: &AncestorOursTheirs<RepoStructure>,
    path: &str,
    versions: AncestorOursTheirs<Option<MergeEntry>>,
) -> Result<Conflict> {
    for version in [Version::Ours, Version::Theirs, Version::Ancestor] {
        let (dataset, kind, identity) = match structures.get(version).decode_path(path).await {
            Ok(Some((ds, DecodedPath::Meta(name)))) => (ds, ItemKind::Meta, name),
            Ok(Some((ds, DecodedPath::Item(kind, key)))) => (ds, kind, identity_of(&key)),
            Ok(None) => continue,
            Err(DatasetError::NotADataRecord(_)) => break,
            Err(e) => return Err(e.into()),
        };
        return Ok(Conflict {
            dataset: Some(dataset.path().to_string()),
            kind: Some(kind),
            identity,
            versions,
        });
    }
    Ok(Conflict {
        dataset: None,
        kind: None,
        identity: path.to_string(),
        versions,
    })
}

/// Merge the changes from `ancestor` to `ours` and from `ancestor` to
/// `theirs`.
///
/// The returned index starts from every blob in `ours`; paths only `theirs`
/// changed are taken from `theirs`, and conflicting paths are removed from
/// the entries and recorded as conflicts.
pub async fn merge_trees(repo: &Arc<Repo>, trees: &AncestorOursTheirs<ObjectId>) -> Result<MergedIndex> {
    let ours_changes = changes_by_path(repo, &trees.ancestor, &trees.ours).await?;
    let theirs_changes = changes_by_path(repo, &trees.ancestor, &trees.theirs).await?;
    debug!(
        ours = ours_changes.len(),
        theirs = theirs_changes.len(),
        "computed changes from ancestor"
    );

    let structures = trees
        .clone()
        .map(|tree| RepoStructure::from_tree(repo.clone(), tree));
    let mut index = MergedIndex {
        entries: repo.list_blobs(&trees.ours).await?,
        ..Default::default()
    };

    let mut conflicts = Vec::new();
    let paths: BTreeSet<&String> = ours_changes.keys().chain(theirs_changes.keys()).collect();
    for path in paths {
        let ours_raw = ours_changes.get(path);
        let theirs_raw = theirs_changes.get(path);
        let ours = side_change(ours_raw, path)?;
        let theirs = side_change(theirs_raw, path)?;

        match changes_to_merge(&ours, &theirs) {
            ItemMerge::TakeEither | ItemMerge::TakeOurs => {}
            ItemMerge::TakeTheirs => match theirs.result() {
                Some(blob) => {
                    index.entries.insert(path.clone(), blob.clone());
                }
                None => {
                    index.entries.remove(path);
                }
            },
            ItemMerge::Conflict => {
                index.entries.remove(path);
                let ancestor = ours_raw.or(theirs_raw).and_then(|c| c.old_id.as_ref());
                let entry = |blob: Option<&ObjectId>| {
                    blob.map(|blob| MergeEntry {
                        path: path.clone(),
                        blob: blob.clone(),
                    })
                };
                let versions =
                    AncestorOursTheirs::new(entry(ancestor), entry(ours.result()), entry(theirs.result()));
                conflicts.push(label_conflict(&structures, path, versions).await?);
            }
        }
    }
    insert_conflicts(&mut index, conflicts)?;

    info!(
        entries = index.entries.len(),
        conflicts = index.conflicts.len(),
        "merged trees"
    );
    Ok(index)
}

/// Key each conflict by its label. Dataset items claim their labels first;
/// a raw path whose label clashes with one is relabelled with
/// [`RAW_PATH_LABEL_PREFIX`].
fn insert_conflicts(index: &mut MergedIndex, mut conflicts: Vec<Conflict>) -> Result<()> {
    conflicts.sort_by_key(|c| c.dataset.is_none());
    for mut conflict in conflicts {
        if conflict.dataset.is_none() && index.conflicts.contains_key(&conflict.label()) {
            conflict.identity = format!("{}{}", RAW_PATH_LABEL_PREFIX, conflict.identity);
        }
        let label = conflict.label();
        if index.conflicts.contains_key(&label) {
            return Err(MergeError::StructuralViolation {
                path: label,
                reason: "two conflicting paths share this conflict label".to_string(),
            });
        }
        debug!(label = %label, "conflict");
        index.conflicts.insert(label, conflict);
    }
    Ok(())
}
