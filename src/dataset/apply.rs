//! Applying diffs to datasets and committing the result.
//!
//! Each dataset turns its part of a diff into its own list of tree ops; the
//! structure concatenates them into one batch for the tree builder. Every
//! write is checked against the stored content first and all conflicting
//! writes are reported together.

use serde_json::{Value, json};
use tracing::{info, warn};

use super::dataset::{Dataset, codec_for, meta_value_to_bytes};
use super::error::{ApplyConflict, ApplyConflictReason, DatasetError, Result};
use super::path_codec::{DatasetFormat, ItemKind, PathCodec, SCHEMA_META_ITEM, VERSION_META_ITEM};
use super::schema::Schema;
use super::structure::RepoStructure;
use crate::diff::{DatasetDiff, Delta, RepoDiff};
use crate::repo::TreeOp;
use crate::repository::{ObjectId, Tree, to_canonical_json};

/// The ops and conflicts produced by applying one dataset's diff.
#[derive(Debug, Default)]
pub struct DatasetApply {
    pub ops: Vec<TreeOp>,
    pub conflicts: Vec<ApplyConflict>,
}

/// The label used for an item in conflict and error messages.
pub fn item_label(dataset: &str, kind: ItemKind, key: &str) -> String {
    format!("{}:{}:{}", dataset, kind, key)
}

/// A single checked write: where, and what (or nothing) to put there.
struct Write {
    rel: String,
    content: Option<Vec<u8>>,
}

impl Dataset {
    /// The codec to use for records in `diff`: the new schema if the diff
    /// changes it, otherwise the stored one.
    async fn codec_for_diff(&self, diff: &DatasetDiff) -> Result<PathCodec> {
        if !self.format().has_schema() {
            return Ok(PathCodec::for_tiles());
        }
        let schema_delta = diff.get(ItemKind::Meta).get(SCHEMA_META_ITEM);
        let Some(new_schema) = schema_delta.and_then(Delta::new_kv) else {
            let schema = self.schema().await?;
            return codec_for(self.path(), self.format(), schema.as_ref());
        };
        let schema = Schema::from_value(self.path(), &new_schema.value)?;
        let new_pk = schema.primary_key(self.path())?;
        if let Some(existing) = self.schema().await? {
            let old_pk = existing.primary_key(self.path())?;
            if old_pk.name != new_pk.name || old_pk.data_type != new_pk.data_type {
                return Err(DatasetError::Schema {
                    dataset: self.path().to_string(),
                    message: format!(
                        "changing the primary key from {} ({}) to {} ({}) is not supported",
                        old_pk.name, old_pk.data_type, new_pk.name, new_pk.data_type
                    ),
                });
            }
        }
        codec_for(self.path(), self.format(), Some(&schema))
    }

    async fn stored_record(&self, rel: &str) -> Result<Option<Value>> {
        match self.repo().read_blob_at(self.tree(), rel).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The typed key and dataset-relative path of a record side of a delta.
    fn record_location(
        &self,
        codec: &PathCodec,
        kind: ItemKind,
        key: &str,
        record: &Value,
    ) -> Result<String> {
        let (typed_key, identity) = codec.record_identity(record).map_err(|e| match e {
            DatasetError::InvalidRecord { message, .. } => DatasetError::InvalidRecord {
                dataset: self.path().to_string(),
                message: format!("{}: {}", item_label(self.path(), kind, key), message),
            },
            other => other,
        })?;
        if identity != key {
            return Err(DatasetError::InvalidRecord {
                dataset: self.path().to_string(),
                message: format!(
                    "{}: record identity is {:?}",
                    item_label(self.path(), kind, key),
                    identity
                ),
            });
        }
        codec.encode(&typed_key)
    }

    /// Check each delta against the stored content and produce tree ops.
    ///
    /// Conflicting deltas are returned in [`DatasetApply::conflicts`] rather
    /// than failing on the first one. Removals precede insertions so that a
    /// batch can move items between identities.
    pub async fn apply_diff(&self, diff: &DatasetDiff) -> Result<DatasetApply> {
        let codec = self.codec_for_diff(diff).await?;
        let mut removes = Vec::new();
        let mut inserts = Vec::new();
        let mut conflicts = Vec::new();

        for (kind, deltas) in diff.iter() {
            let kind = *kind;
            if kind != ItemKind::Meta && kind != self.item_kind() {
                return Err(DatasetError::InvalidRecord {
                    dataset: self.path().to_string(),
                    message: format!("a {} dataset cannot hold {} items", self.format().version_str(), kind),
                });
            }

            for delta in deltas.values() {
                let label = item_label(self.path(), kind, delta.key());
                let mut conflict = |reason| conflicts.push(ApplyConflict { label: label.clone(), reason });

                // Resolve each side to a relative path and its stored value.
                let old = match delta.old_kv() {
                    Some(kv) => {
                        let rel = self.item_path(&codec, kind, &kv.key, &kv.value)?;
                        let stored = self.stored_item(kind, &kv.key, &rel).await?;
                        Some((rel, &kv.value, stored))
                    }
                    None => None,
                };
                let new = match delta.new_kv() {
                    Some(kv) => {
                        let rel = self.item_path(&codec, kind, &kv.key, &kv.value)?;
                        let bytes = match kind {
                            ItemKind::Meta => meta_value_to_bytes(self.path(), &kv.key, &kv.value)?,
                            _ => to_canonical_json(&kv.value)?,
                        };
                        Some((rel, bytes))
                    }
                    None => None,
                };

                let mut ok = true;
                if let Some((_, expected, stored)) = &old {
                    match stored {
                        None if new.is_some() => {
                            conflict(ApplyConflictReason::UpdateMissing);
                            ok = false;
                        }
                        None => {
                            conflict(ApplyConflictReason::DeleteMissing);
                            ok = false;
                        }
                        Some(value) if value != *expected => {
                            conflict(ApplyConflictReason::Stale);
                            ok = false;
                        }
                        Some(_) => {}
                    }
                }
                if let Some((new_rel, _)) = &new {
                    let moved = old.as_ref().is_none_or(|(old_rel, _, _)| old_rel != new_rel);
                    if moved {
                        let key = delta.new_key().unwrap_or_default();
                        if self.stored_item(kind, key, new_rel).await?.is_some() {
                            conflict(ApplyConflictReason::InsertExisting);
                            ok = false;
                        }
                    }
                }
                if !ok {
                    continue;
                }

                if let Some((rel, _, _)) = old {
                    removes.push(Write { rel, content: None });
                }
                if let Some((rel, bytes)) = new {
                    inserts.push(Write {
                        rel,
                        content: Some(bytes),
                    });
                }
            }
        }

        let mut ops = Vec::with_capacity(removes.len() + inserts.len());
        for write in removes.into_iter().chain(inserts) {
            let path = self.full_path(&write.rel);
            match write.content {
                Some(bytes) => {
                    let blob = self.repo().write_blob(&bytes).await?;
                    ops.push(TreeOp::Insert { path, blob });
                }
                None => ops.push(TreeOp::Remove { path }),
            }
        }
        Ok(DatasetApply { ops, conflicts })
    }

    fn item_path(&self, codec: &PathCodec, kind: ItemKind, key: &str, value: &Value) -> Result<String> {
        if kind == ItemKind::Meta {
            if key == VERSION_META_ITEM {
                return Err(DatasetError::InvalidRecord {
                    dataset: self.path().to_string(),
                    message: "the version meta item cannot be changed".to_string(),
                });
            }
            return Ok(PathCodec::meta_path(key));
        }
        self.record_location(codec, kind, key, value)
    }

    async fn stored_item(&self, kind: ItemKind, key: &str, rel: &str) -> Result<Option<Value>> {
        match kind {
            ItemKind::Meta => self.get_meta_item(key).await,
            _ => self.stored_record(rel).await,
        }
    }
}

impl RepoStructure {
    /// Turn a diff into one batch of tree ops against this snapshot.
    ///
    /// Datasets named in the diff that do not exist yet are created in
    /// `new_format`. Fails with [`DatasetError::PatchDoesNotApply`] listing
    /// every conflicting write.
    pub async fn apply_ops(&self, diff: &RepoDiff, new_format: DatasetFormat) -> Result<Vec<TreeOp>> {
        let existing = self.dataset_paths().await?;
        let mut ops = Vec::new();
        let mut conflicts = Vec::new();

        for (path, ds_diff) in diff.iter() {
            if ds_diff.is_empty() {
                continue;
            }
            let result = match self.get_dataset(path).await? {
                Some(dataset) => dataset.apply_diff(ds_diff).await?,
                None => {
                    check_new_dataset_path(path, &existing)?;
                    let empty = self.repo().write_tree(Tree::empty()).await?;
                    let dataset = Dataset::new(self.repo().clone(), path.clone(), empty, new_format);
                    let mut result = dataset.apply_diff(ds_diff).await?;
                    let version = to_canonical_json(&json!({ "version": new_format.version_str() }))?;
                    result.ops.push(TreeOp::Insert {
                        path: dataset.full_path(&PathCodec::meta_path(VERSION_META_ITEM)),
                        blob: self.repo().write_blob(&version).await?,
                    });
                    result
                }
            };
            ops.extend(result.ops);
            conflicts.extend(result.conflicts);
        }

        if !conflicts.is_empty() {
            for conflict in &conflicts {
                warn!(label = %conflict.label, reason = %conflict.reason, "apply conflict");
            }
            return Err(DatasetError::PatchDoesNotApply(conflicts));
        }
        Ok(ops)
    }

    /// Apply a diff on top of this snapshot and write the resulting tree.
    pub async fn create_tree_from_diff(&self, diff: &RepoDiff, new_format: DatasetFormat) -> Result<ObjectId> {
        let ops = self.apply_ops(diff, new_format).await?;
        Ok(self.repo().build_tree(Some(self.tree()), ops).await?)
    }

    /// Apply a diff, commit the result on top of this snapshot's commit and
    /// advance `HEAD` to it.
    ///
    /// `HEAD` is moved with a compare-and-swap from this snapshot's commit, so
    /// committing on a stale snapshot fails rather than losing history.
    pub async fn commit_diff(
        &self,
        diff: &RepoDiff,
        message: &str,
        author: Option<&str>,
        new_format: DatasetFormat,
    ) -> Result<ObjectId> {
        let parent = self
            .commit()
            .cloned()
            .ok_or_else(|| DatasetError::NotFound("commit for snapshot".to_string()))?;
        let tree = self.create_tree_from_diff(diff, new_format).await?;
        if &tree == self.tree() {
            return Err(DatasetError::NoChanges);
        }
        let commit = self
            .repo()
            .create_commit(&tree, vec![parent.clone()], message, author)
            .await?;
        self.repo().update_head(Some(&parent), &commit).await?;
        info!(commit = %commit, changes = diff.len(), "committed diff");
        Ok(commit)
    }
}

/// Datasets cannot be nested inside one another or live in hidden directories.
fn check_new_dataset_path(path: &str, existing: &[String]) -> Result<()> {
    let invalid = |message: String| DatasetError::InvalidRecord {
        dataset: path.to_string(),
        message,
    };
    if path.is_empty() || path.split('/').any(|part| part.is_empty() || part.starts_with('.')) {
        return Err(invalid("invalid dataset path".to_string()));
    }
    for other in existing {
        if path.starts_with(&format!("{}/", other)) || other.starts_with(&format!("{}/", path)) {
            return Err(invalid(format!("cannot nest datasets ({} exists)", other)));
        }
    }
    Ok(())
}
