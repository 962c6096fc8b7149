//! Resolving individual conflicts of a suspended merge.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::dataset::{Dataset, ItemKind, PathCodec, RepoStructure, meta_value_to_bytes};
use crate::merge::error::{MergeError, Result};
use crate::merge::merge_state::SuspendedMerge;
use crate::merge::types::{Conflict, MergeEntry, Version};
use crate::repo::Repo;
use crate::repository::to_canonical_json;

/// How to resolve one conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Keep one of the three versions. A version that does not exist
    /// resolves the conflict by deleting the item.
    Version(Version),
    /// Delete the item.
    Delete,
    /// Replace the item with these records. Meta conflicts take exactly one
    /// value; record conflicts take any number, including none.
    Records(Vec<Value>),
}

/// Resolve the conflict with `label` and save the merge state.
///
/// Returns the number of conflicts still unresolved.
pub async fn resolve_conflict(repo: &Arc<Repo>, label: &str, resolution: Resolution) -> Result<usize> {
    let label = label.strip_suffix(':').unwrap_or(label);
    let mut state = SuspendedMerge::load(repo).await?.ok_or_else(|| {
        MergeError::InvalidOperation(r#"Repository is not in "merging" state"#.to_string())
    })?;
    let conflict = state
        .index
        .conflicts
        .get(label)
        .cloned()
        .ok_or_else(|| MergeError::NoSuchConflict(label.to_string()))?;
    if state.index.resolves.contains_key(label) {
        return Err(MergeError::InvalidOperation(format!(
            "Conflict at {} is already resolved",
            label
        )));
    }

    if conflict.is_record() {
        let blocking: Vec<String> = state
            .index
            .unresolved_conflicts()
            .filter(|(_, c)| c.is_meta() && c.dataset == conflict.dataset)
            .map(|(l, _)| l.clone())
            .collect();
        if !blocking.is_empty() {
            return Err(MergeError::UnresolvedDependency {
                label: label.to_string(),
                blocking,
            });
        }
    }

    let entries = match resolution {
        Resolution::Version(version) => {
            let entry = conflict.versions.get(version).clone();
            if entry.is_none() {
                info!(label, %version, "version does not exist, resolving by deletion");
            }
            entry.into_iter().collect()
        }
        Resolution::Delete => Vec::new(),
        Resolution::Records(records) => encode_records(repo, &state, &conflict, records).await?,
    };

    state.index.add_resolve(label, entries)?;
    state.save(repo).await?;
    let remaining = state.index.unresolved_count();
    info!(label, remaining, "Resolved 1 conflict. {} conflicts to go.", remaining);
    Ok(remaining)
}

/// The conflict's dataset, taken from ours, theirs or the ancestor.
async fn conflict_dataset(
    repo: &Arc<Repo>,
    state: &SuspendedMerge,
    ds_path: &str,
) -> Result<Arc<Dataset>> {
    for version in [Version::Ours, Version::Theirs, Version::Ancestor] {
        let commit = state.commits.get(version).clone();
        let structure = RepoStructure::from_commit(repo.clone(), commit).await?;
        if let Some(dataset) = structure.get_dataset(ds_path).await? {
            return Ok(dataset);
        }
    }
    Err(MergeError::InvalidOperation(format!(
        "Dataset {} does not exist in any version",
        ds_path
    )))
}

async fn encode_records(
    repo: &Arc<Repo>,
    state: &SuspendedMerge,
    conflict: &Conflict,
    records: Vec<Value>,
) -> Result<Vec<MergeEntry>> {
    let (Some(ds_path), Some(kind)) = (&conflict.dataset, conflict.kind) else {
        return Err(MergeError::InvalidOperation(format!(
            "Resolving {} with records is only supported for dataset items",
            conflict.label()
        )));
    };
    let dataset = conflict_dataset(repo, state, ds_path).await?;

    if kind == ItemKind::Meta {
        let [value] = <[Value; 1]>::try_from(records).map_err(|records| {
            MergeError::InvalidOperation(format!(
                "A meta item conflict takes exactly one value, got {}",
                records.len()
            ))
        })?;
        let bytes = meta_value_to_bytes(ds_path, &conflict.identity, &value)?;
        return Ok(vec![MergeEntry {
            path: dataset.full_path(&PathCodec::meta_path(&conflict.identity)),
            blob: repo.write_blob(&bytes).await?,
        }]);
    }

    let codec = dataset.codec().await?;
    let mut seen = BTreeSet::new();
    let mut entries = Vec::with_capacity(records.len());
    for record in records {
        if !record.is_object() {
            return Err(MergeError::InvalidOperation(format!(
                "Resolution for {} must be a list of records",
                conflict.label()
            )));
        }
        let (key, identity) = codec.record_identity(&record)?;
        if !seen.insert(identity.clone()) {
            return Err(MergeError::InvalidOperation(format!(
                "Resolution for {} has more than one record with key {}",
                conflict.label(),
                identity
            )));
        }
        let rel = codec.encode(&key)?;
        entries.push(MergeEntry {
            path: dataset.full_path(&rel),
            blob: repo.write_blob(&to_canonical_json(&record)?).await?,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{Delta, KeyValue, RepoDiff};
    use crate::merge::commit::{MergeOptions, merge, merge_continue};
    use crate::repository::ObjectId;
    use crate::test_fixtures::{commit, commit_on_branch, create_table, head, kv};
    use serde_json::json;

    /// Conflicting edits of record 1 and of the `title` meta item.
    async fn conflicted() -> Arc<Repo> {
        let repo = crate::test_fixtures::new_repo().await;
        let base = commit(&repo, &create_table("t", &[json!({"id": 1, "x": 1})]), "base").await;
        let side = |x: i64, title: &str| {
            let mut diff = RepoDiff::new();
            let ds = diff.entry("t");
            ds.entry(ItemKind::Meta)
                .add_delta(Delta::Insert(KeyValue::new("title", json!(title))));
            ds.entry(ItemKind::Feature).add_delta(Delta::Update {
                old: kv(json!({"id": 1, "x": 1})),
                new: kv(json!({"id": 1, "x": x})),
            });
            diff
        };
        commit(&repo, &side(2, "ours"), "ours").await;
        commit_on_branch(&repo, "other", &base, &side(3, "theirs"), "theirs").await;
        merge(&repo, "other", &MergeOptions::default(), None).await.unwrap();
        repo
    }

    async fn finish(repo: &Arc<Repo>) -> ObjectId {
        merge_continue(repo, None, None, None).await.unwrap()
    }

    async fn records(repo: &Arc<Repo>) -> Vec<Value> {
        let ds = head(repo).await.get_dataset("t").await.unwrap().unwrap();
        ds.records().await.unwrap().into_values().collect()
    }

    #[tokio::test]
    async fn test_meta_conflicts_block_record_resolution() {
        let repo = conflicted().await;
        match resolve_conflict(&repo, "t:feature:1", Resolution::Delete).await {
            Err(MergeError::UnresolvedDependency { label, blocking }) => {
                assert_eq!(label, "t:feature:1");
                assert_eq!(blocking, vec!["t:meta:title".to_string()]);
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let remaining = resolve_conflict(&repo, "t:meta:title:", Resolution::Version(Version::Theirs))
            .await
            .unwrap();
        assert_eq!(remaining, 1);
        assert_eq!(
            resolve_conflict(&repo, "t:feature:1", Resolution::Version(Version::Ours))
                .await
                .unwrap(),
            0
        );

        finish(&repo).await;
        let ds = head(&repo).await.get_dataset("t").await.unwrap().unwrap();
        assert_eq!(ds.get_meta_item("title").await.unwrap(), Some(json!("theirs")));
        assert_eq!(records(&repo).await, vec![json!({"id": 1, "x": 2})]);
    }

    #[tokio::test]
    async fn test_resolve_errors() {
        let repo = conflicted().await;
        assert!(matches!(
            resolve_conflict(&repo, "t:feature:42", Resolution::Delete).await,
            Err(MergeError::NoSuchConflict(_))
        ));
        assert!(matches!(
            resolve_conflict(&repo, "t:meta:title", Resolution::Records(vec![])).await,
            Err(MergeError::InvalidOperation(_))
        ));
        resolve_conflict(&repo, "t:meta:title", Resolution::Records(vec![json!("merged")]))
            .await
            .unwrap();
        assert!(matches!(
            resolve_conflict(&repo, "t:meta:title", Resolution::Delete).await,
            Err(MergeError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_with_zero_records_deletes() {
        let repo = conflicted().await;
        resolve_conflict(&repo, "t:meta:title", Resolution::Version(Version::Ours))
            .await
            .unwrap();
        resolve_conflict(&repo, "t:feature:1", Resolution::Records(vec![]))
            .await
            .unwrap();
        finish(&repo).await;
        assert!(records(&repo).await.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_with_two_records() {
        let repo = conflicted().await;
        resolve_conflict(&repo, "t:meta:title", Resolution::Version(Version::Ancestor))
            .await
            .unwrap();
        let both = vec![json!({"id": 1, "x": 9}), json!({"id": 5, "x": 9})];
        resolve_conflict(&repo, "t:feature:1", Resolution::Records(both.clone()))
            .await
            .unwrap();
        finish(&repo).await;

        assert_eq!(records(&repo).await, both);
        let ds = head(&repo).await.get_dataset("t").await.unwrap().unwrap();
        // The ancestor had no title, so taking it deleted the item.
        assert_eq!(ds.get_meta_item("title").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_record_keys_rejected() {
        let repo = conflicted().await;
        resolve_conflict(&repo, "t:meta:title", Resolution::Delete).await.unwrap();
        let dupes = vec![json!({"id": 1, "x": 1}), json!({"id": 1, "x": 2})];
        assert!(matches!(
            resolve_conflict(&repo, "t:feature:1", Resolution::Records(dupes)).await,
            Err(MergeError::InvalidOperation(_))
        ));
    }
}
