//! Dataset and repository diffs.
//!
//! Record diffs start from the path-level tree diff of the two dataset
//! subtrees. Deleted and added records are staged in buckets keyed by a
//! content fingerprint so that a record which only changed identity is
//! reported as one update rather than a delete and an insert.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use super::delta::{DatasetDiff, Delta, DeltaDiff, KeyValue, RepoDiff};
use super::error::{DiffError, Result};
use super::key_filter::{DatasetKeyFilter, RepoKeyFilter};
use crate::dataset::{Dataset, DatasetError, DecodedPath, ItemKind, PathCodec, RepoStructure, identity_of};
use crate::repo::ChangeStatus;
use crate::repository::ObjectId;
use crate::working_copy::WorkingCopy;

/// Staged candidates, bucketed by kind and fingerprint, in staging order.
type Buckets = BTreeMap<(ItemKind, String), VecDeque<KeyValue>>;

/// Compute the changes from `old` to `new`.
///
/// A missing dataset on either side is treated as empty. With `reverse` the
/// sides are swapped, so the result describes `new` to `old`. Record paths
/// are decoded and filtered before their content is read; moves pair only
/// records that pass `filter`, so a move across its edge shows as the insert
/// or delete of the matching side.
pub async fn diff_dataset(
    old: Option<&Dataset>,
    new: Option<&Dataset>,
    filter: &DatasetKeyFilter,
    reverse: bool,
) -> Result<DatasetDiff> {
    let (old, new) = if reverse { (new, old) } else { (old, new) };

    let mut diff = DatasetDiff::new();
    if filter.includes_kind(ItemKind::Meta) {
        diff.insert(ItemKind::Meta, diff_meta(old, new, filter).await?);
    }
    for (kind, deltas) in diff_records(old, new, filter).await? {
        diff.insert(kind, deltas);
    }
    diff.prune();

    if let Some(ds) = old.or(new) {
        debug!(dataset = ds.path(), deltas = diff.len(), "computed dataset diff");
    }
    Ok(diff)
}

async fn diff_meta(
    old: Option<&Dataset>,
    new: Option<&Dataset>,
    filter: &DatasetKeyFilter,
) -> Result<DeltaDiff> {
    let old_items = match old {
        Some(ds) => ds.meta_items().await?,
        None => Arc::default(),
    };
    let new_items = match new {
        Some(ds) => ds.meta_items().await?,
        None => Arc::default(),
    };

    let names: BTreeSet<&String> = old_items.keys().chain(new_items.keys()).collect();
    let mut deltas = DeltaDiff::new();
    for name in names {
        if !filter.matches(ItemKind::Meta, name) {
            continue;
        }
        let old_value = old_items.get(name);
        let new_value = new_items.get(name);
        if old_value == new_value {
            continue;
        }
        let delta = Delta::from_sides(
            old_value.map(|v| KeyValue::new(name.clone(), v.clone())),
            new_value.map(|v| KeyValue::new(name.clone(), v.clone())),
        );
        if let Some(delta) = delta {
            deltas.add_delta(delta);
        }
    }
    Ok(deltas)
}

/// Read one side of a changed record path. Returns `None` for paths that are
/// not records and for records `filter` excludes; neither is read.
async fn read_side(
    ds: &Dataset,
    rel: &str,
    blob: &ObjectId,
    filter: &DatasetKeyFilter,
) -> Result<Option<(ItemKind, KeyValue)>> {
    match ds.decode_path(rel).await {
        Ok(DecodedPath::Item(kind, key)) => {
            let identity = identity_of(&key);
            if !filter.matches(kind, &identity) {
                return Ok(None);
            }
            let value = ds.read_record(blob).await?;
            Ok(Some((kind, KeyValue::new(identity, value))))
        }
        Ok(DecodedPath::Meta(_)) | Err(DatasetError::NotADataRecord(_)) => Ok(None),
        Err(DatasetError::MalformedPath { reason, .. }) => Err(DiffError::StructuralViolation {
            path: ds.full_path(rel),
            reason,
        }),
        Err(e) => Err(e.into()),
    }
}

fn side<'a>(ds: Option<&'a Dataset>, id: &Option<ObjectId>, path: &str) -> Result<(&'a Dataset, ObjectId)> {
    match (ds, id) {
        (Some(ds), Some(id)) => Ok((ds, id.clone())),
        _ => Err(DiffError::StructuralViolation {
            path: path.to_string(),
            reason: "change refers to a missing side".to_string(),
        }),
    }
}

async fn stage(buckets: &mut Buckets, ds: &Dataset, kind: ItemKind, kv: KeyValue) -> Result<()> {
    let fingerprint = ds.codec().await?.fingerprint(&kv.value)?;
    buckets.entry((kind, fingerprint)).or_default().push_back(kv);
    Ok(())
}

async fn diff_records(
    old: Option<&Dataset>,
    new: Option<&Dataset>,
    filter: &DatasetKeyFilter,
) -> Result<BTreeMap<ItemKind, DeltaDiff>> {
    let mut result: BTreeMap<ItemKind, DeltaDiff> = BTreeMap::new();
    let Some(repo) = old.or(new).map(|ds| ds.repo()) else {
        return Ok(result);
    };

    let changes = repo
        .diff_tree_paths(old.map(Dataset::tree), new.map(Dataset::tree))
        .await?;

    let mut deletes = Buckets::new();
    let mut inserts = Buckets::new();

    for change in changes {
        if PathCodec::is_meta_path(&change.path) {
            continue;
        }
        match change.status {
            ChangeStatus::TypeChanged => {
                let ds = old.or(new).map(|ds| ds.full_path(&change.path));
                return Err(DiffError::StructuralViolation {
                    path: ds.unwrap_or(change.path),
                    reason: "changed between a blob and a tree".to_string(),
                });
            }
            ChangeStatus::Modified => {
                let (old_ds, old_id) = side(old, &change.old_id, &change.path)?;
                let (new_ds, new_id) = side(new, &change.new_id, &change.path)?;
                let old_side = read_side(old_ds, &change.path, &old_id, filter).await?;
                let new_side = read_side(new_ds, &change.path, &new_id, filter).await?;
                if let (Some((kind, old_kv)), Some((_, new_kv))) = (old_side, new_side) {
                    result.entry(kind).or_default().add_delta(Delta::Update {
                        old: old_kv,
                        new: new_kv,
                    });
                }
            }
            ChangeStatus::Deleted => {
                let (ds, id) = side(old, &change.old_id, &change.path)?;
                if let Some((kind, kv)) = read_side(ds, &change.path, &id, filter).await? {
                    stage(&mut deletes, ds, kind, kv).await?;
                }
            }
            ChangeStatus::Added => {
                let (ds, id) = side(new, &change.new_id, &change.path)?;
                if let Some((kind, kv)) = read_side(ds, &change.path, &id, filter).await? {
                    stage(&mut inserts, ds, kind, kv).await?;
                }
            }
        }
    }

    // Pair deletes with inserts of identical content, first staged first.
    for ((kind, fingerprint), olds) in deletes.iter_mut() {
        let Some(news) = inserts.get_mut(&(*kind, fingerprint.clone())) else {
            continue;
        };
        let pairs = olds.len().min(news.len());
        for (old_kv, new_kv) in olds.drain(..pairs).zip(news.drain(..pairs)) {
            result.entry(*kind).or_default().add_delta(Delta::Update {
                old: old_kv,
                new: new_kv,
            });
        }
    }

    // Leftovers: a delete and an insert of the same identity form an update.
    let mut leftover_inserts: BTreeMap<(ItemKind, String), KeyValue> = inserts
        .into_iter()
        .flat_map(|((kind, _), kvs)| kvs.into_iter().map(move |kv| ((kind, kv.key.clone()), kv)))
        .collect();
    for ((kind, _), kvs) in deletes {
        for old_kv in kvs {
            let delta = match leftover_inserts.remove(&(kind, old_kv.key.clone())) {
                Some(new_kv) => Delta::Update {
                    old: old_kv,
                    new: new_kv,
                },
                None => Delta::Delete(old_kv),
            };
            result.entry(kind).or_default().add_delta(delta);
        }
    }
    for ((kind, _), new_kv) in leftover_inserts {
        result.entry(kind).or_default().add_delta(Delta::Insert(new_kv));
    }

    for deltas in result.values_mut() {
        let noops: Vec<String> = deltas
            .iter()
            .filter(|(_, delta)| delta.is_noop())
            .map(|(key, _)| key.clone())
            .collect();
        for key in noops {
            deltas.remove(&key);
        }
    }
    Ok(result)
}

/// The changes to one dataset from `base` to `target`, plus the working copy's
/// uncommitted changes on top of `target` if one is given.
pub async fn get_dataset_diff(
    base: &RepoStructure,
    target: &RepoStructure,
    working_copy: Option<&dyn WorkingCopy>,
    ds_path: &str,
    filter: &DatasetKeyFilter,
) -> Result<DatasetDiff> {
    let target_ds = target.get_dataset(ds_path).await?;

    let mut diff = DatasetDiff::new();
    if base.tree() != target.tree() {
        let base_ds = base.get_dataset(ds_path).await?;
        diff = diff_dataset(base_ds.as_deref(), target_ds.as_deref(), filter, false).await?;
    }

    if let Some(wc) = working_copy {
        let actual = wc.base_tree().await?;
        if actual.as_ref() != Some(target.tree()) {
            return Err(DiffError::WorkingCopyMismatch {
                expected: target.tree().clone(),
                actual,
            });
        }
        diff += wc.diff_against_tree(ds_path, target_ds.as_deref(), filter).await?;
    }

    diff.prune();
    Ok(diff)
}

/// The changes across every dataset present in either snapshot.
pub async fn get_repo_diff(
    base: &RepoStructure,
    target: &RepoStructure,
    working_copy: Option<&dyn WorkingCopy>,
    filter: &RepoKeyFilter,
) -> Result<RepoDiff> {
    let mut paths: BTreeSet<String> = base.dataset_paths().await?.into_iter().collect();
    paths.extend(target.dataset_paths().await?);

    let mut diff = RepoDiff::new();
    for path in paths.into_iter().filter(|p| filter.matches_dataset(p)) {
        let ds_diff = get_dataset_diff(base, target, working_copy, &path, filter.dataset(&path)).await?;
        diff.insert(path, ds_diff);
    }
    diff.prune();
    debug!(base = %base.tree(), target = %target.tree(), deltas = diff.len(), "computed repo diff");
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetFormat;
    use crate::diff::DeltaType;
    use crate::repo::TreeOp;
    use crate::test_fixtures::{commit, create_table, feature_diff, head, kv, new_repo};
    use crate::working_copy::MemoryWorkingCopy;
    use serde_json::json;

    async fn roads_diff(base: &RepoStructure, target: &RepoStructure) -> DatasetDiff {
        get_dataset_diff(base, target, None, "roads", &DatasetKeyFilter::MatchAll)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_update_delete() {
        let repo = new_repo().await;
        commit(&repo, &create_table("roads", &[json!({"id": 1, "x": 1}), json!({"id": 2, "x": 2})]), "v1").await;
        let v1 = head(&repo).await;
        commit(
            &repo,
            &feature_diff(
                "roads",
                vec![
                    Delta::Update {
                        old: kv(json!({"id": 1, "x": 1})),
                        new: kv(json!({"id": 1, "x": 10})),
                    },
                    Delta::Delete(kv(json!({"id": 2, "x": 2}))),
                    Delta::Insert(kv(json!({"id": 3, "x": 3}))),
                ],
            ),
            "v2",
        )
        .await;
        let v2 = head(&repo).await;

        let diff = roads_diff(&v1, &v2).await;
        let features = diff.get(ItemKind::Feature);
        assert_eq!(features.len(), 3);
        assert_eq!(features.get("1").unwrap().delta_type(), DeltaType::Update);
        assert_eq!(features.get("2").unwrap().delta_type(), DeltaType::Delete);
        assert_eq!(features.get("3").unwrap().delta_type(), DeltaType::Insert);
        assert!(diff.get(ItemKind::Meta).is_empty());

        let reversed = get_dataset_diff(&v2, &v1, None, "roads", &DatasetKeyFilter::MatchAll)
            .await
            .unwrap();
        assert_eq!(reversed, diff.clone().invert());

        let v1_ds = v1.get_dataset("roads").await.unwrap().unwrap();
        let v2_ds = v2.get_dataset("roads").await.unwrap().unwrap();
        let flipped = diff_dataset(Some(&v1_ds), Some(&v2_ds), &DatasetKeyFilter::MatchAll, true)
            .await
            .unwrap();
        assert_eq!(flipped, reversed);
    }

    #[tokio::test]
    async fn test_new_dataset_includes_meta() {
        let repo = new_repo().await;
        let before = head(&repo).await;
        commit(&repo, &create_table("roads", &[json!({"id": 1, "x": 1})]), "v1").await;
        let after = head(&repo).await;

        let diff = roads_diff(&before, &after).await;
        assert_eq!(diff.get(ItemKind::Meta).len(), 1);
        assert!(diff.get(ItemKind::Meta).get("schema.json").is_some());
        assert_eq!(diff.get(ItemKind::Feature).len(), 1);

        let gone = roads_diff(&after, &before).await;
        assert_eq!(gone.get(ItemKind::Feature).get("1").unwrap().delta_type(), DeltaType::Delete);
    }

    #[tokio::test]
    async fn test_move_pairing() {
        let repo = new_repo().await;
        commit(&repo, &create_table("roads", &[json!({"id": 1, "x": 5}), json!({"id": 2, "x": 6})]), "v1").await;
        let v1 = head(&repo).await;
        commit(
            &repo,
            &feature_diff(
                "roads",
                vec![
                    Delta::Delete(kv(json!({"id": 1, "x": 5}))),
                    Delta::Insert(kv(json!({"id": 7, "x": 5}))),
                ],
            ),
            "renumber",
        )
        .await;
        let v2 = head(&repo).await;

        let diff = roads_diff(&v1, &v2).await;
        let features = diff.get(ItemKind::Feature);
        assert_eq!(features.len(), 1);
        let delta = features.get("1").unwrap();
        assert_eq!(delta.delta_type(), DeltaType::Update);
        assert_eq!(delta.new_key(), Some("7"));

        // A filter naming only the destination shows its side of the move.
        let filter = RepoKeyFilter::parse(&["roads:feature:7"]).unwrap();
        let filtered = get_dataset_diff(&v1, &v2, None, "roads", filter.dataset("roads"))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(
            filtered.get(ItemKind::Feature).get("7").unwrap().delta_type(),
            DeltaType::Insert
        );
        let filter = RepoKeyFilter::parse(&["roads:feature:2"]).unwrap();
        let filtered = get_dataset_diff(&v1, &v2, None, "roads", filter.dataset("roads"))
            .await
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn test_working_copy_diff_stacks_on_commits() {
        let repo = new_repo().await;
        commit(&repo, &create_table("roads", &[json!({"id": 1, "x": 1})]), "v1").await;
        let v1 = head(&repo).await;
        commit(
            &repo,
            &feature_diff("roads", vec![Delta::Insert(kv(json!({"id": 2, "x": 2})))]),
            "v2",
        )
        .await;
        let v2 = head(&repo).await;

        let wc = MemoryWorkingCopy::new(repo.clone(), Some(v2.tree().clone()));
        wc.set_item("roads", ItemKind::Feature, "1", json!({"id": 1, "x": 100}));
        // Restores the stored value: no delta
        wc.set_item("roads", ItemKind::Feature, "2", json!({"id": 2, "x": 2}));

        let diff = get_dataset_diff(&v1, &v2, Some(&wc), "roads", &DatasetKeyFilter::MatchAll)
            .await
            .unwrap();
        let features = diff.get(ItemKind::Feature);
        assert_eq!(features.len(), 2);
        assert_eq!(features.get("1").unwrap().new_kv().unwrap().value, json!({"id": 1, "x": 100}));
        assert_eq!(features.get("2").unwrap().delta_type(), DeltaType::Insert);

        let stale = MemoryWorkingCopy::new(repo.clone(), Some(v1.tree().clone()));
        let result = get_dataset_diff(&v1, &v2, Some(&stale), "roads", &DatasetKeyFilter::MatchAll).await;
        assert!(matches!(result, Err(DiffError::WorkingCopyMismatch { .. })));
    }

    #[tokio::test]
    async fn test_repo_diff_filters_datasets() {
        let repo = new_repo().await;
        let before = head(&repo).await;
        let mut diff = create_table("roads", &[json!({"id": 1, "x": 1})]);
        diff += create_table("rivers", &[json!({"id": 1, "x": 1})]);
        commit(&repo, &diff, "import").await;
        let after = head(&repo).await;

        let all = get_repo_diff(&before, &after, None, &RepoKeyFilter::MatchAll).await.unwrap();
        assert_eq!(all.datasets().collect::<Vec<_>>(), vec!["rivers", "roads"]);
        assert_eq!(all.len(), 4);

        let filter = RepoKeyFilter::parse(&["rivers:feature"]).unwrap();
        let some = get_repo_diff(&before, &after, None, &filter).await.unwrap();
        assert_eq!(some.datasets().collect::<Vec<_>>(), vec!["rivers"]);
        assert_eq!(some.len(), 1);

        let none = get_repo_diff(&after, &after, None, &RepoKeyFilter::MatchAll).await.unwrap();
        assert_eq!(none, RepoDiff::new());
    }

    async fn raw_structures(extra: Vec<(String, Option<&[u8]>)>) -> (RepoStructure, RepoStructure) {
        let repo = new_repo().await;
        commit(&repo, &create_table("roads", &[json!({"id": 1, "x": 1})]), "v1").await;
        let v1 = head(&repo).await;
        let mut ops = Vec::new();
        for (path, content) in extra {
            match content {
                Some(bytes) => ops.push(TreeOp::Insert {
                    path,
                    blob: repo.write_blob(bytes).await.unwrap(),
                }),
                None => ops.push(TreeOp::Remove { path }),
            }
        }
        let tree = repo.build_tree(Some(v1.tree()), ops).await.unwrap();
        (v1, RepoStructure::from_tree(repo, tree))
    }

    #[tokio::test]
    async fn test_structural_violations() {
        let codec = PathCodec::new(DatasetFormat::TableV2, "id", Some("INTEGER".into()));
        let record_path = format!("roads/.table-dataset/{}", codec.encode(&json!(1)).unwrap());

        let (v1, v2) = raw_structures(vec![
            (record_path.clone(), None),
            (format!("{}/child", record_path), Some(b"{}".as_slice())),
        ])
        .await;
        let result = get_dataset_diff(&v1, &v2, None, "roads", &DatasetKeyFilter::MatchAll).await;
        assert!(matches!(result, Err(DiffError::StructuralViolation { .. })));

        let (v1, v2) = raw_structures(vec![(
            "roads/.table-dataset/feature/zz/zz/!!!".to_string(),
            Some(b"{}".as_slice()),
        )])
        .await;
        let result = get_dataset_diff(&v1, &v2, None, "roads", &DatasetKeyFilter::MatchAll).await;
        assert!(matches!(result, Err(DiffError::StructuralViolation { .. })));

        // Paths outside the record namespace are ignored.
        let (v1, v2) = raw_structures(vec![(
            "roads/.table-dataset/notes.txt".to_string(),
            Some(b"hi".as_slice()),
        )])
        .await;
        assert!(roads_diff(&v1, &v2).await.is_empty());
    }

    #[tokio::test]
    async fn test_filtered_out_records_are_not_read() {
        let codec = PathCodec::new(DatasetFormat::TableV2, "id", Some("INTEGER".into()));
        let unreadable = format!("roads/.table-dataset/{}", codec.encode(&json!(2)).unwrap());
        let (v1, v2) = raw_structures(vec![(unreadable, Some(b"not json".as_slice()))]).await;

        assert!(get_dataset_diff(&v1, &v2, None, "roads", &DatasetKeyFilter::MatchAll)
            .await
            .is_err());

        let filter = RepoKeyFilter::parse(&["roads:feature:1"]).unwrap();
        let filtered = get_dataset_diff(&v1, &v2, None, "roads", filter.dataset("roads"))
            .await
            .unwrap();
        assert!(filtered.is_empty());
    }
}
