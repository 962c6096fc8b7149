//! Shared fixtures for unit tests: in-memory repositories with table datasets
//! committed through the regular apply path.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::backend::MemoryBackend;
use crate::caches::NoopCache;
use crate::dataset::{DatasetFormat, ItemKind, RepoStructure, SCHEMA_META_ITEM};
use crate::diff::{Delta, KeyValue, RepoDiff};
use crate::repo::{Repo, RepoInitialize};
use crate::repository::ObjectId;

pub fn schema() -> Value {
    json!([
        {"name": "id", "dataType": "INTEGER", "primaryKeyIndex": 0},
        {"name": "x", "dataType": "INTEGER"},
    ])
}

/// A record side keyed by its `id` field.
pub fn kv(record: Value) -> KeyValue {
    let key = record["id"].to_string();
    KeyValue::new(key, record)
}

pub async fn new_repo() -> Arc<Repo> {
    let repo = Arc::new(Repo::new(MemoryBackend::new(), NoopCache));
    repo.initialize(RepoInitialize::default()).await.unwrap();
    repo
}

pub async fn head(repo: &Arc<Repo>) -> RepoStructure {
    RepoStructure::lookup(repo.clone(), "HEAD").await.unwrap()
}

/// A diff creating a table dataset with the fixture schema and `records`.
pub fn create_table(ds: &str, records: &[Value]) -> RepoDiff {
    let mut diff = RepoDiff::new();
    let ds_diff = diff.entry(ds);
    ds_diff
        .entry(ItemKind::Meta)
        .add_delta(Delta::Insert(KeyValue::new(SCHEMA_META_ITEM, schema())));
    for record in records {
        ds_diff
            .entry(ItemKind::Feature)
            .add_delta(Delta::Insert(kv(record.clone())));
    }
    diff
}

/// A diff holding the given feature deltas for one dataset.
pub fn feature_diff(ds: &str, deltas: Vec<Delta>) -> RepoDiff {
    let mut diff = RepoDiff::new();
    for delta in deltas {
        diff.entry(ds).entry(ItemKind::Feature).add_delta(delta);
    }
    diff
}

/// Commit a diff on top of `HEAD`.
pub async fn commit(repo: &Arc<Repo>, diff: &RepoDiff, message: &str) -> ObjectId {
    head(repo)
        .await
        .commit_diff(diff, message, None, DatasetFormat::TableV2)
        .await
        .unwrap()
}

/// Commit `diff` on a new branch created at `start`, leaving `HEAD` on the
/// current branch.
pub async fn commit_on_branch(
    repo: &Arc<Repo>,
    branch: &str,
    start: &ObjectId,
    diff: &RepoDiff,
    message: &str,
) -> ObjectId {
    let current = repo.head_branch().await.unwrap().unwrap();
    repo.create_branch(branch, start).await.unwrap();
    repo.checkout_branch(branch).await.unwrap();
    let id = commit(repo, diff, message).await;
    repo.checkout_branch(&current).await.unwrap();
    id
}
