//! An in-memory working copy that records edits per item.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use super::{Result, WorkingCopy};
use crate::dataset::{Dataset, ItemKind, RepoStructure};
use crate::diff::{DatasetDiff, DatasetKeyFilter, Delta, KeyValue};
use crate::repo::Repo;
use crate::repository::ObjectId;

/// Edited item values by dataset, kind and identity. `None` is a deletion.
type Edits = BTreeMap<String, BTreeMap<ItemKind, BTreeMap<String, Option<Value>>>>;

struct State {
    base_tree: Option<ObjectId>,
    edits: Edits,
}

/// A working copy held entirely in memory.
///
/// Only edited items are tracked; everything else reads through to the base
/// tree. An edit that restores the stored value produces no delta and does
/// not make the working copy dirty.
pub struct MemoryWorkingCopy {
    repo: Arc<Repo>,
    state: Mutex<State>,
}

impl MemoryWorkingCopy {
    pub fn new(repo: Arc<Repo>, base_tree: Option<ObjectId>) -> Self {
        Self {
            repo,
            state: Mutex::new(State {
                base_tree,
                edits: BTreeMap::new(),
            }),
        }
    }

    /// Set an item's value.
    pub fn set_item(&self, ds_path: &str, kind: ItemKind, key: &str, value: Value) {
        self.edit(ds_path, kind, key, Some(value));
    }

    /// Delete an item.
    pub fn delete_item(&self, ds_path: &str, kind: ItemKind, key: &str) {
        self.edit(ds_path, kind, key, None);
    }

    fn edit(&self, ds_path: &str, kind: ItemKind, key: &str, value: Option<Value>) {
        let mut state = self.state.lock().unwrap();
        state
            .edits
            .entry(ds_path.to_string())
            .or_default()
            .entry(kind)
            .or_default()
            .insert(key.to_string(), value);
    }
}

#[async_trait]
impl WorkingCopy for MemoryWorkingCopy {
    async fn base_tree(&self) -> Result<Option<ObjectId>> {
        Ok(self.state.lock().unwrap().base_tree.clone())
    }

    async fn diff_against_tree(
        &self,
        ds_path: &str,
        dataset: Option<&Dataset>,
        filter: &DatasetKeyFilter,
    ) -> Result<DatasetDiff> {
        // Snapshot the edits so no lock is held across awaits.
        let edits = match self.state.lock().unwrap().edits.get(ds_path) {
            Some(edits) => edits.clone(),
            None => return Ok(DatasetDiff::new()),
        };

        let mut diff = DatasetDiff::new();
        for (kind, items) in edits {
            for (key, edited) in items {
                if !filter.matches(kind, &key) {
                    continue;
                }
                let stored = match dataset {
                    Some(ds) => ds.get_item(kind, &key).await?,
                    None => None,
                };
                if stored == edited {
                    continue;
                }
                let old = stored.map(|v| KeyValue::new(key.clone(), v));
                let new = edited.map(|v| KeyValue::new(key.clone(), v));
                if let Some(delta) = Delta::from_sides(old, new) {
                    diff.entry(kind).add_delta(delta);
                }
            }
        }
        diff.prune();
        Ok(diff)
    }

    async fn is_dirty(&self) -> Result<bool> {
        let (base_tree, ds_paths) = {
            let state = self.state.lock().unwrap();
            (state.base_tree.clone(), state.edits.keys().cloned().collect::<Vec<_>>())
        };
        let structure = base_tree.map(|tree| RepoStructure::from_tree(self.repo.clone(), tree));
        for ds_path in ds_paths {
            let dataset = match &structure {
                Some(structure) => structure.get_dataset(&ds_path).await?,
                None => None,
            };
            let diff = self
                .diff_against_tree(&ds_path, dataset.as_deref(), &DatasetKeyFilter::MatchAll)
                .await?;
            if !diff.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn reset(&self, tree: &ObjectId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.base_tree = Some(tree.clone());
        state.edits.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{commit, create_table, head, new_repo};
    use serde_json::json;

    #[tokio::test]
    async fn test_dirty_only_when_edits_differ() {
        let repo = new_repo().await;
        commit(&repo, &create_table("t", &[json!({"id": 1, "x": 2})]), "base").await;
        let tree = head(&repo).await.tree().clone();

        let wc = MemoryWorkingCopy::new(repo.clone(), Some(tree.clone()));
        assert!(!wc.is_dirty().await.unwrap());

        wc.set_item("t", ItemKind::Feature, "1", json!({"id": 1, "x": 2}));
        assert!(!wc.is_dirty().await.unwrap());

        wc.delete_item("t", ItemKind::Feature, "1");
        assert!(wc.is_dirty().await.unwrap());

        wc.reset(&tree).await.unwrap();
        assert!(!wc.is_dirty().await.unwrap());
        wc.set_item("new", ItemKind::Feature, "1", json!({"id": 1}));
        assert!(wc.is_dirty().await.unwrap());
    }
}
