//! The result of merging three trees: the cleanly merged entries, the
//! conflicts, and any resolutions recorded for them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::{ApplyConflict, ApplyConflictReason};
use crate::merge::error::{MergeError, Result};
use crate::merge::types::{Conflict, MergeEntry, MergeStatus};
use crate::repo::{Repo, TreeOp};
use crate::repository::ObjectId;

/// Merged entries plus conflicts keyed by label.
///
/// `entries` never contains the path of a conflict. A conflict is resolved
/// once `resolves` holds an entry for its label; an empty list resolves it by
/// deletion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedIndex {
    pub entries: BTreeMap<String, ObjectId>,
    pub conflicts: BTreeMap<String, Conflict>,
    pub resolves: BTreeMap<String, Vec<MergeEntry>>,
}

impl MergedIndex {
    /// Conflicts with no resolution yet, in label order.
    pub fn unresolved_conflicts(&self) -> impl Iterator<Item = (&String, &Conflict)> {
        self.conflicts
            .iter()
            .filter(|(label, _)| !self.resolves.contains_key(*label))
    }

    pub fn unresolved_labels(&self) -> Vec<String> {
        self.unresolved_conflicts().map(|(l, _)| l.clone()).collect()
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved_conflicts().count()
    }

    pub fn status(&self) -> MergeStatus {
        if self.conflicts.is_empty() {
            MergeStatus::Clean
        } else if self.unresolved_count() == 0 {
            MergeStatus::Resolved
        } else {
            MergeStatus::Merging
        }
    }

    /// Record the resolution of one conflict.
    pub fn add_resolve(&mut self, label: &str, entries: Vec<MergeEntry>) -> Result<()> {
        if !self.conflicts.contains_key(label) {
            return Err(MergeError::NoSuchConflict(label.to_string()));
        }
        if self.resolves.contains_key(label) {
            return Err(MergeError::InvalidOperation(format!(
                "Conflict at {} is already resolved",
                label
            )));
        }
        self.resolves.insert(label.to_string(), entries);
        Ok(())
    }

    /// Build the merged tree from the entries and every resolution.
    ///
    /// Fails with [`MergeError::IncompleteMerge`] while any conflict is
    /// unresolved, and with [`MergeError::PatchDoesNotApply`] if resolved
    /// versions land on a path that is already occupied.
    pub async fn write_resolved_tree(&self, repo: &Repo) -> Result<ObjectId> {
        let remaining = self.unresolved_labels();
        if !remaining.is_empty() {
            return Err(MergeError::IncompleteMerge { remaining });
        }

        let mut entries = self.entries.clone();
        for conflict in self.conflicts.values() {
            for (_, entry) in conflict.versions.iter() {
                if let Some(entry) = entry {
                    entries.remove(&entry.path);
                }
            }
        }

        let mut collisions = Vec::new();
        for (label, resolved) in &self.resolves {
            for entry in resolved {
                if entries.contains_key(&entry.path) {
                    collisions.push(ApplyConflict {
                        label: label.clone(),
                        reason: ApplyConflictReason::InsertExisting,
                    });
                    continue;
                }
                entries.insert(entry.path.clone(), entry.blob.clone());
            }
        }
        if !collisions.is_empty() {
            return Err(MergeError::PatchDoesNotApply(collisions));
        }

        debug!(entries = entries.len(), "writing merged tree");
        let ops = entries
            .into_iter()
            .map(|(path, blob)| TreeOp::Insert { path, blob })
            .collect();
        Ok(repo.build_tree(None, ops).await?)
    }
}
