//! Persistence of a suspended merge.
//!
//! A merge with conflicts is saved as a `MergeState` record whose entries,
//! conflicts and resolutions are separate canonical JSON blobs. The
//! `MERGE_STATE` reference points at the record and is only ever moved with
//! a compare-and-swap, so concurrent resolvers cannot overwrite each other.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::merge::error::{MergeError, Result};
use crate::merge::merged_index::MergedIndex;
use crate::merge::types::AncestorOursTheirs;
use crate::repo::{Repo, RepoError};
use crate::repository::{ObjectId, from_json, to_canonical_json};

/// The reference holding the current suspended merge, if any.
pub const MERGE_STATE_REF: &str = "MERGE_STATE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum MergeStateType {
    MergeState,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergeStateRecord {
    #[serde(rename = "type")]
    type_tag: MergeStateType,
    merge_id: Uuid,
    ancestor: ObjectId,
    ours: ObjectId,
    theirs: ObjectId,
    theirs_label: String,
    message: String,
    entries: ObjectId,
    conflicts: ObjectId,
    resolves: ObjectId,
}

/// A merge waiting for its conflicts to be resolved.
#[derive(Debug, Clone)]
pub struct SuspendedMerge {
    pub merge_id: Uuid,
    /// The ancestor, ours and theirs commits.
    pub commits: AncestorOursTheirs<ObjectId>,
    /// How the merged commit was named on the command line.
    pub theirs_label: String,
    /// The default message for the merge commit.
    pub message: String,
    pub index: MergedIndex,
    /// The record `MERGE_STATE` pointed at when this was loaded or saved.
    state_id: Option<ObjectId>,
}

async fn write_part<T: Serialize>(repo: &Repo, value: &T) -> Result<ObjectId> {
    Ok(repo.write_blob(&to_canonical_json(value)?).await?)
}

async fn read_part<T: DeserializeOwned>(repo: &Repo, id: &ObjectId) -> Result<T> {
    Ok(from_json(&repo.read_blob(id).await?)?)
}

impl SuspendedMerge {
    pub fn new(
        commits: AncestorOursTheirs<ObjectId>,
        theirs_label: impl Into<String>,
        message: impl Into<String>,
        index: MergedIndex,
    ) -> Self {
        Self {
            merge_id: Uuid::new_v4(),
            commits,
            theirs_label: theirs_label.into(),
            message: message.into(),
            index,
            state_id: None,
        }
    }

    /// Load the suspended merge, if the repository is in the merging state.
    pub async fn load(repo: &Arc<Repo>) -> Result<Option<Self>> {
        let Some(state_id) = repo.read_ref(MERGE_STATE_REF).await? else {
            return Ok(None);
        };
        let record: MergeStateRecord = read_part(repo, &state_id).await?;
        let entries: BTreeMap<String, ObjectId> = read_part(repo, &record.entries).await?;
        let conflicts = read_part(repo, &record.conflicts).await?;
        let resolves = read_part(repo, &record.resolves).await?;
        debug!(merge_id = %record.merge_id, "loaded suspended merge");
        Ok(Some(Self {
            merge_id: record.merge_id,
            commits: AncestorOursTheirs::new(record.ancestor, record.ours, record.theirs),
            theirs_label: record.theirs_label,
            message: record.message,
            index: MergedIndex {
                entries,
                conflicts,
                resolves,
            },
            state_id: Some(state_id),
        }))
    }

    /// Persist the merge, replacing the state it was loaded from.
    ///
    /// Fails with [`MergeError::InvalidOperation`] if the stored state
    /// changed since this merge was loaded.
    pub async fn save(&mut self, repo: &Arc<Repo>) -> Result<()> {
        let record = MergeStateRecord {
            type_tag: MergeStateType::MergeState,
            merge_id: self.merge_id,
            ancestor: self.commits.ancestor.clone(),
            ours: self.commits.ours.clone(),
            theirs: self.commits.theirs.clone(),
            theirs_label: self.theirs_label.clone(),
            message: self.message.clone(),
            entries: write_part(repo, &self.index.entries).await?,
            conflicts: write_part(repo, &self.index.conflicts).await?,
            resolves: write_part(repo, &self.index.resolves).await?,
        };
        let new_id = write_part(repo, &record).await?;
        repo.swap_ref(MERGE_STATE_REF, self.state_id.as_deref(), Some(new_id.as_str()))
            .await
            .map_err(concurrent_change)?;
        debug!(merge_id = %self.merge_id, state = %new_id, "saved suspended merge");
        self.state_id = Some(new_id);
        Ok(())
    }

    /// Leave the merging state.
    pub async fn clear(&self, repo: &Arc<Repo>) -> Result<()> {
        repo.swap_ref(MERGE_STATE_REF, self.state_id.as_deref(), None)
            .await
            .map_err(concurrent_change)
    }
}

fn concurrent_change(e: RepoError) -> MergeError {
    match e {
        RepoError::RefChanged { .. } => {
            MergeError::InvalidOperation("the merge state was changed concurrently".to_string())
        }
        other => MergeError::Repo(other),
    }
}
