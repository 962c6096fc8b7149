//! Merging commits: fast-forward detection, merge commits, and the
//! continue/abort lifecycle of a merge suspended on conflicts.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::merge::error::{MergeError, Result};
use crate::merge::merge_state::SuspendedMerge;
use crate::merge::merge_trees::merge_trees;
use crate::merge::types::{AncestorOursTheirs, MergeStatus};
use crate::repo::{Repo, branch_ref_name};
use crate::repository::ObjectId;
use crate::working_copy::WorkingCopy;

// =============================================================================
// Options / Results
// =============================================================================

/// When a merge may fast-forward instead of creating a merge commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FastForwardMode {
    /// Fast-forward when possible.
    #[default]
    Allow,
    /// Always create a merge commit.
    Never,
    /// Refuse anything but a fast-forward.
    Only,
}

impl FastForwardMode {
    /// Parse a configuration value: `true`, `false` or `only`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "allow" => Some(FastForwardMode::Allow),
            "false" | "no" | "never" => Some(FastForwardMode::Never),
            "only" => Some(FastForwardMode::Only),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub ff: FastForwardMode,
    /// Compute the outcome without moving `HEAD` or saving merge state.
    pub dry_run: bool,
    pub message: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum MergeOutcome {
    /// `theirs` is already reachable from `ours`.
    AlreadyMerged,
    FastForward { commit: ObjectId },
    /// A clean merge. `commit` is `None` for a dry run.
    Committed { commit: Option<ObjectId> },
    /// The merge stopped on conflicts, listed by label.
    Conflicts { labels: Vec<String> },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub commits: AncestorOursTheirs<ObjectId>,
    pub ours_label: String,
    pub theirs_label: String,
    pub dry_run: bool,
    #[serde(flatten)]
    pub outcome: MergeOutcome,
}

fn not_merging() -> MergeError {
    MergeError::InvalidOperation(r#"Repository is not in "merging" state"#.to_string())
}

async fn reset_working_copy(
    repo: &Repo,
    working_copy: Option<&dyn WorkingCopy>,
    commit: &ObjectId,
) -> Result<()> {
    if let Some(wc) = working_copy {
        let tree = repo.read_commit(commit).await?.tree;
        wc.reset(&tree).await?;
    }
    Ok(())
}

// =============================================================================
// merge
// =============================================================================

/// Merge the commit named by `theirs` into `HEAD`.
///
/// Fast-forwards when `HEAD` is the merge base (unless disabled), commits a
/// clean three-way merge, or saves a [`SuspendedMerge`] when conflicts
/// remain. Nothing is written for a dry run.
pub async fn merge(
    repo: &Arc<Repo>,
    theirs: &str,
    options: &MergeOptions,
    working_copy: Option<&dyn WorkingCopy>,
) -> Result<MergeReport> {
    if SuspendedMerge::load(repo).await?.is_some() {
        return Err(MergeError::InvalidOperation(
            "A merge is already ongoing; complete it with --continue or cancel it with --abort"
                .to_string(),
        ));
    }
    if let Some(wc) = working_copy
        && wc.is_dirty().await?
    {
        return Err(MergeError::InvalidOperation(
            "You have uncommitted changes in your working copy. Commit these first.".to_string(),
        ));
    }

    let ours = repo
        .head_commit()
        .await?
        .ok_or_else(|| MergeError::InvalidOperation("HEAD has no commit to merge into".to_string()))?;
    let theirs_id = repo.resolve_commitish(theirs).await?;
    let ours_label = repo.head_branch().await?.unwrap_or_else(|| ours.clone());
    let theirs_is_branch = repo
        .read_ref(&branch_ref_name(theirs))
        .await
        .ok()
        .flatten()
        .is_some();
    let message = options.message.clone().unwrap_or_else(|| {
        if theirs_is_branch {
            format!("Merge branch \"{}\" into {}", theirs, ours_label)
        } else {
            format!("Merge {} into {}", theirs_id, ours_label)
        }
    });

    let ancestor = repo.merge_base(&ours, &theirs_id).await?.ok_or_else(|| {
        MergeError::InvalidOperation(format!("Can't merge {}: no common ancestor", theirs))
    })?;
    let commits = AncestorOursTheirs::new(ancestor, ours, theirs_id);
    let report = |outcome| MergeReport {
        commits: commits.clone(),
        ours_label: ours_label.clone(),
        theirs_label: theirs.to_string(),
        dry_run: options.dry_run,
        outcome,
    };

    if commits.ancestor == commits.theirs {
        return Ok(report(MergeOutcome::AlreadyMerged));
    }

    if commits.ancestor == commits.ours && options.ff != FastForwardMode::Never {
        if !options.dry_run {
            repo.update_head(Some(&commits.ours), &commits.theirs).await?;
            reset_working_copy(repo, working_copy, &commits.theirs).await?;
            info!(commit = %commits.theirs, "fast-forwarded");
        }
        return Ok(report(MergeOutcome::FastForward {
            commit: commits.theirs.clone(),
        }));
    }
    if options.ff == FastForwardMode::Only {
        return Err(MergeError::InvalidOperation(
            "Can't resolve as a fast-forward merge and --ff-only specified".to_string(),
        ));
    }

    let trees = AncestorOursTheirs::new(
        repo.read_commit(&commits.ancestor).await?.tree,
        repo.read_commit(&commits.ours).await?.tree,
        repo.read_commit(&commits.theirs).await?.tree,
    );
    let index = merge_trees(repo, &trees).await?;

    if index.conflicts.is_empty() {
        if options.dry_run {
            return Ok(report(MergeOutcome::Committed { commit: None }));
        }
        let tree = index.write_resolved_tree(repo).await?;
        let commit = repo
            .create_commit(
                &tree,
                vec![commits.ours.clone(), commits.theirs.clone()],
                &message,
                options.author.as_deref(),
            )
            .await?;
        repo.update_head(Some(&commits.ours), &commit).await?;
        reset_working_copy(repo, working_copy, &commit).await?;
        info!(commit = %commit, "merge committed");
        return Ok(report(MergeOutcome::Committed {
            commit: Some(commit),
        }));
    }

    let labels: Vec<String> = index.conflicts.keys().cloned().collect();
    if !options.dry_run {
        let mut state = SuspendedMerge::new(commits.clone(), theirs, message, index);
        state.save(repo).await?;
        info!(merge_id = %state.merge_id, conflicts = labels.len(), "merge suspended on conflicts");
    }
    Ok(report(MergeOutcome::Conflicts { labels }))
}

// =============================================================================
// continue / abort / status
// =============================================================================

/// Commit a suspended merge once every conflict is resolved.
pub async fn merge_continue(
    repo: &Arc<Repo>,
    message: Option<&str>,
    author: Option<&str>,
    working_copy: Option<&dyn WorkingCopy>,
) -> Result<ObjectId> {
    let state = SuspendedMerge::load(repo).await?.ok_or_else(not_merging)?;
    let remaining = state.index.unresolved_labels();
    if !remaining.is_empty() {
        return Err(MergeError::IncompleteMerge { remaining });
    }
    let ours = &state.commits.ours;
    if repo.head_commit().await?.as_ref() != Some(ours) {
        return Err(MergeError::InvalidOperation(
            "HEAD has moved since the merge started".to_string(),
        ));
    }

    let tree = state.index.write_resolved_tree(repo).await?;
    let commit = repo
        .create_commit(
            &tree,
            vec![ours.clone(), state.commits.theirs.clone()],
            message.unwrap_or(&state.message),
            author,
        )
        .await?;
    repo.update_head(Some(ours), &commit).await?;
    state.clear(repo).await?;
    reset_working_copy(repo, working_copy, &commit).await?;
    info!(merge_id = %state.merge_id, commit = %commit, "merge committed");
    Ok(commit)
}

/// Abandon a suspended merge. `HEAD` is left where it was.
pub async fn merge_abort(repo: &Arc<Repo>, working_copy: Option<&dyn WorkingCopy>) -> Result<()> {
    let state = SuspendedMerge::load(repo).await?.ok_or_else(not_merging)?;
    state.clear(repo).await?;
    reset_working_copy(repo, working_copy, &state.commits.ours).await?;
    info!(merge_id = %state.merge_id, "merge aborted");
    Ok(())
}

/// The state of the current merge: [`MergeStatus::Clean`] when none is in
/// progress.
pub async fn merge_status(repo: &Arc<Repo>) -> Result<MergeStatus> {
    Ok(match SuspendedMerge::load(repo).await? {
        Some(state) => state.index.status(),
        None => MergeStatus::Clean,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ItemKind;
    use crate::diff::{Delta, RepoDiff};
    use crate::merge::resolve::{Resolution, resolve_conflict};
    use crate::merge::types::Version;
    use crate::test_fixtures::{commit, commit_on_branch, create_table, feature_diff, head, kv, new_repo};
    use crate::working_copy::MemoryWorkingCopy;
    use serde_json::json;

    fn set_x(id: i64, old_x: i64, new_x: i64) -> RepoDiff {
        feature_diff(
            "t",
            vec![Delta::Update {
                old: kv(json!({"id": id, "x": old_x})),
                new: kv(json!({"id": id, "x": new_x})),
            }],
        )
    }

    /// A repo where `main` set x=2 and `other` set x=3 on record 1.
    async fn diverged() -> (Arc<Repo>, ObjectId, ObjectId) {
        let repo = new_repo().await;
        let base = commit(&repo, &create_table("t", &[json!({"id": 1, "x": 1})]), "base").await;
        let ours = commit(&repo, &set_x(1, 1, 2), "ours").await;
        let theirs = commit_on_branch(&repo, "other", &base, &set_x(1, 1, 3), "theirs").await;
        (repo, ours, theirs)
    }

    async fn record(repo: &Arc<Repo>, id: i64) -> Option<serde_json::Value> {
        let ds = head(repo).await.get_dataset("t").await.unwrap().unwrap();
        ds.get_record(&json!(id)).await.unwrap()
    }

    #[tokio::test]
    async fn test_fast_forward_and_already_merged() {
        let repo = new_repo().await;
        let base = commit(&repo, &create_table("t", &[json!({"id": 1, "x": 1})]), "base").await;
        let theirs = commit_on_branch(&repo, "other", &base, &set_x(1, 1, 5), "theirs").await;

        let only = MergeOptions {
            ff: FastForwardMode::Only,
            ..Default::default()
        };
        let report = merge(&repo, "other", &only, None).await.unwrap();
        assert_eq!(report.outcome, MergeOutcome::FastForward { commit: theirs.clone() });
        assert_eq!(repo.head_commit().await.unwrap(), Some(theirs));
        assert_eq!(record(&repo, 1).await, Some(json!({"id": 1, "x": 5})));

        let again = merge(&repo, "other", &MergeOptions::default(), None).await.unwrap();
        assert_eq!(again.outcome, MergeOutcome::AlreadyMerged);
    }

    #[tokio::test]
    async fn test_no_ff_creates_merge_commit() {
        let repo = new_repo().await;
        let base = commit(&repo, &create_table("t", &[json!({"id": 1, "x": 1})]), "base").await;
        let theirs = commit_on_branch(&repo, "other", &base, &set_x(1, 1, 5), "theirs").await;

        let options = MergeOptions {
            ff: FastForwardMode::Never,
            ..Default::default()
        };
        let report = merge(&repo, "other", &options, None).await.unwrap();
        let MergeOutcome::Committed { commit: Some(merged) } = report.outcome else {
            panic!("expected a merge commit, got {:?}", report.outcome);
        };
        let commit = repo.read_commit(&merged).await.unwrap();
        assert_eq!(commit.parents, vec![base, theirs]);
        assert_eq!(commit.message(), "Merge branch \"other\" into main");
    }

    #[tokio::test]
    async fn test_clean_three_way_merge() {
        let repo = new_repo().await;
        let records = [json!({"id": 1, "x": 1}), json!({"id": 2, "x": 1})];
        let base = commit(&repo, &create_table("t", &records), "base").await;
        commit(&repo, &set_x(1, 1, 2), "ours").await;
        commit_on_branch(&repo, "other", &base, &set_x(2, 1, 3), "theirs").await;

        let dry = MergeOptions {
            dry_run: true,
            ..Default::default()
        };
        let before = repo.head_commit().await.unwrap();
        let report = merge(&repo, "other", &dry, None).await.unwrap();
        assert_eq!(report.outcome, MergeOutcome::Committed { commit: None });
        assert_eq!(repo.head_commit().await.unwrap(), before);

        merge(&repo, "other", &MergeOptions::default(), None).await.unwrap();
        assert_eq!(record(&repo, 1).await, Some(json!({"id": 1, "x": 2})));
        assert_eq!(record(&repo, 2).await, Some(json!({"id": 2, "x": 3})));
        assert_eq!(merge_status(&repo).await.unwrap(), MergeStatus::Clean);
    }

    #[tokio::test]
    async fn test_conflict_resolve_continue() {
        let (repo, ours, theirs) = diverged().await;

        let report = merge(&repo, "other", &MergeOptions::default(), None).await.unwrap();
        assert_eq!(
            report.outcome,
            MergeOutcome::Conflicts {
                labels: vec!["t:feature:1".to_string()]
            }
        );
        assert_eq!(repo.head_commit().await.unwrap(), Some(ours.clone()));
        assert_eq!(merge_status(&repo).await.unwrap(), MergeStatus::Merging);

        assert!(matches!(
            merge(&repo, "other", &MergeOptions::default(), None).await,
            Err(MergeError::InvalidOperation(_))
        ));
        assert!(matches!(
            merge_continue(&repo, None, None, None).await,
            Err(MergeError::IncompleteMerge { .. })
        ));

        let remaining = resolve_conflict(
            &repo,
            "t:feature:1",
            Resolution::Records(vec![json!({"id": 1, "x": 9})]),
        )
        .await
        .unwrap();
        assert_eq!(remaining, 0);
        assert_eq!(merge_status(&repo).await.unwrap(), MergeStatus::Resolved);

        let merged = merge_continue(&repo, None, Some("tester"), None).await.unwrap();
        let commit = repo.read_commit(&merged).await.unwrap();
        assert_eq!(commit.parents, vec![ours, theirs]);
        assert_eq!(record(&repo, 1).await, Some(json!({"id": 1, "x": 9})));
        assert_eq!(merge_status(&repo).await.unwrap(), MergeStatus::Clean);
    }

    #[tokio::test]
    async fn test_abort_restores_clean_state() {
        let (repo, ours, _) = diverged().await;
        merge(&repo, "other", &MergeOptions::default(), None).await.unwrap();
        resolve_conflict(&repo, "t:feature:1", Resolution::Version(Version::Theirs))
            .await
            .unwrap();

        merge_abort(&repo, None).await.unwrap();
        assert_eq!(merge_status(&repo).await.unwrap(), MergeStatus::Clean);
        assert_eq!(repo.head_commit().await.unwrap(), Some(ours));
        assert_eq!(record(&repo, 1).await, Some(json!({"id": 1, "x": 2})));
        assert!(matches!(merge_abort(&repo, None).await, Err(MergeError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn test_dirty_working_copy_blocks_merge() {
        let (repo, ours, _) = diverged().await;
        let tree = repo.read_commit(&ours).await.unwrap().tree;
        let wc = MemoryWorkingCopy::new(repo.clone(), Some(tree));
        wc.set_item("t", ItemKind::Feature, "1", json!({"id": 1, "x": 100}));

        assert!(matches!(
            merge(&repo, "other", &MergeOptions::default(), Some(&wc)).await,
            Err(MergeError::InvalidOperation(_))
        ));
        assert_eq!(merge_status(&repo).await.unwrap(), MergeStatus::Clean);
    }

    #[tokio::test]
    async fn test_unchanged_edit_does_not_block_merge() {
        let (repo, ours, _) = diverged().await;
        let tree = repo.read_commit(&ours).await.unwrap().tree;
        let wc = MemoryWorkingCopy::new(repo.clone(), Some(tree));
        wc.set_item("t", ItemKind::Feature, "1", json!({"id": 1, "x": 2}));

        let report = merge(&repo, "other", &MergeOptions::default(), Some(&wc)).await.unwrap();
        assert_eq!(
            report.outcome,
            MergeOutcome::Conflicts {
                labels: vec!["t:feature:1".to_string()]
            }
        );
    }

    #[test]
    fn test_fast_forward_mode_parse() {
        assert_eq!(FastForwardMode::parse("only"), Some(FastForwardMode::Only));
        assert_eq!(FastForwardMode::parse("False"), Some(FastForwardMode::Never));
        assert_eq!(FastForwardMode::parse("sometimes"), None);
    }
}
