//! Merge subcommands: merge, conflicts and resolve.

use std::path::PathBuf;

use clap::{ArgAction, Args};
use serde::Serialize;
use serde_json::{Value, json};

use crate::cli::args::{read_json_input, write_json, write_stdout};
use crate::cli::{ArgsError, CliError, CommandContext, MERGE_CONFLICT, Result, SUCCESS};
use crate::diff::RepoKeyFilter;
use crate::merge::{
    ConflictNode, FastForwardMode, ListOptions, MergeOptions, MergeOutcome, MergeReport, Resolution,
    SuspendedMerge, Version, conflicts_as_text, list_conflicts, merge, merge_abort, merge_continue,
    resolve_conflict,
};

fn not_merging() -> CliError {
    CliError::InvalidOperation(r#"Repository is not in "merging" state"#.to_string())
}

const MERGING_HELP: &str = "\
Repository is now in \"merging\" state.
View conflicts with `tt conflicts` and resolve them with `tt resolve`.
Once no conflicts remain, complete this merge with `tt merge --continue`.
Or use `tt merge --abort` to return to the previous state.";

// =============================================================================
// Merge
// =============================================================================

/// Arguments for `merge`.
#[derive(Args, Debug)]
pub struct MergeArgs {
    /// The branch or commit to merge into HEAD.
    #[arg(required_unless_present_any = ["continue_merge", "abort"])]
    pub commit: Option<String>,

    /// Complete a merge once every conflict is resolved.
    #[arg(long = "continue", conflicts_with_all = ["commit", "abort", "dry_run"])]
    pub continue_merge: bool,

    /// Abandon the suspended merge.
    #[arg(long, conflicts_with_all = ["commit", "message", "dry_run"])]
    pub abort: bool,

    /// Fast-forward when possible (the default).
    #[arg(long, conflicts_with_all = ["no_ff", "ff_only"])]
    pub ff: bool,

    /// Always create a merge commit.
    #[arg(long = "no-ff", conflicts_with = "ff_only")]
    pub no_ff: bool,

    /// Refuse to merge unless it is a fast-forward.
    #[arg(long = "ff-only")]
    pub ff_only: bool,

    /// Report what would happen without changing the repository.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Message for the merge commit.
    #[arg(short = 'm', long)]
    pub message: Option<String>,
}

impl MergeArgs {
    fn ff_mode(&self, ctx: &CommandContext) -> FastForwardMode {
        if self.ff_only {
            FastForwardMode::Only
        } else if self.no_ff {
            FastForwardMode::Never
        } else if self.ff {
            FastForwardMode::Allow
        } else {
            ctx.config.merge.ff
        }
    }

    pub async fn run(self, ctx: &CommandContext) -> Result<i32> {
        let repo = ctx.open_repo().await?;

        if self.continue_merge {
            let commit =
                merge_continue(&repo, self.message.as_deref(), ctx.author().as_deref(), None).await?;
            if ctx.json {
                write_json(&json!({ "tabletree.merge/v1": { "result": "committed", "commit": commit } }))
                    .await?;
            } else {
                write_stdout(&format!("Merge committed as {}", commit)).await?;
            }
            return Ok(SUCCESS);
        }
        if self.abort {
            merge_abort(&repo, None).await?;
            if !ctx.json {
                write_stdout("Merge aborted").await?;
            }
            return Ok(SUCCESS);
        }

        let theirs = self.commit.clone().ok_or_else(|| {
            CliError::Args(ArgsError::InvalidArgs("a commit to merge is required".to_string()))
        })?;
        let options = MergeOptions {
            ff: self.ff_mode(ctx),
            dry_run: self.dry_run,
            message: self.message.clone(),
            author: ctx.author(),
        };
        let report = merge(&repo, &theirs, &options, None).await?;
        let code = match report.outcome {
            MergeOutcome::Conflicts { .. } => MERGE_CONFLICT,
            _ => SUCCESS,
        };

        if ctx.json {
            write_json(&MergeOutput { merge: &report }).await?;
            return Ok(code);
        }

        let mut out = format!(
            "Merging {} into {}\nCommon ancestor is {}\n",
            report.theirs_label, report.ours_label, report.commits.ancestor
        );
        match &report.outcome {
            MergeOutcome::AlreadyMerged => out.push_str("Already up to date\n"),
            MergeOutcome::FastForward { commit } => {
                if report.dry_run {
                    out.push_str(&format!("Can fast-forward to {}\n(Dry run: not merging)\n", commit));
                } else {
                    out.push_str(&format!("Fast-forwarded to {}\n", commit));
                }
            }
            MergeOutcome::Committed { commit } => {
                out.push_str("No conflicts!\n");
                match commit {
                    Some(commit) => out.push_str(&format!("Merge committed as {}\n", commit)),
                    None => out.push_str("(Dry run: not committing)\n"),
                }
            }
            MergeOutcome::Conflicts { labels } => {
                out.push_str("Conflicts found:\n\n");
                if report.dry_run {
                    out.push_str(&format!("{} conflicts\n", labels.len()));
                    out.push_str("\n(Dry run: not merging)\n");
                } else {
                    let state = SuspendedMerge::load(&repo).await?.ok_or_else(not_merging)?;
                    let summary = list_conflicts(
                        &repo,
                        &state.index,
                        &RepoKeyFilter::MatchAll,
                        ListOptions {
                            summarise: 2,
                            flat: false,
                        },
                    )
                    .await?;
                    out.push_str(&conflicts_as_text(&summary));
                    out.push_str("\n\n");
                    out.push_str(MERGING_HELP);
                }
            }
        }
        write_stdout(&out).await?;
        Ok(code)
    }
}

#[derive(Serialize)]
struct MergeOutput<'a> {
    #[serde(rename = "tabletree.merge/v1")]
    merge: &'a MergeReport,
}

// =============================================================================
// Conflicts
// =============================================================================

/// Arguments for `conflicts`.
#[derive(Args, Debug)]
pub struct ConflictsArgs {
    /// Summarise: `-s` lists labels only, `-ss` lists counts only.
    #[arg(short = 's', long = "summarise", action = ArgAction::Count)]
    pub summarise: u8,

    /// Key every conflict by its full label instead of nesting.
    #[arg(long)]
    pub flat: bool,

    /// Filters: `DATASET`, `DATASET:KIND` or `DATASET:KIND:KEY`.
    pub filters: Vec<String>,
}

#[derive(Serialize)]
struct ConflictsOutput<'a> {
    #[serde(rename = "tabletree.conflicts/v1")]
    conflicts: &'a ConflictNode,
}

impl ConflictsArgs {
    pub async fn run(self, ctx: &CommandContext) -> Result<i32> {
        let repo = ctx.open_repo().await?;
        let state = SuspendedMerge::load(&repo).await?.ok_or_else(not_merging)?;
        let filter = RepoKeyFilter::parse(&self.filters)?;
        let options = ListOptions {
            summarise: self.summarise.min(2),
            flat: self.flat,
        };
        let node = list_conflicts(&repo, &state.index, &filter, options).await?;

        if ctx.json {
            write_json(&ConflictsOutput { conflicts: &node }).await?;
        } else if state.index.unresolved_count() == 0 {
            write_stdout("No conflicts!").await?;
        } else {
            write_stdout(&conflicts_as_text(&node)).await?;
        }
        Ok(SUCCESS)
    }
}

// =============================================================================
// Resolve
// =============================================================================

fn parse_resolution(s: &str) -> std::result::Result<Resolution, String> {
    if s == "delete" {
        return Ok(Resolution::Delete);
    }
    Version::parse(s)
        .map(Resolution::Version)
        .ok_or_else(|| format!("invalid resolution '{}': expected ancestor, ours, theirs or delete", s))
}

/// Arguments for `resolve`.
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Label of the conflict, e.g. `roads:feature:12`.
    pub label: String,

    /// Resolve with one version: ancestor, ours, theirs or delete.
    #[arg(long = "with", value_parser = parse_resolution, required_unless_present = "with_file", conflicts_with = "with_file")]
    pub with: Option<Resolution>,

    /// Resolve with the records in a JSON file: an array of records, or a
    /// single value (`-` reads stdin).
    #[arg(long = "with-file")]
    pub with_file: Option<PathBuf>,
}

impl ResolveArgs {
    pub async fn run(self, ctx: &CommandContext) -> Result<i32> {
        let repo = ctx.open_repo().await?;
        let resolution = match (self.with, self.with_file) {
            (Some(resolution), _) => resolution,
            (None, Some(path)) => match read_json_input(&path).await? {
                Value::Array(records) => Resolution::Records(records),
                value => Resolution::Records(vec![value]),
            },
            (None, None) => {
                return Err(CliError::Args(ArgsError::InvalidArgs(
                    "one of --with or --with-file is required".to_string(),
                )));
            }
        };

        let remaining = resolve_conflict(&repo, &self.label, resolution).await?;
        if ctx.json {
            write_json(&json!({
                "tabletree.resolve/v1": { "resolved": self.label, "remaining": remaining }
            }))
            .await?;
        } else {
            write_stdout(&format!("Resolved 1 conflict. {} conflicts to go.", remaining)).await?;
        }
        Ok(SUCCESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::repo::InitArgs;
    use crate::cli::{GlobalArgs, INVALID_OPERATION, NO_CONFLICT};
    use crate::diff::Delta;
    use crate::merge::{MergeStatus, merge_status};
    use crate::test_fixtures::{commit, commit_on_branch, create_table, feature_diff, kv};
    use tempfile::TempDir;

    fn set_x(x_old: i64, x_new: i64) -> crate::diff::RepoDiff {
        feature_diff(
            "t",
            vec![Delta::Update {
                old: kv(json!({"id": 1, "x": x_old})),
                new: kv(json!({"id": 1, "x": x_new})),
            }],
        )
    }

    fn merge_args(commit: Option<&str>) -> MergeArgs {
        MergeArgs {
            commit: commit.map(str::to_string),
            continue_merge: false,
            abort: false,
            ff: false,
            no_ff: false,
            ff_only: false,
            dry_run: false,
            message: None,
        }
    }

    fn resolve_args(label: &str, with: Resolution) -> ResolveArgs {
        ResolveArgs {
            label: label.to_string(),
            with: Some(with),
            with_file: None,
        }
    }

    #[test]
    fn test_parse_resolution() {
        assert_eq!(parse_resolution("delete").unwrap(), Resolution::Delete);
        assert_eq!(
            parse_resolution("theirs").unwrap(),
            Resolution::Version(Version::Theirs)
        );
        assert!(parse_resolution("mine").is_err());
    }

    #[tokio::test]
    async fn test_conflict_lifecycle_over_filesystem_repo() {
        let dir = TempDir::new().unwrap();
        let config_file = dir.path().join("config.ini");
        std::fs::write(&config_file, "[merge]\nff = false\n").unwrap();
        let ctx = CommandContext::new(&GlobalArgs {
            config_file: Some(config_file),
            repo: Some(dir.path().to_path_buf()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(ctx.config.merge.ff, FastForwardMode::Never);

        InitArgs { branch: "main".to_string() }.run(&ctx).await.unwrap();
        let repo = ctx.open_repo().await.unwrap();
        let base = commit(&repo, &create_table("t", &[json!({"id": 1, "x": 1})]), "base").await;
        let ours = commit(&repo, &set_x(1, 2), "ours").await;
        commit_on_branch(&repo, "other", &base, &set_x(1, 3), "theirs").await;

        let mut dry = merge_args(Some("other"));
        dry.dry_run = true;
        assert_eq!(dry.run(&ctx).await.unwrap(), MERGE_CONFLICT);
        assert_eq!(merge_status(&repo).await.unwrap(), MergeStatus::Clean);

        assert_eq!(merge_args(Some("other")).run(&ctx).await.unwrap(), MERGE_CONFLICT);
        assert_eq!(merge_status(&repo).await.unwrap(), MergeStatus::Merging);

        let conflicts = ConflictsArgs {
            summarise: 1,
            flat: true,
            filters: vec![],
        };
        assert_eq!(conflicts.run(&ctx).await.unwrap(), SUCCESS);

        let err = resolve_args("t:feature:99", Resolution::Version(Version::Ours))
            .run(&ctx)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), NO_CONFLICT);

        let mut cont = merge_args(None);
        cont.continue_merge = true;
        let err = cont.run(&ctx).await.unwrap_err();
        assert_eq!(err.exit_code(), INVALID_OPERATION);

        resolve_args("t:feature:1", Resolution::Version(Version::Theirs))
            .run(&ctx)
            .await
            .unwrap();
        let mut cont = merge_args(None);
        cont.continue_merge = true;
        assert_eq!(cont.run(&ctx).await.unwrap(), SUCCESS);

        let head = repo.head_commit().await.unwrap().unwrap();
        assert_eq!(repo.read_commit(&head).await.unwrap().parents[0], ours);
        assert_eq!(merge_status(&repo).await.unwrap(), MergeStatus::Clean);

        let mut abort = merge_args(None);
        abort.abort = true;
        assert_eq!(abort.run(&ctx).await.unwrap_err().exit_code(), INVALID_OPERATION);
    }
}
