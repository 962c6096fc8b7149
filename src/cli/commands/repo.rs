//! Repository subcommands: init, log, branch, checkout and status.

use clap::Args;
use serde_json::json;

use crate::cli::args::{write_json, write_stdout};
use crate::cli::{CliError, CommandContext, Result, SUCCESS};
use crate::merge::{MergeStatus, SuspendedMerge};
use crate::repo::{Head, RepoInitialize};

// =============================================================================
// Init
// =============================================================================

/// Arguments for `init`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Name of the initial branch.
    #[arg(short = 'b', long, default_value = "main")]
    pub branch: String,
}

impl InitArgs {
    pub async fn run(self, ctx: &CommandContext) -> Result<i32> {
        let repo = ctx.repo_handle();
        let commit = repo
            .initialize(RepoInitialize {
                default_branch_name: self.branch.clone(),
            })
            .await?;

        if ctx.json {
            write_json(&json!({
                "tabletree.init/v1": {
                    "path": ctx.store_path(),
                    "branch": self.branch,
                    "commit": commit,
                }
            }))
            .await?;
        } else {
            write_stdout(&format!(
                "Initialized empty tabletree repository in {}",
                ctx.store_path().display()
            ))
            .await?;
        }
        Ok(SUCCESS)
    }
}

// =============================================================================
// Log
// =============================================================================

/// Arguments for `log`.
#[derive(Args, Debug)]
pub struct LogArgs {
    /// Commit to start from.
    #[arg(default_value = "HEAD")]
    pub commit: String,

    /// Show at most this many commits.
    #[arg(short = 'n', long = "max-count")]
    pub max_count: Option<usize>,
}

impl LogArgs {
    pub async fn run(self, ctx: &CommandContext) -> Result<i32> {
        let repo = ctx.open_repo().await?;
        let start = repo.resolve_commitish(&self.commit).await?;
        let entries = repo.log(&start, self.max_count).await?;

        if ctx.json {
            let commits: Vec<_> = entries
                .iter()
                .map(|(id, commit)| {
                    let metadata = commit.metadata.clone().unwrap_or_default();
                    json!({
                        "commit": id,
                        "parents": commit.parents,
                        "author": metadata.author,
                        "timestamp": metadata.timestamp,
                        "message": commit.message(),
                    })
                })
                .collect();
            write_json(&json!({ "tabletree.log/v1": commits })).await?;
            return Ok(SUCCESS);
        }

        let mut out = String::new();
        for (id, commit) in &entries {
            out.push_str(&format!("commit {}\n", id));
            if commit.parents.len() > 1 {
                out.push_str(&format!("Merge: {}\n", commit.parents.join(" ")));
            }
            if let Some(metadata) = &commit.metadata {
                if let Some(author) = &metadata.author {
                    out.push_str(&format!("Author: {}\n", author));
                }
                if let Some(timestamp) = &metadata.timestamp {
                    out.push_str(&format!("Date:   {}\n", timestamp));
                }
            }
            out.push('\n');
            for line in commit.message().lines() {
                out.push_str(&format!("    {}\n", line));
            }
            out.push('\n');
        }
        write_stdout(&out).await?;
        Ok(SUCCESS)
    }
}

// =============================================================================
// Branch / Checkout
// =============================================================================

/// Arguments for `branch`.
#[derive(Args, Debug)]
pub struct BranchArgs {
    /// Branch to create. Lists branches when omitted.
    pub name: Option<String>,

    /// Commit the new branch starts at. Defaults to HEAD.
    #[arg(long, requires = "name")]
    pub start: Option<String>,
}

impl BranchArgs {
    pub async fn run(self, ctx: &CommandContext) -> Result<i32> {
        let repo = ctx.open_repo().await?;

        if let Some(name) = self.name {
            let start = repo
                .resolve_commitish(self.start.as_deref().unwrap_or("HEAD"))
                .await?;
            repo.create_branch(&name, &start).await?;
            if ctx.json {
                write_json(&json!({ "tabletree.branch/v1": { "created": name, "commit": start } }))
                    .await?;
            } else {
                write_stdout(&format!("Created branch {} at {}", name, start)).await?;
            }
            return Ok(SUCCESS);
        }

        let current = repo.head_branch().await?;
        let branches = repo.branches().await?;
        if ctx.json {
            let listed: serde_json::Map<_, _> = branches
                .iter()
                .map(|(name, commit)| (name.clone(), json!(commit)))
                .collect();
            write_json(&json!({
                "tabletree.branch/v1": { "current": current, "branches": listed }
            }))
            .await?;
        } else {
            let mut out = String::new();
            for (name, commit) in &branches {
                let marker = if current.as_deref() == Some(name.as_str()) { '*' } else { ' ' };
                out.push_str(&format!("{} {} {}\n", marker, name, commit));
            }
            write_stdout(&out).await?;
        }
        Ok(SUCCESS)
    }
}

/// Arguments for `checkout`.
#[derive(Args, Debug)]
pub struct CheckoutArgs {
    /// Branch to switch to.
    pub branch: String,
}

impl CheckoutArgs {
    pub async fn run(self, ctx: &CommandContext) -> Result<i32> {
        let repo = ctx.open_repo().await?;
        if crate::merge::merge_status(&repo).await? != MergeStatus::Clean {
            return Err(CliError::InvalidOperation(
                r#"Repository is in "merging" state. Complete or abort the merge first."#
                    .to_string(),
            ));
        }
        repo.checkout_branch(&self.branch).await?;
        if !ctx.json {
            write_stdout(&format!("Switched to branch {}", self.branch)).await?;
        }
        Ok(SUCCESS)
    }
}

// =============================================================================
// Status
// =============================================================================

/// Arguments for `status`.
#[derive(Args, Debug)]
pub struct StatusArgs {}

impl StatusArgs {
    pub async fn run(self, ctx: &CommandContext) -> Result<i32> {
        let repo = ctx.open_repo().await?;
        let head = repo.head().await?;
        let commit = repo.head_commit().await?;
        let merge = SuspendedMerge::load(&repo).await?;

        if ctx.json {
            let (branch, detached) = match &head {
                Head::Branch(name) => (Some(name.clone()), false),
                Head::Detached(_) => (None, true),
            };
            let merging = merge.as_ref().map(|state| {
                json!({
                    "mergeId": state.merge_id,
                    "ancestor": state.commits.ancestor,
                    "ours": state.commits.ours,
                    "theirs": state.commits.theirs,
                    "theirsLabel": state.theirs_label,
                    "status": state.index.status(),
                    "unresolved": state.index.unresolved_count(),
                })
            });
            write_json(&json!({
                "tabletree.status/v1": {
                    "branch": branch,
                    "detached": detached,
                    "commit": commit,
                    "merging": merging,
                }
            }))
            .await?;
            return Ok(SUCCESS);
        }

        let mut out = match &head {
            Head::Branch(name) => format!("On branch {}\n", name),
            Head::Detached(id) => format!("HEAD detached at {}\n", id),
        };
        if let Some(state) = merge {
            out.push_str("\nRepository is in \"merging\" state.\n");
            out.push_str(&format!(
                "Merging {} into {}\n",
                state.theirs_label, state.commits.ours
            ));
            match state.index.unresolved_count() {
                0 => out.push_str(
                    "All conflicts are resolved. Complete this merge with `tt merge --continue`.\n",
                ),
                n => out.push_str(&format!(
                    "{} conflicts remain. View them with `tt conflicts`.\n",
                    n
                )),
            }
        }
        write_stdout(&out).await?;
        Ok(SUCCESS)
    }
}
