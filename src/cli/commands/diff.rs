//! Diff subcommands: diff, show and apply.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use serde::Serialize;
use serde_json::{Value, json};

use crate::cli::args::{read_json_input, write_json, write_stdout};
use crate::cli::{CliError, CommandContext, Result, SUCCESS, SUCCESS_WITH_FLAG};
use crate::dataset::{DatasetFormat, RepoStructure};
use crate::diff::{RepoDiff, RepoKeyFilter, get_repo_diff, parse_patch, write_text_diff};
use crate::merge::{MergeStatus, merge_status};
use crate::repo::Repo;
use crate::repository::{ObjectId, Tree};

/// The key wrapping diff output in JSON mode. `apply` accepts either form.
const DIFF_JSON_KEY: &str = "tabletree.diff/v1";

#[derive(Serialize)]
struct ShowOutput<'a> {
    #[serde(rename = "tabletree.show/v1")]
    show: ShowCommit<'a>,
}

#[derive(Serialize)]
struct ShowCommit<'a> {
    commit: &'a ObjectId,
    parents: &'a [ObjectId],
    author: Option<&'a str>,
    timestamp: Option<&'a str>,
    message: &'a str,
    diff: &'a RepoDiff,
}

#[derive(Serialize)]
struct DiffOutput<'a> {
    #[serde(rename = "tabletree.diff/v1")]
    diff: &'a RepoDiff,
}

async fn print_diff(ctx: &CommandContext, diff: &RepoDiff) -> Result<()> {
    if ctx.json {
        write_json(&DiffOutput { diff }).await?;
        return Ok(());
    }
    let mut buf = Vec::new();
    write_text_diff(&mut buf, diff)?;
    if !buf.is_empty() {
        write_stdout(&String::from_utf8_lossy(&buf)).await?;
    }
    Ok(())
}

fn no_working_copy() -> CliError {
    CliError::NoWorkingCopy(
        "This repository has no working copy; compare two commits with BASE..TARGET".to_string(),
    )
}

/// The snapshot of an empty tree, used as the base of a root commit.
async fn empty_structure(repo: &Arc<Repo>) -> Result<RepoStructure> {
    let tree = repo.write_tree(Tree::empty()).await?;
    Ok(RepoStructure::from_tree(repo.clone(), tree))
}

// =============================================================================
// Diff
// =============================================================================

/// Arguments for `diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// A commit range `BASE..TARGET` (or `BASE...TARGET` to diff from their
    /// merge base), followed by filters: `DATASET`, `DATASET:KIND` or
    /// `DATASET:KIND:KEY`.
    pub args: Vec<String>,

    /// Exit with status 1 if there are changes.
    #[arg(long)]
    pub exit_code: bool,
}

impl DiffArgs {
    pub async fn run(self, ctx: &CommandContext) -> Result<i32> {
        let repo = ctx.open_repo().await?;
        let Some((range, filters)) = self.args.split_first() else {
            return Err(no_working_copy());
        };

        let (base, target) = if let Some((a, b)) = range.split_once("...") {
            let target = repo.resolve_commitish(or_head(b)).await?;
            let other = repo.resolve_commitish(or_head(a)).await?;
            let base = repo.merge_base(&other, &target).await?.ok_or_else(|| {
                CliError::InvalidOperation(format!("{} and {} have no common ancestor", a, b))
            })?;
            (base, target)
        } else if let Some((a, b)) = range.split_once("..") {
            (
                repo.resolve_commitish(or_head(a)).await?,
                repo.resolve_commitish(or_head(b)).await?,
            )
        } else {
            // A single commit compares against the working copy.
            return Err(no_working_copy());
        };

        let filter = RepoKeyFilter::parse(filters)?;
        let base = RepoStructure::from_commit(repo.clone(), base).await?;
        let target = RepoStructure::from_commit(repo.clone(), target).await?;
        let diff = get_repo_diff(&base, &target, None, &filter).await?;

        print_diff(ctx, &diff).await?;
        if self.exit_code && !diff.is_empty() {
            return Ok(SUCCESS_WITH_FLAG);
        }
        Ok(SUCCESS)
    }
}

fn or_head(spec: &str) -> &str {
    if spec.is_empty() { "HEAD" } else { spec }
}

// =============================================================================
// Show
// =============================================================================

/// Arguments for `show`.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// The commit to show.
    #[arg(default_value = "HEAD")]
    pub commit: String,

    /// Filters: `DATASET`, `DATASET:KIND` or `DATASET:KIND:KEY`.
    pub filters: Vec<String>,
}

impl ShowArgs {
    pub async fn run(self, ctx: &CommandContext) -> Result<i32> {
        let repo = ctx.open_repo().await?;
        let id = repo.resolve_commitish(&self.commit).await?;
        let commit = repo.read_commit(&id).await?;

        let base = match commit.parents.first() {
            Some(parent) => RepoStructure::from_commit(repo.clone(), parent.clone()).await?,
            None => empty_structure(&repo).await?,
        };
        let target = RepoStructure::from_commit(repo.clone(), id.clone()).await?;
        let filter = RepoKeyFilter::parse(&self.filters)?;
        let diff = get_repo_diff(&base, &target, None, &filter).await?;

        if ctx.json {
            let metadata = commit.metadata.as_ref();
            write_json(&ShowOutput {
                show: ShowCommit {
                    commit: &id,
                    parents: &commit.parents,
                    author: metadata.and_then(|m| m.author.as_deref()),
                    timestamp: metadata.and_then(|m| m.timestamp.as_deref()),
                    message: commit.message(),
                    diff: &diff,
                },
            })
            .await?;
            return Ok(SUCCESS);
        }

        let mut header = format!("commit {}\n", id);
        if let Some(author) = commit.metadata.as_ref().and_then(|m| m.author.as_ref()) {
            header.push_str(&format!("Author: {}\n", author));
        }
        header.push('\n');
        for line in commit.message().lines() {
            header.push_str(&format!("    {}\n", line));
        }
        write_stdout(&header).await?;
        print_diff(ctx, &diff).await?;
        Ok(SUCCESS)
    }
}

// =============================================================================
// Apply
// =============================================================================

fn parse_dataset_format(s: &str) -> std::result::Result<DatasetFormat, String> {
    DatasetFormat::parse(s)
        .ok_or_else(|| format!("unknown dataset format '{}': expected v1, v2 or point-cloud-v1", s))
}

/// Arguments for `apply`.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// JSON patch to apply, as written by `diff --json` (`-` reads stdin).
    pub patch: PathBuf,

    /// Commit message.
    #[arg(short = 'm', long)]
    pub message: Option<String>,

    /// Format for datasets the patch creates.
    #[arg(long = "dataset-format", default_value = "v2", value_parser = parse_dataset_format)]
    pub dataset_format: DatasetFormat,
}

impl ApplyArgs {
    pub async fn run(self, ctx: &CommandContext) -> Result<i32> {
        let repo = ctx.open_repo().await?;
        if merge_status(&repo).await? != MergeStatus::Clean {
            return Err(CliError::InvalidOperation(
                r#"Repository is in "merging" state. Complete or abort the merge first."#
                    .to_string(),
            ));
        }

        let mut patch = read_json_input(&self.patch).await?;
        if let Value::Object(map) = &mut patch
            && map.len() == 1
            && let Some(inner) = map.remove(DIFF_JSON_KEY)
        {
            patch = inner;
        }

        let structure = RepoStructure::lookup(repo.clone(), "HEAD").await?;
        let diff = parse_patch(&structure, &patch, self.dataset_format).await?;
        let message = self.message.unwrap_or_else(|| "Apply patch".to_string());
        let commit: ObjectId = structure
            .commit_diff(&diff, &message, ctx.author().as_deref(), self.dataset_format)
            .await?;

        if ctx.json {
            write_json(&json!({ "tabletree.commit/v1": { "commit": commit, "message": message } }))
                .await?;
        } else {
            write_stdout(&format!("Committed as {}", commit)).await?;
        }
        Ok(SUCCESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::repo::InitArgs;
    use crate::cli::{GlobalArgs, NO_WORKING_COPY, PATCH_DOES_NOT_APPLY};
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> CommandContext {
        let config_file = dir.path().join("config.ini");
        std::fs::write(&config_file, "[user]\nname = Ada\n").unwrap();
        CommandContext::new(&GlobalArgs {
            config_file: Some(config_file),
            repo: Some(dir.path().to_path_buf()),
            ..Default::default()
        })
        .unwrap()
    }

    fn apply_args(patch: PathBuf) -> ApplyArgs {
        ApplyArgs {
            patch,
            message: Some("import".to_string()),
            dataset_format: DatasetFormat::TableV2,
        }
    }

    #[tokio::test]
    async fn test_apply_then_diff() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        InitArgs { branch: "main".to_string() }.run(&ctx).await.unwrap();

        let patch = dir.path().join("patch.json");
        let body = json!({
            DIFF_JSON_KEY: {
                "roads": {
                    "meta": {"schema.json": {"+": crate::test_fixtures::schema()}},
                    "feature": [{"+": {"id": 1, "x": 1}}],
                }
            }
        });
        std::fs::write(&patch, body.to_string()).unwrap();
        assert_eq!(apply_args(patch.clone()).run(&ctx).await.unwrap(), SUCCESS);

        let repo = ctx.open_repo().await.unwrap();
        let head = repo.head_commit().await.unwrap().unwrap();
        let commit = repo.read_commit(&head).await.unwrap();
        assert_eq!(commit.message(), "import");
        assert_eq!(
            commit.metadata.and_then(|m| m.author).as_deref(),
            Some("Ada")
        );

        // Inserting the same record again conflicts.
        let patch2 = dir.path().join("patch2.json");
        std::fs::write(&patch2, r#"{"roads": {"feature": [{"+": {"id": 1, "x": 2}}]}}"#).unwrap();
        let err = apply_args(patch2).run(&ctx).await.unwrap_err();
        assert_eq!(err.exit_code(), PATCH_DOES_NOT_APPLY);

        let diff = |args: &[&str], exit_code| DiffArgs {
            args: args.iter().map(|s| s.to_string()).collect(),
            exit_code,
        };
        assert_eq!(diff(&["HEAD^..HEAD"], true).run(&ctx).await.unwrap(), SUCCESS_WITH_FLAG);
        assert_eq!(diff(&["HEAD..HEAD"], true).run(&ctx).await.unwrap(), SUCCESS);
        assert_eq!(diff(&["HEAD^..", "roads"], false).run(&ctx).await.unwrap(), SUCCESS);
        assert_eq!(
            diff(&["HEAD"], false).run(&ctx).await.unwrap_err().exit_code(),
            NO_WORKING_COPY
        );
        assert_eq!(
            diff(&[], false).run(&ctx).await.unwrap_err().exit_code(),
            NO_WORKING_COPY
        );

        let show = ShowArgs {
            commit: "HEAD".to_string(),
            filters: vec![],
        };
        assert_eq!(show.run(&ctx).await.unwrap(), SUCCESS);
    }
}
