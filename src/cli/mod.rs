//! Command-line interface for tabletree.

pub mod args;
mod command_context;
mod commands;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::config::ConfigError;
use crate::dataset::DatasetError;
use crate::diff::DiffError;
use crate::merge::MergeError;
use crate::repo::RepoError;

pub use args::{ArgsError, GlobalArgs};
pub use command_context::{CommandContext, REPO_DIR, init_logging};

// =============================================================================
// Exit Codes
// =============================================================================

pub const SUCCESS: i32 = 0;
/// The command succeeded and found something, e.g. `diff --exit-code` saw changes.
pub const SUCCESS_WITH_FLAG: i32 = 1;
pub const INVALID_ARGUMENT: i32 = 2;
pub const UNCATEGORIZED_ERROR: i32 = 11;
pub const INVALID_OPERATION: i32 = 20;
pub const MERGE_CONFLICT: i32 = 21;
pub const PATCH_DOES_NOT_APPLY: i32 = 22;
pub const SCHEMA_VIOLATION: i32 = 23;
pub const UNSUPPORTED_VERSION: i32 = 24;
pub const NOT_FOUND: i32 = 40;
pub const NO_WORKING_COPY: i32 = 45;
pub const NO_COMMIT: i32 = 47;
pub const NO_CONFLICT: i32 = 50;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during CLI execution.
#[derive(Debug, Error)]
pub enum CliError {
    /// Argument processing error.
    #[error("{0}")]
    Args(#[from] ArgsError),

    /// Configuration error.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Repository error.
    #[error("{0}")]
    Repo(#[from] RepoError),

    /// Dataset error.
    #[error("{0}")]
    Dataset(#[from] DatasetError),

    /// Diff error.
    #[error("{0}")]
    Diff(#[from] DiffError),

    /// Merge error.
    #[error("{0}")]
    Merge(#[from] MergeError),

    /// The directory holds no tabletree repository.
    #[error("not a tabletree repository: {}", .0.display())]
    NotARepository(std::path::PathBuf),

    /// The command needs a working copy and this repository has none.
    #[error("{0}")]
    NoWorkingCopy(String),

    /// `HEAD` does not resolve to a commit.
    #[error("{0}")]
    NoCommit(String),

    /// The command is not valid in the current repository state.
    #[error("{0}")]
    InvalidOperation(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// The process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Args(ArgsError::Io(_)) => UNCATEGORIZED_ERROR,
            CliError::Args(_) | CliError::Config(_) => INVALID_ARGUMENT,
            CliError::Repo(e) => repo_exit_code(e),
            CliError::Dataset(e) => dataset_exit_code(e),
            CliError::Diff(e) => diff_exit_code(e),
            CliError::Merge(e) => merge_exit_code(e),
            CliError::NotARepository(_) => NOT_FOUND,
            CliError::NoWorkingCopy(_) => NO_WORKING_COPY,
            CliError::NoCommit(_) => NO_COMMIT,
            CliError::InvalidOperation(_) => INVALID_OPERATION,
            CliError::Io(_) => UNCATEGORIZED_ERROR,
        }
    }
}

fn repo_exit_code(e: &RepoError) -> i32 {
    match e {
        RepoError::NotFound(_) | RepoError::BadCommitish(_) => NOT_FOUND,
        RepoError::NotInitialized => NOT_FOUND,
        RepoError::AlreadyInitialized | RepoError::RefChanged { .. } => INVALID_OPERATION,
        RepoError::InvalidPath(_) => INVALID_ARGUMENT,
        _ => UNCATEGORIZED_ERROR,
    }
}

fn dataset_exit_code(e: &DatasetError) -> i32 {
    match e {
        DatasetError::NotADataRecord(_)
        | DatasetError::MalformedPath { .. }
        | DatasetError::Schema { .. } => SCHEMA_VIOLATION,
        DatasetError::UnsupportedVersion(_) => UNSUPPORTED_VERSION,
        DatasetError::InvalidRecord { .. }
        | DatasetError::InvalidPrimaryKey { .. }
        | DatasetError::Json(_) => INVALID_ARGUMENT,
        DatasetError::NotFound(_) => NOT_FOUND,
        DatasetError::PatchDoesNotApply(_) => PATCH_DOES_NOT_APPLY,
        DatasetError::NoChanges => INVALID_OPERATION,
        DatasetError::Repo(e) => repo_exit_code(e),
    }
}

fn diff_exit_code(e: &DiffError) -> i32 {
    match e {
        DiffError::StructuralViolation { .. } => SCHEMA_VIOLATION,
        DiffError::InvalidFilter { .. } | DiffError::InvalidPatch(_) => INVALID_ARGUMENT,
        DiffError::WorkingCopyMismatch { .. } => INVALID_OPERATION,
        DiffError::WorkingCopy(_) => UNCATEGORIZED_ERROR,
        DiffError::Dataset(e) => dataset_exit_code(e),
        DiffError::Repo(e) => repo_exit_code(e),
    }
}

fn merge_exit_code(e: &MergeError) -> i32 {
    match e {
        MergeError::Repo(e) => repo_exit_code(e),
        MergeError::Dataset(e) => dataset_exit_code(e),
        MergeError::WorkingCopy(_) => UNCATEGORIZED_ERROR,
        MergeError::StructuralViolation { .. } | MergeError::InvalidBaseState { .. } => {
            SCHEMA_VIOLATION
        }
        MergeError::InvalidOperation(_)
        | MergeError::UnresolvedDependency { .. }
        | MergeError::IncompleteMerge { .. } => INVALID_OPERATION,
        MergeError::NoSuchConflict(_) => NO_CONFLICT,
        MergeError::PatchDoesNotApply(_) => PATCH_DOES_NOT_APPLY,
    }
}

/// Result type for CLI operations.
pub type Result<T> = std::result::Result<T, CliError>;

// =============================================================================
// CLI Definition
// =============================================================================

/// tt - versioned tabular datasets with record-level diff and merge.
#[derive(Parser, Debug)]
#[command(name = "tt", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an empty repository.
    Init(commands::repo::InitArgs),

    /// Commit a JSON patch on top of HEAD.
    Apply(commands::diff::ApplyArgs),

    /// Show changes between commits.
    Diff(commands::diff::DiffArgs),

    /// Show a commit and the changes it introduced.
    Show(commands::diff::ShowArgs),

    /// Show first-parent history.
    Log(commands::repo::LogArgs),

    /// List branches, or create one.
    Branch(commands::repo::BranchArgs),

    /// Switch HEAD to a branch.
    Checkout(commands::repo::CheckoutArgs),

    /// Merge a commit into HEAD, or continue or abort a suspended merge.
    Merge(commands::merge::MergeArgs),

    /// List the conflicts of the suspended merge.
    Conflicts(commands::merge::ConflictsArgs),

    /// Resolve one conflict of the suspended merge.
    Resolve(commands::merge::ResolveArgs),

    /// Show the current branch and merge state.
    Status(commands::repo::StatusArgs),
}

// =============================================================================
// CLI Execution
// =============================================================================

impl Cli {
    /// Parse command-line arguments and return the CLI instance.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Run the CLI command, returning the process exit status.
    pub async fn run(self) -> Result<i32> {
        let ctx = CommandContext::new(&self.global)?;

        match self.command {
            Command::Init(args) => args.run(&ctx).await,
            Command::Apply(args) => args.run(&ctx).await,
            Command::Diff(args) => args.run(&ctx).await,
            Command::Show(args) => args.run(&ctx).await,
            Command::Log(args) => args.run(&ctx).await,
            Command::Branch(args) => args.run(&ctx).await,
            Command::Checkout(args) => args.run(&ctx).await,
            Command::Merge(args) => args.run(&ctx).await,
            Command::Conflicts(args) => args.run(&ctx).await,
            Command::Resolve(args) => args.run(&ctx).await,
            Command::Status(args) => args.run(&ctx).await,
        }
    }
}

/// Main entry point for the CLI.
pub async fn main() -> Result<i32> {
    let cli = Cli::parse_args();
    cli.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            CliError::Repo(RepoError::BadCommitish("nope".into())).exit_code(),
            NOT_FOUND
        );
        assert_eq!(
            CliError::Merge(MergeError::NoSuchConflict("a:feature:1".into())).exit_code(),
            NO_CONFLICT
        );
        assert_eq!(
            CliError::Merge(MergeError::IncompleteMerge {
                remaining: vec!["a:feature:1".into()]
            })
            .exit_code(),
            INVALID_OPERATION
        );
        assert_eq!(
            CliError::Diff(DiffError::Dataset(DatasetError::UnsupportedVersion("9".into())))
                .exit_code(),
            UNSUPPORTED_VERSION
        );
        assert_eq!(
            CliError::Dataset(DatasetError::PatchDoesNotApply(vec![])).exit_code(),
            PATCH_DOES_NOT_APPLY
        );
        assert_eq!(
            CliError::NoWorkingCopy("no working copy".into()).exit_code(),
            NO_WORKING_COPY
        );
    }

    #[test]
    fn test_parse_merge_flags() {
        let cli = Cli::try_parse_from(["tt", "-C", "/tmp/r", "merge", "feature", "--no-ff"]).unwrap();
        assert_eq!(cli.global.repo.as_deref(), Some(std::path::Path::new("/tmp/r")));
        assert!(matches!(cli.command, Command::Merge(_)));

        assert!(Cli::try_parse_from(["tt", "merge", "--continue", "--abort"]).is_err());
        assert!(Cli::try_parse_from(["tt", "merge"]).is_err());
        assert!(Cli::try_parse_from(["tt", "resolve", "x:feature:1", "--with", "mine"]).is_err());
    }
}
