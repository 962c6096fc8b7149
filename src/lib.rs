//! tabletree-rs - versioned tabular datasets with record-level diff and
//! three-way merge.

pub mod backend;
pub mod caches;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod diff;
pub mod merge;
pub mod repo;
pub mod repository;
pub mod working_copy;

#[cfg(test)]
mod test_fixtures;

pub use dataset::{Dataset, DatasetError, DatasetFormat, ItemKind, RepoStructure};
pub use diff::{DatasetDiff, Delta, DiffError, RepoDiff, RepoKeyFilter, get_repo_diff};
pub use merge::{MergeError, MergeOptions, MergeOutcome, MergedIndex, SuspendedMerge, merge_trees};
pub use repo::{Repo, RepoError};
