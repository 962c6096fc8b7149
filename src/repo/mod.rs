//! Repository interface: content-addressed objects, trees, history and references.
//!
//! This module provides the [`Repo`] struct which wraps a backend and cache
//! and implements the object-store primitives the diff and merge layers consume:
//! path-level tree diffs, batched tree building, commits and merge bases.

mod history;
#[allow(clippy::module_inception)]
mod repo;
mod tree_ops;

pub use repo::{
    BRANCH_REF_PREFIX, HEAD_REF, Head, Repo, RepoError, RepoInitialize, Result, branch_ref_name,
    compute_object_id,
};
pub use tree_ops::{ChangeStatus, PathChange, TreeOp, join_path};
