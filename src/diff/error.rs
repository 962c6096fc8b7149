//! Error types for diff computation.

use thiserror::Error;

use crate::dataset::DatasetError;
use crate::repo::RepoError;
use crate::repository::ObjectId;
use crate::working_copy::WorkingCopyError;

/// Errors that can occur while computing diffs.
#[derive(Debug, Error)]
pub enum DiffError {
    /// The trees being compared break an assumption of the dataset layout:
    /// an unsupported change type or a path that does not decode.
    #[error("structural violation at {path}: {reason}")]
    StructuralViolation { path: String, reason: String },

    /// A diff filter could not be parsed.
    #[error("invalid filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: String },

    /// A JSON patch does not have the expected shape.
    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    /// The working copy is based on a different tree than the diff target.
    #[error("working copy is based on tree {actual:?}, expected {expected}")]
    WorkingCopyMismatch {
        expected: ObjectId,
        actual: Option<ObjectId>,
    },

    #[error(transparent)]
    WorkingCopy(#[from] WorkingCopyError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Result type for diff operations.
pub type Result<T> = std::result::Result<T, DiffError>;
