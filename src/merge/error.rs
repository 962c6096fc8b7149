//! Error types for merge operations.

use crate::dataset::{ApplyConflict, DatasetError};
use crate::repo::RepoError;
use crate::repository::JsonError;
use crate::working_copy::WorkingCopyError;

// =============================================================================
// Error Types
// =============================================================================

/// Error type for merge operations.
#[derive(Debug)]
pub enum MergeError {
    /// Repository error during merge.
    Repo(RepoError),
    /// Dataset error while labelling or encoding conflict versions.
    Dataset(DatasetError),
    /// Working copy error.
    WorkingCopy(WorkingCopyError),
    /// The trees being merged break an assumption of the dataset layout.
    StructuralViolation { path: String, reason: String },
    /// An item was absent from both the base and the derived tree.
    InvalidBaseState { path: String },
    /// The operation is not valid in the current repository state.
    InvalidOperation(String),
    /// No conflict has the given label.
    NoSuchConflict(String),
    /// A record conflict cannot be resolved while meta conflicts in the same
    /// dataset are unresolved.
    UnresolvedDependency { label: String, blocking: Vec<String> },
    /// The merge cannot complete while conflicts remain.
    IncompleteMerge { remaining: Vec<String> },
    /// Resolved versions collide with other entries in the merged tree.
    PatchDoesNotApply(Vec<ApplyConflict>),
}

impl std::fmt::Display for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeError::Repo(e) => write!(f, "repository error: {}", e),
            MergeError::Dataset(e) => write!(f, "{}", e),
            MergeError::WorkingCopy(e) => write!(f, "{}", e),
            MergeError::StructuralViolation { path, reason } => {
                write!(f, "structural violation at {}: {}", path, reason)
            }
            MergeError::InvalidBaseState { path } => {
                write!(f, "invalid base state: '{}' is absent on both sides", path)
            }
            MergeError::InvalidOperation(message) => write!(f, "{}", message),
            MergeError::NoSuchConflict(label) => write!(f, "no conflict found at {}", label),
            MergeError::UnresolvedDependency { label, blocking } => write!(
                f,
                "cannot resolve {} while meta conflicts remain: {}",
                label,
                blocking.join(", ")
            ),
            MergeError::IncompleteMerge { remaining } => {
                write!(f, "merge has {} unresolved conflicts:", remaining.len())?;
                for label in remaining {
                    write!(f, "\n  {}", label)?;
                }
                Ok(())
            }
            MergeError::PatchDoesNotApply(conflicts) => {
                write!(f, "resolved versions do not apply:")?;
                for conflict in conflicts {
                    write!(f, "\n  {}", conflict)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MergeError::Repo(e) => Some(e),
            MergeError::Dataset(e) => Some(e),
            MergeError::WorkingCopy(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RepoError> for MergeError {
    fn from(e: RepoError) -> Self {
        MergeError::Repo(e)
    }
}

impl From<JsonError> for MergeError {
    fn from(e: JsonError) -> Self {
        MergeError::Repo(e.into())
    }
}

impl From<WorkingCopyError> for MergeError {
    fn from(e: WorkingCopyError) -> Self {
        MergeError::WorkingCopy(e)
    }
}

impl From<DatasetError> for MergeError {
    fn from(e: DatasetError) -> Self {
        match e {
            DatasetError::MalformedPath { path, reason } => {
                MergeError::StructuralViolation { path, reason }
            }
            DatasetError::PatchDoesNotApply(conflicts) => MergeError::PatchDoesNotApply(conflicts),
            DatasetError::Repo(e) => MergeError::Repo(e),
            other => MergeError::Dataset(other),
        }
    }
}

/// Result type for merge operations.
pub type Result<T> = std::result::Result<T, MergeError>;
