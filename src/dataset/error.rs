//! Error types for dataset operations.

use thiserror::Error;

use crate::repo::RepoError;

/// Why a single write in a patch could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyConflictReason {
    /// Deleting an item that does not exist.
    DeleteMissing,
    /// Inserting an item that already exists.
    InsertExisting,
    /// Updating an item that does not exist.
    UpdateMissing,
    /// The stored content no longer matches the expected prior value.
    Stale,
}

impl std::fmt::Display for ApplyConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ApplyConflictReason::DeleteMissing => "deleting a nonexistent item",
            ApplyConflictReason::InsertExisting => "inserting an item that already exists",
            ApplyConflictReason::UpdateMissing => "updating a nonexistent item",
            ApplyConflictReason::Stale => "stored content does not match the expected old value",
        };
        f.write_str(text)
    }
}

/// One conflicting write, identified by its `dataset:kind:key` label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyConflict {
    pub label: String,
    pub reason: ApplyConflictReason,
}

impl std::fmt::Display for ApplyConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.label, self.reason)
    }
}

fn format_apply_conflicts(conflicts: &[ApplyConflict]) -> String {
    conflicts
        .iter()
        .map(|c| format!("\n  {}", c))
        .collect::<String>()
}

/// Errors that can occur while reading, decoding or writing datasets.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// The path is outside the dataset's record namespace (e.g. a meta item).
    #[error("not a data record path: {0}")]
    NotADataRecord(String),

    /// The path is inside the record namespace but cannot be decoded.
    #[error("malformed record path {path}: {reason}")]
    MalformedPath { path: String, reason: String },

    /// A dataset declares a version this build does not understand.
    #[error("unsupported dataset version: {0}")]
    UnsupportedVersion(String),

    /// The dataset schema is missing or unusable.
    #[error("schema error in {dataset}: {message}")]
    Schema { dataset: String, message: String },

    /// A record or meta item does not have the expected shape.
    #[error("invalid record in {dataset}: {message}")]
    InvalidRecord { dataset: String, message: String },

    /// A primary key value could not be cast to the declared type.
    #[error("cannot use {value} as a {data_type} primary key")]
    InvalidPrimaryKey { value: String, data_type: String },

    /// The requested dataset does not exist.
    #[error("dataset not found: {0}")]
    NotFound(String),

    /// A patch could not be applied; every conflicting write is listed.
    #[error("patch does not apply:{}", format_apply_conflicts(.0))]
    PatchDoesNotApply(Vec<ApplyConflict>),

    /// Applying a patch produced no change.
    #[error("no changes to commit")]
    NoChanges,

    /// Repository error.
    #[error("{0}")]
    Repo(#[from] RepoError),

    /// JSON error while reading or writing a record.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for dataset operations.
pub type Result<T> = std::result::Result<T, DatasetError>;

impl From<crate::repository::JsonError> for DatasetError {
    fn from(e: crate::repository::JsonError) -> Self {
        DatasetError::Repo(e.into())
    }
}
