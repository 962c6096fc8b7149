//! The working-copy seam: an editable checkout layered over a base tree.
//!
//! Diffs against a working copy are added on top of commit diffs; merges
//! refuse to start while the working copy has uncommitted changes.

mod memory_working_copy;

use async_trait::async_trait;
use thiserror::Error;

use crate::dataset::{Dataset, DatasetError};
use crate::diff::{DatasetDiff, DatasetKeyFilter};
use crate::repository::ObjectId;

pub use memory_working_copy::MemoryWorkingCopy;

/// Errors reported by a working copy.
#[derive(Debug, Error)]
pub enum WorkingCopyError {
    #[error("working copy error: {0}")]
    Other(String),

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

pub type Result<T> = std::result::Result<T, WorkingCopyError>;

/// An editable materialization of one tree.
///
/// Implementations must present a read-consistent view of their content for
/// the duration of one `diff_against_tree` call.
#[async_trait]
pub trait WorkingCopy: Send + Sync {
    /// The tree the working copy was checked out from.
    async fn base_tree(&self) -> Result<Option<ObjectId>>;

    /// The changes from `dataset` (as stored in the base tree) to the working
    /// copy's content at `ds_path`. `dataset` is `None` if the base tree has
    /// no dataset there.
    async fn diff_against_tree(
        &self,
        ds_path: &str,
        dataset: Option<&Dataset>,
        filter: &DatasetKeyFilter,
    ) -> Result<DatasetDiff>;

    /// Returns true if there are uncommitted changes.
    async fn is_dirty(&self) -> Result<bool>;

    /// Discard all changes and re-base on `tree`.
    async fn reset(&self, tree: &ObjectId) -> Result<()>;
}
