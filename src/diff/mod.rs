//! Record-level diffs between dataset snapshots.
//!
//! - [`diff_dataset`] compares two versions of one dataset.
//! - [`get_dataset_diff`] and [`get_repo_diff`] compare snapshots, optionally
//!   stacking a working copy's uncommitted changes on top.
//! - [`RepoDiff`], [`DatasetDiff`] and [`DeltaDiff`] accumulate the results.

mod delta;
mod engine;
mod error;
mod key_filter;
mod output;

pub use delta::{DatasetDiff, Delta, DeltaDiff, DeltaType, KeyValue, RepoDiff};
pub use engine::{diff_dataset, get_dataset_diff, get_repo_diff};
pub use error::{DiffError, Result};
pub use key_filter::{DatasetKeyFilter, KeyFilter, RepoKeyFilter};
pub use output::{parse_patch, write_text_diff};
