//! Three-way merge of dataset commits.
//!
//! # Overview
//!
//! Merging `theirs` into `HEAD` (`ours`) works from their nearest common
//! ancestor:
//!
//! 1. For every path changed on either side, compute the change from the
//!    ancestor to each side ([`to_item_change`]).
//! 2. Decide the merge action for the two changes ([`changes_to_merge`]).
//! 3. Take one side, or record a [`Conflict`] labelled
//!    `dataset:kind:identity`.
//!
//! A merge without conflicts is committed straight away. Otherwise it is
//! suspended ([`SuspendedMerge`]) until every conflict is resolved
//! ([`resolve_conflict`]), then completed with [`merge_continue`] or
//! abandoned with [`merge_abort`].

mod change_merge;
mod commit;
mod conflicts;
mod error;
mod item_change;
mod merge_state;
mod merge_trees;
mod merged_index;
mod resolve;
mod types;

pub use change_merge::changes_to_merge;
pub use commit::{
    FastForwardMode, MergeOptions, MergeOutcome, MergeReport, merge, merge_abort, merge_continue,
    merge_status,
};
pub use conflicts::{ConflictNode, ListOptions, conflicts_as_text, list_conflicts};
pub use error::{MergeError, Result};
pub use item_change::to_item_change;
pub use merge_state::{MERGE_STATE_REF, SuspendedMerge};
pub use merge_trees::merge_trees;
pub use merged_index::MergedIndex;
pub use resolve::{Resolution, resolve_conflict};
pub use types::{
    AncestorOursTheirs, Conflict, ItemChange, ItemMerge, MergeEntry, MergeStatus, Version,
};
