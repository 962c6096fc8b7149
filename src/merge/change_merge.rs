//! Decide how to merge two changes to the same path.

use crate::merge::types::{ItemChange, ItemMerge};

/// Determine the merge action for two changes from the same ancestor.
///
/// Identical changes (including two deletions, or two additions of the same
/// blob) merge cleanly. A change on one side only takes that side. Anything
/// else is a conflict.
pub fn changes_to_merge(ours: &ItemChange, theirs: &ItemChange) -> ItemMerge {
    if ours == theirs {
        return ItemMerge::TakeEither;
    }
    if matches!(ours, ItemChange::Unchanged) {
        return ItemMerge::TakeTheirs;
    }
    if matches!(theirs, ItemChange::Unchanged) {
        return ItemMerge::TakeOurs;
    }
    ItemMerge::Conflict
}
