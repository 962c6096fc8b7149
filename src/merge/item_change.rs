//! Compute per-path changes for a three-way merge.

use crate::merge::error::{MergeError, Result};
use crate::merge::types::ItemChange;
use crate::repository::ObjectId;

/// Compute the change from the blob at a path in the ancestor to the blob at
/// the same path in a derived tree.
///
/// # Errors
/// Returns `MergeError::InvalidBaseState` if the path is absent on both sides.
pub fn to_item_change(
    base: Option<&ObjectId>,
    derived: Option<&ObjectId>,
    path: &str,
) -> Result<ItemChange> {
    match (base, derived) {
        (None, None) => Err(MergeError::InvalidBaseState {
            path: path.to_string(),
        }),
        (None, Some(id)) => Ok(ItemChange::Added(id.clone())),
        (Some(_), None) => Ok(ItemChange::Deleted),
        (Some(b), Some(d)) if b == d => Ok(ItemChange::Unchanged),
        (Some(_), Some(d)) => Ok(ItemChange::Modified(d.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_changes() {
        let a = "a".to_string();
        let b = "b".to_string();
        assert_eq!(to_item_change(None, Some(&a), "p").unwrap(), ItemChange::Added(a.clone()));
        assert_eq!(to_item_change(Some(&a), None, "p").unwrap(), ItemChange::Deleted);
        assert_eq!(to_item_change(Some(&a), Some(&a), "p").unwrap(), ItemChange::Unchanged);
        assert_eq!(
            to_item_change(Some(&a), Some(&b), "p").unwrap(),
            ItemChange::Modified(b.clone())
        );
    }

    #[test]
    fn test_absent_on_both_sides() {
        let err = to_item_change(None, None, "roads/x").unwrap_err();
        assert!(matches!(err, MergeError::InvalidBaseState { path } if path == "roads/x"));
    }
}
