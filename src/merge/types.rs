//! Type definitions for three-way dataset merges.

use serde::{Deserialize, Serialize};

use crate::dataset::ItemKind;
use crate::repository::ObjectId;

// =============================================================================
// Version / AncestorOursTheirs
// =============================================================================

/// One of the three versions taking part in a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Version {
    Ancestor,
    Ours,
    Theirs,
}

impl Version {
    pub const ALL: [Version; 3] = [Version::Ancestor, Version::Ours, Version::Theirs];

    pub fn as_str(self) -> &'static str {
        match self {
            Version::Ancestor => "ancestor",
            Version::Ours => "ours",
            Version::Theirs => "theirs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three values, always in ancestor, ours, theirs order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: Serialize + Default + PartialEq",
    deserialize = "T: Deserialize<'de> + Default"
))]
pub struct AncestorOursTheirs<T> {
    #[serde(default, skip_serializing_if = "is_default")]
    pub ancestor: T,
    #[serde(default, skip_serializing_if = "is_default")]
    pub ours: T,
    #[serde(default, skip_serializing_if = "is_default")]
    pub theirs: T,
}

fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

impl<T> AncestorOursTheirs<T> {
    pub fn new(ancestor: T, ours: T, theirs: T) -> Self {
        Self {
            ancestor,
            ours,
            theirs,
        }
    }

    pub fn get(&self, version: Version) -> &T {
        match version {
            Version::Ancestor => &self.ancestor,
            Version::Ours => &self.ours,
            Version::Theirs => &self.theirs,
        }
    }

    /// The three values paired with their version.
    pub fn iter(&self) -> impl Iterator<Item = (Version, &T)> {
        Version::ALL.into_iter().map(move |v| (v, self.get(v)))
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> AncestorOursTheirs<U> {
        AncestorOursTheirs {
            ancestor: f(self.ancestor),
            ours: f(self.ours),
            theirs: f(self.theirs),
        }
    }
}

// =============================================================================
// MergeEntry / Conflict
// =============================================================================

/// A blob placed at a repository path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MergeEntry {
    pub path: String,
    pub blob: ObjectId,
}

/// An item both sides changed differently.
///
/// A missing ancestor means both sides added the item; a missing ours or
/// theirs means that side deleted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// The dataset holding the item, or `None` for paths outside datasets.
    pub dataset: Option<String>,
    pub kind: Option<ItemKind>,
    /// The item identity, or the raw path for paths outside datasets.
    pub identity: String,
    pub versions: AncestorOursTheirs<Option<MergeEntry>>,
}

impl Conflict {
    /// The conflict's label: `dataset:kind:identity`, or the raw path.
    pub fn label(&self) -> String {
        match (&self.dataset, self.kind) {
            (Some(ds), Some(kind)) => format!("{}:{}:{}", ds, kind, self.identity),
            _ => self.identity.clone(),
        }
    }

    /// Returns true for a feature or tile conflict.
    pub fn is_record(&self) -> bool {
        matches!(self.kind, Some(ItemKind::Feature) | Some(ItemKind::Tile))
    }

    pub fn is_meta(&self) -> bool {
        self.kind == Some(ItemKind::Meta)
    }
}

// =============================================================================
// ItemChange / ItemMerge
// =============================================================================

/// The change to one path from the ancestor to one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemChange {
    Unchanged,
    Added(ObjectId),
    Modified(ObjectId),
    Deleted,
}

impl ItemChange {
    /// The blob present after the change, if any.
    pub fn result(&self) -> Option<&ObjectId> {
        match self {
            ItemChange::Added(id) | ItemChange::Modified(id) => Some(id),
            ItemChange::Unchanged | ItemChange::Deleted => None,
        }
    }
}

/// What the merged tree should hold at a path changed on one or both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemMerge {
    /// Both sides made the same change.
    TakeEither,
    TakeOurs,
    TakeTheirs,
    Conflict,
}

/// The merge state as reported to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStatus {
    /// No merge in progress, or a merge with no conflicts.
    Clean,
    /// Conflicts remain unresolved.
    Merging,
    /// Every conflict has a resolution; the merge can be completed.
    Resolved,
}
