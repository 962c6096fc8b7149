//! Deltas and the nested containers that accumulate them.
//!
//! A [`RepoDiff`] maps dataset paths to [`DatasetDiff`]s, which map an
//! [`ItemKind`] to a [`DeltaDiff`] of deltas keyed by identity. Containers
//! compose with `+=` (the later delta for an identity wins) and `prune()`
//! removes empty containers bottom-up.

use std::collections::BTreeMap;
use std::ops::AddAssign;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::dataset::ItemKind;

// =============================================================================
// KeyValue / Delta
// =============================================================================

/// One side of a delta: an identity and the item's value.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: Value,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaType {
    Insert,
    Update,
    Delete,
}

impl DeltaType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeltaType::Insert => "insert",
            DeltaType::Update => "update",
            DeltaType::Delete => "delete",
        }
    }
}

/// A single change to one item.
///
/// An update may change the identity (a move); it is keyed by the old identity.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Insert(KeyValue),
    Update { old: KeyValue, new: KeyValue },
    Delete(KeyValue),
}

impl Delta {
    /// Build a delta from optional endpoints. Returns `None` if both are absent.
    pub fn from_sides(old: Option<KeyValue>, new: Option<KeyValue>) -> Option<Self> {
        match (old, new) {
            (Some(old), Some(new)) => Some(Delta::Update { old, new }),
            (Some(old), None) => Some(Delta::Delete(old)),
            (None, Some(new)) => Some(Delta::Insert(new)),
            (None, None) => None,
        }
    }

    /// The identity this delta is keyed by: the old key if there is one.
    pub fn key(&self) -> &str {
        match self {
            Delta::Insert(new) => &new.key,
            Delta::Update { old, .. } | Delta::Delete(old) => &old.key,
        }
    }

    pub fn old_kv(&self) -> Option<&KeyValue> {
        match self {
            Delta::Insert(_) => None,
            Delta::Update { old, .. } | Delta::Delete(old) => Some(old),
        }
    }

    pub fn new_kv(&self) -> Option<&KeyValue> {
        match self {
            Delta::Delete(_) => None,
            Delta::Update { new, .. } | Delta::Insert(new) => Some(new),
        }
    }

    pub fn old_key(&self) -> Option<&str> {
        self.old_kv().map(|kv| kv.key.as_str())
    }

    pub fn new_key(&self) -> Option<&str> {
        self.new_kv().map(|kv| kv.key.as_str())
    }

    pub fn delta_type(&self) -> DeltaType {
        match self {
            Delta::Insert(_) => DeltaType::Insert,
            Delta::Update { .. } => DeltaType::Update,
            Delta::Delete(_) => DeltaType::Delete,
        }
    }

    /// The same change in the opposite direction.
    pub fn invert(self) -> Self {
        match self {
            Delta::Insert(kv) => Delta::Delete(kv),
            Delta::Delete(kv) => Delta::Insert(kv),
            Delta::Update { old, new } => Delta::Update { old: new, new: old },
        }
    }

    /// Returns true for an update that changes neither identity nor value.
    pub fn is_noop(&self) -> bool {
        matches!(self, Delta::Update { old, new } if old == new)
    }
}

impl Serialize for Delta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if matches!(self, Delta::Update { .. }) { 2 } else { 1 };
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(old) = self.old_kv() {
            map.serialize_entry("-", &old.value)?;
        }
        if let Some(new) = self.new_kv() {
            map.serialize_entry("+", &new.value)?;
        }
        map.end()
    }
}

// =============================================================================
// DeltaDiff
// =============================================================================

/// Deltas of one item kind, keyed by identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaDiff(BTreeMap<String, Delta>);

static EMPTY_DELTA_DIFF: DeltaDiff = DeltaDiff::new();

impl DeltaDiff {
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add a delta, replacing any delta already held for the same identity.
    pub fn add_delta(&mut self, delta: Delta) {
        self.0.insert(delta.key().to_string(), delta);
    }

    pub fn get(&self, key: &str) -> Option<&Delta> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Delta> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Delta)> {
        self.0.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &Delta> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Invert every delta, re-keying moves by their new old identity.
    pub fn invert(self) -> Self {
        self.0.into_values().map(Delta::invert).collect()
    }
}

impl FromIterator<Delta> for DeltaDiff {
    fn from_iter<I: IntoIterator<Item = Delta>>(iter: I) -> Self {
        let mut diff = DeltaDiff::new();
        for delta in iter {
            diff.add_delta(delta);
        }
        diff
    }
}

impl IntoIterator for DeltaDiff {
    type Item = (String, Delta);
    type IntoIter = std::collections::btree_map::IntoIter<String, Delta>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl AddAssign for DeltaDiff {
    fn add_assign(&mut self, other: DeltaDiff) {
        for (key, delta) in other.0 {
            self.0.insert(key, delta);
        }
    }
}

// =============================================================================
// DatasetDiff
// =============================================================================

/// Changes to one dataset, grouped by item kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetDiff(BTreeMap<ItemKind, DeltaDiff>);

static EMPTY_DATASET_DIFF: DatasetDiff = DatasetDiff::new();

impl DatasetDiff {
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// The deltas of one kind; empty if there are none.
    pub fn get(&self, kind: ItemKind) -> &DeltaDiff {
        self.0.get(&kind).unwrap_or(&EMPTY_DELTA_DIFF)
    }

    pub fn entry(&mut self, kind: ItemKind) -> &mut DeltaDiff {
        self.0.entry(kind).or_default()
    }

    pub fn insert(&mut self, kind: ItemKind, deltas: DeltaDiff) {
        self.0.insert(kind, deltas);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ItemKind, &DeltaDiff)> {
        self.0.iter()
    }

    pub fn kinds(&self) -> impl Iterator<Item = ItemKind> + '_ {
        self.0.keys().copied()
    }

    /// Total number of deltas across all kinds.
    pub fn len(&self) -> usize {
        self.0.values().map(DeltaDiff::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(DeltaDiff::is_empty)
    }

    /// Remove kinds that hold no deltas.
    pub fn prune(&mut self) {
        self.0.retain(|_, deltas| !deltas.is_empty());
    }

    pub fn invert(self) -> Self {
        Self(
            self.0
                .into_iter()
                .map(|(kind, deltas)| (kind, deltas.invert()))
                .collect(),
        )
    }
}

impl IntoIterator for DatasetDiff {
    type Item = (ItemKind, DeltaDiff);
    type IntoIter = std::collections::btree_map::IntoIter<ItemKind, DeltaDiff>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl AddAssign for DatasetDiff {
    fn add_assign(&mut self, other: DatasetDiff) {
        for (kind, deltas) in other.0 {
            *self.entry(kind) += deltas;
        }
    }
}

/// Meta deltas serialize as a map by name, record deltas as a list.
impl Serialize for DatasetDiff {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct DeltaList<'a>(&'a DeltaDiff);

        impl Serialize for DeltaList<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
                for delta in self.0.values() {
                    seq.serialize_element(delta)?;
                }
                seq.end()
            }
        }

        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (kind, deltas) in &self.0 {
            if *kind == ItemKind::Meta {
                map.serialize_entry(kind.as_str(), &deltas.0)?;
            } else {
                map.serialize_entry(kind.as_str(), &DeltaList(deltas))?;
            }
        }
        map.end()
    }
}

// =============================================================================
// RepoDiff
// =============================================================================

/// Changes across a repository, keyed by dataset path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepoDiff(BTreeMap<String, DatasetDiff>);

impl RepoDiff {
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// The changes to one dataset; empty if it has none.
    pub fn get(&self, dataset: &str) -> &DatasetDiff {
        self.0.get(dataset).unwrap_or(&EMPTY_DATASET_DIFF)
    }

    pub fn entry(&mut self, dataset: &str) -> &mut DatasetDiff {
        self.0.entry(dataset.to_string()).or_default()
    }

    pub fn insert(&mut self, dataset: impl Into<String>, diff: DatasetDiff) {
        self.0.insert(dataset.into(), diff);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DatasetDiff)> {
        self.0.iter()
    }

    pub fn datasets(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Total number of deltas across all datasets.
    pub fn len(&self) -> usize {
        self.0.values().map(DatasetDiff::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(DatasetDiff::is_empty)
    }

    /// Remove empty kinds, then datasets left with no kinds.
    pub fn prune(&mut self) {
        for diff in self.0.values_mut() {
            diff.prune();
        }
        self.0.retain(|_, diff| !diff.0.is_empty());
    }

    pub fn invert(self) -> Self {
        Self(
            self.0
                .into_iter()
                .map(|(path, diff)| (path, diff.invert()))
                .collect(),
        )
    }
}

impl IntoIterator for RepoDiff {
    type Item = (String, DatasetDiff);
    type IntoIter = std::collections::btree_map::IntoIter<String, DatasetDiff>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl AddAssign for RepoDiff {
    fn add_assign(&mut self, other: RepoDiff) {
        for (path, diff) in other.0 {
            *self.entry(&path) += diff;
        }
    }
}

impl Serialize for RepoDiff {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter())
    }
}
