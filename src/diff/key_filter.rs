//! Filters restricting a diff to datasets, item kinds and identities.
//!
//! Filters are parsed from strings of the form `dataset`, `dataset:kind`,
//! `dataset:kind:key` or `dataset:key`; the last form matches a record
//! (feature or tile) key.

use std::collections::{BTreeMap, BTreeSet};

use super::error::{DiffError, Result};
use crate::dataset::ItemKind;

/// Matches identities of one item kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyFilter {
    #[default]
    MatchAll,
    Keys(BTreeSet<String>),
}

impl KeyFilter {
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyFilter::MatchAll => true,
            KeyFilter::Keys(keys) => keys.contains(key),
        }
    }

    fn add_key(&mut self, key: &str) {
        if let KeyFilter::Keys(keys) = self {
            keys.insert(key.to_string());
        }
    }
}

/// Matches items within one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DatasetKeyFilter {
    #[default]
    MatchAll,
    /// Only the listed kinds, each with its own key filter.
    Kinds(BTreeMap<ItemKind, KeyFilter>),
}

static MATCH_ALL_DATASET: DatasetKeyFilter = DatasetKeyFilter::MatchAll;

impl DatasetKeyFilter {
    /// Returns true if any item of `kind` can match.
    pub fn includes_kind(&self, kind: ItemKind) -> bool {
        match self {
            DatasetKeyFilter::MatchAll => true,
            DatasetKeyFilter::Kinds(kinds) => kinds.contains_key(&kind),
        }
    }

    pub fn matches(&self, kind: ItemKind, key: &str) -> bool {
        match self {
            DatasetKeyFilter::MatchAll => true,
            DatasetKeyFilter::Kinds(kinds) => kinds.get(&kind).is_some_and(|f| f.matches(key)),
        }
    }

    fn add(&mut self, kind: ItemKind, key: Option<&str>) {
        let DatasetKeyFilter::Kinds(kinds) = self else {
            return;
        };
        match key {
            None => {
                kinds.insert(kind, KeyFilter::MatchAll);
            }
            Some(key) => kinds
                .entry(kind)
                .or_insert_with(|| KeyFilter::Keys(BTreeSet::new()))
                .add_key(key),
        }
    }
}

/// Matches items across a repository.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RepoKeyFilter {
    #[default]
    MatchAll,
    Datasets(BTreeMap<String, DatasetKeyFilter>),
}

impl RepoKeyFilter {
    /// Parse a list of filter strings. An empty list matches everything.
    pub fn parse<S: AsRef<str>>(filters: &[S]) -> Result<Self> {
        if filters.is_empty() {
            return Ok(RepoKeyFilter::MatchAll);
        }

        let mut datasets: BTreeMap<String, DatasetKeyFilter> = BTreeMap::new();
        for filter in filters {
            let filter = filter.as_ref();
            let invalid = |reason: &str| DiffError::InvalidFilter {
                filter: filter.to_string(),
                reason: reason.to_string(),
            };

            let mut parts = filter.splitn(3, ':');
            let dataset = parts.next().unwrap_or_default().trim_matches('/');
            if dataset.is_empty() {
                return Err(invalid("missing dataset path"));
            }
            let second = parts.next();
            let third = parts.next();

            let ds_filter = datasets
                .entry(dataset.to_string())
                .or_insert_with(|| DatasetKeyFilter::Kinds(BTreeMap::new()));

            match (second, third) {
                (None, _) => *ds_filter = DatasetKeyFilter::MatchAll,
                (Some(""), _) => return Err(invalid("empty item kind or key")),
                (Some(second), None) => match ItemKind::parse(second) {
                    Some(kind) => ds_filter.add(kind, None),
                    None => {
                        ds_filter.add(ItemKind::Feature, Some(second));
                        ds_filter.add(ItemKind::Tile, Some(second));
                    }
                },
                (Some(second), Some(key)) => {
                    let kind = ItemKind::parse(second)
                        .ok_or_else(|| invalid(&format!("unknown item kind {:?}", second)))?;
                    if key.is_empty() {
                        return Err(invalid("empty key"));
                    }
                    ds_filter.add(kind, Some(key));
                }
            }
        }
        Ok(RepoKeyFilter::Datasets(datasets))
    }

    pub fn matches_dataset(&self, dataset: &str) -> bool {
        match self {
            RepoKeyFilter::MatchAll => true,
            RepoKeyFilter::Datasets(datasets) => datasets.contains_key(dataset),
        }
    }

    /// The filter for one dataset. Datasets not named match nothing, so
    /// callers check [`RepoKeyFilter::matches_dataset`] first.
    pub fn dataset(&self, dataset: &str) -> &DatasetKeyFilter {
        match self {
            RepoKeyFilter::MatchAll => &MATCH_ALL_DATASET,
            RepoKeyFilter::Datasets(datasets) => {
                datasets.get(dataset).unwrap_or(&MATCH_ALL_DATASET)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_matches_all() {
        let filter = RepoKeyFilter::parse::<&str>(&[]).unwrap();
        assert!(filter.matches_dataset("anything"));
        assert!(filter.dataset("anything").matches(ItemKind::Feature, "1"));
    }

    #[test]
    fn test_parse_forms() {
        let filter =
            RepoKeyFilter::parse(&["roads:feature:1", "roads:feature:2", "rivers", "lakes:meta", "pts:7"])
                .unwrap();
        assert!(!filter.matches_dataset("other"));

        let roads = filter.dataset("roads");
        assert!(roads.matches(ItemKind::Feature, "1"));
        assert!(roads.matches(ItemKind::Feature, "2"));
        assert!(!roads.matches(ItemKind::Feature, "3"));
        assert!(!roads.matches(ItemKind::Meta, "schema.json"));
        assert!(!roads.includes_kind(ItemKind::Meta));

        assert_eq!(filter.dataset("rivers"), &DatasetKeyFilter::MatchAll);

        let lakes = filter.dataset("lakes");
        assert!(lakes.matches(ItemKind::Meta, "title"));
        assert!(!lakes.matches(ItemKind::Feature, "1"));

        let pts = filter.dataset("pts");
        assert!(pts.matches(ItemKind::Feature, "7"));
        assert!(pts.matches(ItemKind::Tile, "7"));
    }

    #[test]
    fn test_whole_kind_overrides_keys() {
        let filter = RepoKeyFilter::parse(&["roads:feature:1", "roads:feature"]).unwrap();
        assert!(filter.dataset("roads").matches(ItemKind::Feature, "99"));

        let filter = RepoKeyFilter::parse(&["roads:feature", "roads:feature:1"]).unwrap();
        assert!(filter.dataset("roads").matches(ItemKind::Feature, "99"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(RepoKeyFilter::parse(&[":feature"]).is_err());
        assert!(RepoKeyFilter::parse(&["roads:bogus:1"]).is_err());
        assert!(RepoKeyFilter::parse(&["roads:feature:"]).is_err());
    }
}
