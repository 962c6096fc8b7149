//! Listing the unresolved conflicts of a suspended merge.
//!
//! Conflicts are grouped as dataset, then item kind, then identity, then
//! version. Meta items sort before records and numeric identities sort
//! numerically.

use std::fmt::Write as _;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::dataset::meta_value_from_bytes;
use crate::diff::RepoKeyFilter;
use crate::merge::error::Result;
use crate::merge::merged_index::MergedIndex;
use crate::merge::types::Conflict;
use crate::repo::Repo;

/// How much of each conflict to list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// 0 lists every version, 1 lists labels only, 2 lists counts only.
    pub summarise: u8,
    /// Key every entry by its full label instead of nesting.
    pub flat: bool,
}

/// One level of the conflicts listing.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictNode {
    /// The content of one version.
    Value(Value),
    Names(Vec<String>),
    Count(usize),
    /// Ordered children.
    Branch(Vec<(String, ConflictNode)>),
}

impl Serialize for ConflictNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ConflictNode::Value(value) => value.serialize(serializer),
            ConflictNode::Names(names) => {
                let mut seq = serializer.serialize_seq(Some(names.len()))?;
                for name in names {
                    seq.serialize_element(name)?;
                }
                seq.end()
            }
            ConflictNode::Count(count) => serializer.serialize_u64(*count as u64),
            ConflictNode::Branch(children) => {
                let mut map = serializer.serialize_map(Some(children.len()))?;
                for (key, child) in children {
                    map.serialize_entry(key, child)?;
                }
                map.end()
            }
        }
    }
}

impl ConflictNode {
    fn child_mut<'a>(
        children: &'a mut Vec<(String, ConflictNode)>,
        key: &str,
    ) -> &'a mut ConflictNode {
        let pos = match children.iter().position(|(k, _)| k == key) {
            Some(pos) => pos,
            None => {
                children.push((key.to_string(), ConflictNode::Branch(Vec::new())));
                children.len() - 1
            }
        };
        &mut children[pos].1
    }

    fn insert(&mut self, parts: &[String], leaf: ConflictNode) {
        let ConflictNode::Branch(children) = self else {
            return;
        };
        match parts {
            [] => {}
            [last] => children.push((last.clone(), leaf)),
            [first, rest @ ..] => Self::child_mut(children, first).insert(rest, leaf),
        }
    }

    /// Replace each group of conflicts with their names or their count.
    fn summarise(self, level: u8) -> ConflictNode {
        let ConflictNode::Branch(children) = self else {
            return self;
        };
        let all_leaves = children.iter().all(|(_, c)| !matches!(c, ConflictNode::Branch(_)));
        if all_leaves && !children.is_empty() {
            return match level {
                1 => ConflictNode::Names(children.into_iter().map(|(k, _)| k).collect()),
                _ => ConflictNode::Count(children.len()),
            };
        }
        ConflictNode::Branch(
            children
                .into_iter()
                .map(|(key, child)| match child {
                    ConflictNode::Branch(_) => (key, child.summarise(level)),
                    _ if level == 1 => (key.clone(), ConflictNode::Names(vec![key])),
                    _ => (key, ConflictNode::Count(1)),
                })
                .collect(),
        )
    }
}

// =============================================================================
// Ordering
// =============================================================================

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum PartKey {
    Meta,
    Kind(String),
    Number(u128),
    Text(String),
    /// Parts naming several paths sort last.
    Compound(String),
}

fn part_key(part: &str) -> PartKey {
    match part {
        "meta" => PartKey::Meta,
        "feature" | "tile" => PartKey::Kind(part.to_string()),
        _ if part.contains(',') => PartKey::Compound(part.to_string()),
        _ if !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) => part
            .parse()
            .map(PartKey::Number)
            .unwrap_or_else(|_| PartKey::Text(part.to_string())),
        _ => PartKey::Text(part.to_string()),
    }
}

fn label_parts(conflict: &Conflict) -> Vec<String> {
    match (&conflict.dataset, conflict.kind) {
        (Some(ds), Some(kind)) => vec![ds.clone(), kind.to_string(), conflict.identity.clone()],
        _ => vec![conflict.identity.clone()],
    }
}

fn matches_filter(conflict: &Conflict, filter: &RepoKeyFilter) -> bool {
    if matches!(filter, RepoKeyFilter::MatchAll) {
        return true;
    }
    match (&conflict.dataset, conflict.kind) {
        (Some(ds), Some(kind)) => {
            filter.matches_dataset(ds) && filter.dataset(ds).matches(kind, &conflict.identity)
        }
        _ => false,
    }
}

// =============================================================================
// Listing
// =============================================================================

async fn version_values(repo: &Repo, conflict: &Conflict) -> Result<Vec<(String, Value)>> {
    let mut values = Vec::new();
    for (version, entry) in conflict.versions.iter() {
        let Some(entry) = entry else { continue };
        let bytes = repo.read_blob(&entry.blob).await?;
        let value = if conflict.is_meta() {
            meta_value_from_bytes(&conflict.identity, &bytes)?
        } else if conflict.dataset.is_some() {
            serde_json::from_slice(&bytes).map_err(crate::dataset::DatasetError::from)?
        } else {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        };
        values.push((version.to_string(), value));
    }
    Ok(values)
}

/// List the unresolved conflicts matching `filter`.
pub async fn list_conflicts(
    repo: &Repo,
    index: &MergedIndex,
    filter: &RepoKeyFilter,
    options: ListOptions,
) -> Result<ConflictNode> {
    let mut conflicts: Vec<&Conflict> = index
        .unresolved_conflicts()
        .map(|(_, c)| c)
        .filter(|c| matches_filter(c, filter))
        .collect();
    conflicts.sort_by_cached_key(|c| {
        label_parts(c)
            .iter()
            .map(|p| part_key(p))
            .collect::<Vec<_>>()
    });

    if options.flat {
        return Ok(match options.summarise {
            0 => {
                let mut entries = Vec::new();
                for conflict in conflicts {
                    let label = conflict.label();
                    for (version, value) in version_values(repo, conflict).await? {
                        entries.push((format!("{}:{}", label, version), ConflictNode::Value(value)));
                    }
                }
                ConflictNode::Branch(entries)
            }
            1 => ConflictNode::Names(conflicts.iter().map(|c| c.label()).collect()),
            _ => ConflictNode::Count(conflicts.len()),
        });
    }

    let mut root = ConflictNode::Branch(Vec::new());
    for conflict in conflicts {
        let leaf = if options.summarise == 0 {
            let versions = version_values(repo, conflict).await?;
            ConflictNode::Branch(
                versions
                    .into_iter()
                    .map(|(v, value)| (v, ConflictNode::Value(value)))
                    .collect(),
            )
        } else {
            ConflictNode::Count(1)
        };
        root.insert(&label_parts(conflict), leaf);
    }
    Ok(match options.summarise {
        0 => root,
        level => root.summarise(level),
    })
}

// =============================================================================
// Text output
// =============================================================================

fn value_text(value: &Value, level: usize) -> String {
    let indent = "    ".repeat(level);
    match value {
        Value::String(s) => format!("{}\n", s),
        Value::Object(fields) => {
            let mut out = String::new();
            for (name, field) in fields {
                let _ = writeln!(out, "{}{} = {}", indent, name, field);
            }
            out
        }
        other => format!("{}{}\n", indent, other),
    }
}

fn node_text(node: &ConflictNode, path: &str, level: usize) -> String {
    match node {
        ConflictNode::Value(value) => value_text(value, level),
        ConflictNode::Count(count) => format!("{} conflicts\n", count),
        ConflictNode::Names(names) => {
            let indent = "    ".repeat(level);
            names
                .iter()
                .map(|name| format!("{}{}{}\n", indent, path, name))
                .collect()
        }
        ConflictNode::Branch(children) => {
            let separator = if level == 0 { "\n" } else { "" };
            children
                .iter()
                .map(|(key, child)| item_text(key, child, path, level))
                .collect::<Vec<_>>()
                .join(separator)
        }
    }
}

fn item_text(key: &str, child: &ConflictNode, path: &str, level: usize) -> String {
    let key_text = format!("{}{}:", path, key);
    let child_text = node_text(child, &key_text, level + 1);
    let indent = "    ".repeat(level);
    match child {
        ConflictNode::Count(_) => format!("{}{} {}", indent, key_text, child_text),
        _ => format!("{}{}\n{}", indent, key_text, child_text),
    }
}

/// Render a listing as indented text.
pub fn conflicts_as_text(node: &ConflictNode) -> String {
    node_text(node, "", 0)
}
