//! Repository object types for tabletree storage.
//!
//! Structural objects (trees and commits) are stored as canonical JSON
//! (RFC 8785) and addressed by the sha-256 of that encoding. Record blobs
//! are stored as raw bytes and are not represented here.

use serde::{Deserialize, Serialize};

/// Object ID is a sha-256 hash represented as a lowercase hexadecimal string.
pub type ObjectId = String;

// =============================================================================
// Tree
// =============================================================================

/// A tree node holding its entries inline, sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    /// Type discriminator, always "Tree".
    #[serde(rename = "type")]
    pub type_tag: TreeType,
    /// Entries sorted by name, names unique.
    pub entries: Vec<TreeEntry>,
}

/// Type tag for Tree objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeType {
    Tree,
}

impl Tree {
    /// An empty tree.
    pub fn empty() -> Self {
        Tree {
            type_tag: TreeType::Tree,
            entries: Vec::new(),
        }
    }

    /// Look up an entry by name.
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.name().cmp(name))
            .ok()
            .map(|idx| &self.entries[idx])
    }
}

/// An entry within a tree - either a blob or a subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TreeEntry {
    /// A leaf holding record or meta-item content.
    Blob(BlobEntry),
    /// A nested tree.
    Tree(SubtreeEntry),
}

impl TreeEntry {
    /// The entry's name within its parent tree.
    pub fn name(&self) -> &str {
        match self {
            TreeEntry::Blob(b) => &b.name,
            TreeEntry::Tree(t) => &t.name,
        }
    }

    /// The object ID the entry points at.
    pub fn id(&self) -> &ObjectId {
        match self {
            TreeEntry::Blob(b) => &b.blob,
            TreeEntry::Tree(t) => &t.tree,
        }
    }

    /// Returns true if this entry is a subtree.
    pub fn is_tree(&self) -> bool {
        matches!(self, TreeEntry::Tree(_))
    }
}

/// A blob entry within a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobEntry {
    /// Name of the blob.
    pub name: String,
    /// Object ID of the blob content.
    pub blob: ObjectId,
}

/// A subtree entry within a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtreeEntry {
    /// Name of the subtree.
    pub name: String,
    /// Object ID of the Tree object.
    pub tree: ObjectId,
}

// =============================================================================
// Commit
// =============================================================================

/// A commit representing a version of the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Type discriminator, always "Commit".
    #[serde(rename = "type")]
    pub type_tag: CommitType,
    /// Object ID of the root Tree of this version.
    pub tree: ObjectId,
    /// Object IDs of parent commits (empty for initial commit, two for merges).
    pub parents: Vec<ObjectId>,
    /// Optional metadata about the commit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CommitMetadata>,
}

/// Type tag for Commit objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitType {
    Commit,
}

/// Optional metadata for a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CommitMetadata {
    /// Commit time in RFC 3339 format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Author of the changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Commit message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Commit {
    /// The commit message, or an empty string.
    pub fn message(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|m| m.message.as_deref())
            .unwrap_or("")
    }
}

// =============================================================================
// RepoObject
// =============================================================================

/// Any structural object stored in the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepoObject {
    /// A tree node.
    Tree(Tree),
    /// A commit.
    Commit(Commit),
}

impl RepoObject {
    /// Returns the type name of this object as it appears in JSON.
    pub fn type_name(&self) -> &'static str {
        match self {
            RepoObject::Tree(_) => "Tree",
            RepoObject::Commit(_) => "Commit",
        }
    }
}

// =============================================================================
// JSON Conversion Functions
// =============================================================================

/// Error type for JSON operations.
#[derive(Debug)]
pub enum JsonError {
    /// Serialization error.
    Serialize(serde_json::Error),
    /// Deserialization error.
    Deserialize(serde_json::Error),
}

impl std::fmt::Display for JsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonError::Serialize(e) => write!(f, "JSON serialization error: {}", e),
            JsonError::Deserialize(e) => write!(f, "JSON deserialization error: {}", e),
        }
    }
}

impl std::error::Error for JsonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JsonError::Serialize(e) | JsonError::Deserialize(e) => Some(e),
        }
    }
}

/// Result type for JSON operations.
pub type JsonResult<T> = std::result::Result<T, JsonError>;

/// Deserialize a repository object from JSON bytes.
pub fn from_json<T: for<'de> Deserialize<'de>>(json: &[u8]) -> JsonResult<T> {
    serde_json::from_slice(json).map_err(JsonError::Deserialize)
}

/// Deserialize a repository object from a JSON string.
pub fn from_json_str<T: for<'de> Deserialize<'de>>(json: &str) -> JsonResult<T> {
    serde_json::from_str(json).map_err(JsonError::Deserialize)
}

/// Serialize a value to canonical JSON (RFC 8785).
///
/// Canonical JSON has no whitespace and sorts object keys, so equal values
/// always produce equal bytes and therefore equal object IDs.
pub fn to_canonical_json<T: Serialize>(value: &T) -> JsonResult<Vec<u8>> {
    serde_json_canonicalizer::to_vec(value).map_err(JsonError::Serialize)
}

/// Serialize a value to a canonical JSON string.
pub fn to_canonical_json_string<T: Serialize>(value: &T) -> JsonResult<String> {
    serde_json_canonicalizer::to_string(value).map_err(JsonError::Serialize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Tree {
        Tree {
            type_tag: TreeType::Tree,
            entries: vec![
                TreeEntry::Tree(SubtreeEntry {
                    name: ".table-dataset".to_string(),
                    tree: "t1".to_string(),
                }),
                TreeEntry::Blob(BlobEntry {
                    name: "README".to_string(),
                    blob: "b1".to_string(),
                }),
            ],
        }
    }

    #[test]
    fn test_tree_entry_serialization() {
        let json = to_canonical_json_string(&sample_tree()).unwrap();
        assert!(json.contains("\"type\":\"Blob\""));
        assert!(json.contains("\"type\":\"Tree\""));

        let parsed: Tree = from_json_str(&json).unwrap();
        assert_eq!(parsed, sample_tree());
    }

    #[test]
    fn test_tree_get() {
        let tree = sample_tree();
        assert_eq!(tree.get("README").unwrap().id(), "b1");
        assert!(tree.get(".table-dataset").unwrap().is_tree());
        assert!(tree.get("missing").is_none());
    }

    #[test]
    fn test_canonical_json_key_ordering() {
        let commit = Commit {
            type_tag: CommitType::Commit,
            tree: "tree123".to_string(),
            parents: vec!["parent1".to_string()],
            metadata: None,
        };

        let json = to_canonical_json_string(&commit).unwrap();

        // Keys should be sorted: parents, tree, type
        let parents_pos = json.find("\"parents\"").unwrap();
        let tree_pos = json.find("\"tree\"").unwrap();
        let type_pos = json.find("\"type\"").unwrap();

        assert!(parents_pos < tree_pos);
        assert!(tree_pos < type_pos);
        assert!(!json.contains(' '));
    }

    #[test]
    fn test_repo_object_deserialization() {
        let tree_json = r#"{"type":"Tree","entries":[]}"#;
        let obj: RepoObject = from_json_str(tree_json).unwrap();
        assert!(matches!(obj, RepoObject::Tree(_)));

        let commit_json = r#"{"type":"Commit","tree":"abc","parents":["parent1"]}"#;
        let obj: RepoObject = from_json_str(commit_json).unwrap();
        assert!(matches!(obj, RepoObject::Commit(_)));
        assert_eq!(obj.type_name(), "Commit");
    }

    #[test]
    fn test_commit_message() {
        let commit = Commit {
            type_tag: CommitType::Commit,
            tree: "t".to_string(),
            parents: vec![],
            metadata: Some(CommitMetadata {
                message: Some("Import".to_string()),
                ..Default::default()
            }),
        };
        assert_eq!(commit.message(), "Import");
    }
}
