//! Repository object model.

mod repo_objects;

pub use repo_objects::{
    BlobEntry, Commit, CommitMetadata, CommitType, JsonError, JsonResult, ObjectId, RepoObject,
    SubtreeEntry, Tree, TreeEntry, TreeType, from_json, from_json_str, to_canonical_json,
    to_canonical_json_string,
};
