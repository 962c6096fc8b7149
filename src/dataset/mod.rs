//! Datasets: versioned collections of meta items and records stored as
//! individually addressable blobs inside a snapshot tree.
//!
//! - [`PathCodec`] maps record identities to storage paths and back.
//! - [`Dataset`] reads meta items and records from one dataset subtree.
//! - [`RepoStructure`] discovers the datasets in a snapshot and applies diffs.

mod apply;
#[allow(clippy::module_inception)]
mod dataset;
mod error;
mod path_codec;
mod schema;
mod structure;

pub use apply::{DatasetApply, item_label};
pub use dataset::{Dataset, codec_for, meta_value_from_bytes, meta_value_to_bytes};
pub use error::{ApplyConflict, ApplyConflictReason, DatasetError, Result};
pub use path_codec::{
    DatasetFormat, DecodedPath, ItemKind, META_DIR, PathCodec, SCHEMA_META_ITEM,
    VERSION_META_ITEM, cast_primary_key, identity_of,
};
pub use schema::{Column, Schema};
pub use structure::{RepoStructure, sniff_format};
