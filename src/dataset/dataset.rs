//! A single dataset within a snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::OnceCell;

use super::error::{DatasetError, Result};
use super::path_codec::{
    DatasetFormat, DecodedPath, ItemKind, PathCodec, SCHEMA_META_ITEM, VERSION_META_ITEM,
};
use super::schema::Schema;
use crate::repo::{Repo, join_path};
use crate::repository::{ObjectId, to_canonical_json};

/// Parse a stored meta item. Names ending in `.json` hold JSON, others text.
pub fn meta_value_from_bytes(name: &str, bytes: &[u8]) -> Result<Value> {
    if name.ends_with(".json") {
        Ok(serde_json::from_slice(bytes)?)
    } else {
        Ok(Value::String(String::from_utf8_lossy(bytes).into_owned()))
    }
}

/// Serialize a meta item value for storage.
pub fn meta_value_to_bytes(dataset: &str, name: &str, value: &Value) -> Result<Vec<u8>> {
    if name.ends_with(".json") {
        return Ok(to_canonical_json(value)?);
    }
    match value {
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        other => Err(DatasetError::InvalidRecord {
            dataset: dataset.to_string(),
            message: format!("meta item {} must be text, got {}", name, other),
        }),
    }
}

/// Build the record codec for a format and (for tables) its schema.
pub fn codec_for(dataset: &str, format: DatasetFormat, schema: Option<&Schema>) -> Result<PathCodec> {
    if !format.has_schema() {
        return Ok(PathCodec::for_tiles());
    }
    let schema = schema.ok_or_else(|| DatasetError::Schema {
        dataset: dataset.to_string(),
        message: format!("missing {} meta item", SCHEMA_META_ITEM),
    })?;
    let pk = schema.primary_key(dataset)?;
    Ok(PathCodec::new(format, pk.name.clone(), Some(pk.data_type.clone())))
}

/// A dataset: a subtree holding meta items and records in one [`DatasetFormat`].
///
/// Meta items and the record codec are read lazily and cached for the
/// lifetime of the handle.
pub struct Dataset {
    repo: Arc<Repo>,
    path: String,
    tree: ObjectId,
    format: DatasetFormat,
    meta: OnceCell<Arc<BTreeMap<String, Value>>>,
    codec: OnceCell<PathCodec>,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("path", &self.path)
            .field("tree", &self.tree)
            .field("format", &self.format)
            .finish()
    }
}

impl Dataset {
    /// Create a handle for the dataset whose inner (format directory) tree is `tree`.
    pub fn new(repo: Arc<Repo>, path: impl Into<String>, tree: ObjectId, format: DatasetFormat) -> Self {
        Self {
            repo,
            path: path.into(),
            tree,
            format,
            meta: OnceCell::new(),
            codec: OnceCell::new(),
        }
    }

    pub fn repo(&self) -> &Arc<Repo> {
        &self.repo
    }

    /// The dataset's path within the repository tree.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The ID of the dataset's format directory tree.
    pub fn tree(&self) -> &ObjectId {
        &self.tree
    }

    pub fn format(&self) -> DatasetFormat {
        self.format
    }

    /// The kind of record this dataset stores.
    pub fn item_kind(&self) -> ItemKind {
        self.format.item_kind()
    }

    /// The repository path of the format directory.
    pub fn inner_path(&self) -> String {
        join_path(&self.path, self.format.dirname())
    }

    /// The repository path of a dataset-relative path.
    pub fn full_path(&self, rel: &str) -> String {
        join_path(&self.inner_path(), rel)
    }

    // =========================================================================
    // Meta items
    // =========================================================================

    /// All meta items by name, excluding the hidden version marker.
    pub async fn meta_items(&self) -> Result<Arc<BTreeMap<String, Value>>> {
        self.meta
            .get_or_try_init(|| async {
                let mut items = BTreeMap::new();
                if let Some(meta_tree) = self.repo.subtree_at(&self.tree, "meta").await? {
                    for (name, blob) in self.repo.list_blobs(&meta_tree).await? {
                        if name == VERSION_META_ITEM {
                            continue;
                        }
                        let bytes = self.repo.read_blob(&blob).await?;
                        let value = meta_value_from_bytes(&name, &bytes)?;
                        items.insert(name, value);
                    }
                }
                Ok::<_, DatasetError>(Arc::new(items))
            })
            .await
            .cloned()
    }

    pub async fn get_meta_item(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.meta_items().await?.get(name).cloned())
    }

    /// The table schema, if this dataset has one.
    pub async fn schema(&self) -> Result<Option<Schema>> {
        match self.get_meta_item(SCHEMA_META_ITEM).await? {
            Some(value) => Ok(Some(Schema::from_value(&self.path, &value)?)),
            None => Ok(None),
        }
    }

    /// The record codec, derived from the schema for tables.
    pub async fn codec(&self) -> Result<&PathCodec> {
        self.codec
            .get_or_try_init(|| async {
                let schema = self.schema().await?;
                codec_for(&self.path, self.format, schema.as_ref())
            })
            .await
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Decode a dataset-relative path.
    pub async fn decode_path(&self, rel: &str) -> Result<DecodedPath> {
        self.codec().await?.decode(rel)
    }

    /// Parse a stored record blob.
    pub async fn read_record(&self, blob: &ObjectId) -> Result<Value> {
        let bytes = self.repo.read_blob(blob).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Look up an item by kind and string identity.
    pub async fn get_item(&self, kind: ItemKind, identity: &str) -> Result<Option<Value>> {
        if kind == ItemKind::Meta {
            return self.get_meta_item(identity).await;
        }
        let codec = self.codec().await?;
        let key = codec.key_from_identity(identity)?;
        self.get_record(&key).await
    }

    /// Look up a record by typed key.
    pub async fn get_record(&self, key: &Value) -> Result<Option<Value>> {
        let rel = self.codec().await?.encode(key)?;
        match self.repo.read_blob_at(&self.tree, &rel).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every record in the dataset, keyed by identity.
    pub async fn records(&self) -> Result<BTreeMap<String, Value>> {
        let codec = self.codec().await?;
        let mut records = BTreeMap::new();
        for (rel, blob) in self.repo.list_blobs(&self.tree).await? {
            match codec.decode(&rel) {
                Ok(DecodedPath::Item(_, key)) => {
                    let identity = super::path_codec::identity_of(&key);
                    records.insert(identity, self.read_record(&blob).await?);
                }
                Ok(DecodedPath::Meta(_)) | Err(DatasetError::NotADataRecord(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::caches::NoopCache;
    use crate::repo::TreeOp;
    use serde_json::json;

    async fn table_dataset() -> Dataset {
        let repo = Arc::new(Repo::new(MemoryBackend::new(), NoopCache));
        let codec = PathCodec::new(DatasetFormat::TableV2, "id", Some("INTEGER".into()));
        let schema = json!([{"name": "id", "dataType": "INTEGER", "primaryKeyIndex": 0}]);

        let mut ops = Vec::new();
        for (path, value) in [
            ("meta/schema.json".to_string(), schema),
            ("meta/title".to_string(), json!("Roads")),
            (codec.encode(&json!(1)).unwrap(), json!({"id": 1, "x": 10})),
        ] {
            let bytes = if path == "meta/title" {
                b"Roads".to_vec()
            } else {
                to_canonical_json(&value).unwrap()
            };
            let blob = repo.write_blob(&bytes).await.unwrap();
            ops.push(TreeOp::Insert { path, blob });
        }
        let version = repo.write_blob(b"{\"version\":\"table/2\"}").await.unwrap();
        ops.push(TreeOp::Insert {
            path: "meta/version".to_string(),
            blob: version,
        });
        let tree = repo.build_tree(None, ops).await.unwrap();
        Dataset::new(repo, "roads", tree, DatasetFormat::TableV2)
    }

    #[tokio::test]
    async fn test_meta_items_hide_version() {
        let ds = table_dataset().await;
        let items = ds.meta_items().await.unwrap();
        assert_eq!(items.keys().cloned().collect::<Vec<_>>(), vec!["schema.json", "title"]);
        assert_eq!(items["title"], json!("Roads"));
        assert_eq!(ds.codec().await.unwrap().key_field(), "id");
    }

    #[tokio::test]
    async fn test_get_item() {
        let ds = table_dataset().await;
        assert_eq!(
            ds.get_item(ItemKind::Feature, "1").await.unwrap(),
            Some(json!({"id": 1, "x": 10}))
        );
        assert_eq!(ds.get_item(ItemKind::Feature, "2").await.unwrap(), None);
        assert!(ds.get_item(ItemKind::Feature, "abc").await.is_err());
        assert_eq!(
            ds.get_item(ItemKind::Meta, "title").await.unwrap(),
            Some(json!("Roads"))
        );
        let records = ds.records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(ds.inner_path(), "roads/.table-dataset");
    }

    #[test]
    fn test_meta_value_bytes() {
        assert_eq!(meta_value_from_bytes("a.json", b"[1]").unwrap(), json!([1]));
        assert_eq!(meta_value_from_bytes("title", b"[1]").unwrap(), json!("[1]"));
        assert!(meta_value_to_bytes("ds", "title", &json!(1)).is_err());
        assert_eq!(meta_value_to_bytes("ds", "title", &json!("t")).unwrap(), b"t");
    }

    #[test]
    fn test_codec_for_requires_schema() {
        assert!(codec_for("ds", DatasetFormat::TableV2, None).is_err());
        assert_eq!(
            codec_for("ds", DatasetFormat::PointCloudV1, None).unwrap(),
            PathCodec::for_tiles()
        );
    }
}
