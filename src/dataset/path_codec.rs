//! Mapping between record identities and storage paths.
//!
//! A dataset lives at `<dataset path>/<format dirname>/`. Below that directory:
//! - meta items: `meta/<name>`
//! - table records (V2): `feature/<h0h1>/<h2h3>/<b64>`
//! - table records (V1): `<h0h1>/<h2h3>/<b64>`
//! - point-cloud tiles: `tile/<name>`
//!
//! where `b64` is unpadded URL-safe base64 of the canonical JSON array `[pk]`
//! and `h` is the hex sha-256 of those same bytes.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::error::{DatasetError, Result};
use crate::repository::to_canonical_json;

/// Directory holding a dataset's meta items.
pub const META_DIR: &str = "meta";

/// Meta item recording the dataset format version.
pub const VERSION_META_ITEM: &str = "version";

/// Meta item holding a table dataset's column schema.
pub const SCHEMA_META_ITEM: &str = "schema.json";

// =============================================================================
// ItemKind
// =============================================================================

/// The kind of item a delta or conflict refers to.
///
/// Ordering puts meta items first, so listings and applies see schema changes
/// before the records that depend on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Meta,
    Feature,
    Tile,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Meta => "meta",
            ItemKind::Feature => "feature",
            ItemKind::Tile => "tile",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "meta" => Some(ItemKind::Meta),
            "feature" => Some(ItemKind::Feature),
            "tile" => Some(ItemKind::Tile),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// DatasetFormat
// =============================================================================

/// The closed set of on-disk dataset layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetFormat {
    TableV1,
    TableV2,
    PointCloudV1,
}

impl DatasetFormat {
    pub const ALL: [DatasetFormat; 3] = [
        DatasetFormat::TableV1,
        DatasetFormat::TableV2,
        DatasetFormat::PointCloudV1,
    ];

    /// The hidden directory that marks a tree as a dataset of this format.
    pub fn dirname(self) -> &'static str {
        match self {
            DatasetFormat::TableV1 => ".table-dataset.v1",
            DatasetFormat::TableV2 => ".table-dataset",
            DatasetFormat::PointCloudV1 => ".point-cloud-dataset.v1",
        }
    }

    /// The value stored in the `version` meta item.
    pub fn version_str(self) -> &'static str {
        match self {
            DatasetFormat::TableV1 => "table/1",
            DatasetFormat::TableV2 => "table/2",
            DatasetFormat::PointCloudV1 => "point-cloud/1",
        }
    }

    pub fn from_dirname(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.dirname() == name)
    }

    pub fn from_version_str(version: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.version_str() == version)
    }

    /// Parse a user-facing format name (`v1`, `v2`, `point-cloud-v1`).
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "v1" | "table-v1" => Some(DatasetFormat::TableV1),
            "v2" | "table-v2" | "table" => Some(DatasetFormat::TableV2),
            "point-cloud" | "point-cloud-v1" => Some(DatasetFormat::PointCloudV1),
            _ => None,
        }
    }

    /// The kind of record this format stores.
    pub fn item_kind(self) -> ItemKind {
        match self {
            DatasetFormat::TableV1 | DatasetFormat::TableV2 => ItemKind::Feature,
            DatasetFormat::PointCloudV1 => ItemKind::Tile,
        }
    }

    /// Whether records are keyed by a schema-declared primary key.
    pub fn has_schema(self) -> bool {
        self.item_kind() == ItemKind::Feature
    }
}

// =============================================================================
// Primary keys
// =============================================================================

/// Normalize a raw key to the declared column type.
///
/// Integer affinity if the type contains `INT`, string affinity if it contains
/// `TEXT`, `CHAR` or `CLOB`, otherwise the value passes through unchanged.
pub fn cast_primary_key(raw: &Value, data_type: &str) -> Result<Value> {
    let upper = data_type.to_ascii_uppercase();
    let invalid = || DatasetError::InvalidPrimaryKey {
        value: raw.to_string(),
        data_type: data_type.to_string(),
    };

    if upper.contains("INT") {
        match raw {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(raw.clone()),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    } else if ["TEXT", "CHAR", "CLOB"].iter().any(|t| upper.contains(t)) {
        match raw {
            Value::String(_) => Ok(raw.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            _ => Err(invalid()),
        }
    } else {
        Ok(raw.clone())
    }
}

/// The string identity of a primary key value.
pub fn identity_of(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// DecodedPath
// =============================================================================

/// What a dataset-relative path refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedPath {
    /// A meta item by name.
    Meta(String),
    /// A record of the given kind, with its typed key.
    Item(ItemKind, Value),
}

// =============================================================================
// PathCodec
// =============================================================================

/// Encodes record identities to dataset-relative paths and back.
///
/// `key_field` is the record field carrying the identity (the primary-key
/// column for tables, `name` for tiles). `key_type` is the declared column
/// type used to cast string identities before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCodec {
    format: DatasetFormat,
    key_field: String,
    key_type: Option<String>,
}

impl PathCodec {
    pub fn new(format: DatasetFormat, key_field: impl Into<String>, key_type: Option<String>) -> Self {
        Self {
            format,
            key_field: key_field.into(),
            key_type,
        }
    }

    /// A codec for tile datasets, keyed by the `name` field.
    pub fn for_tiles() -> Self {
        Self::new(DatasetFormat::PointCloudV1, "name", None)
    }

    pub fn format(&self) -> DatasetFormat {
        self.format
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    /// Returns true if `path` is under the meta subtree.
    pub fn is_meta_path(path: &str) -> bool {
        path.starts_with("meta/")
    }

    /// The path of a meta item.
    pub fn meta_path(name: &str) -> String {
        format!("{}/{}", META_DIR, name)
    }

    /// Cast a key (typically parsed from a string identity) to the declared type.
    pub fn cast_key(&self, raw: &Value) -> Result<Value> {
        match &self.key_type {
            Some(data_type) => cast_primary_key(raw, data_type),
            None => Ok(raw.clone()),
        }
    }

    /// Cast a string identity to a typed key.
    pub fn key_from_identity(&self, identity: &str) -> Result<Value> {
        self.cast_key(&Value::String(identity.to_string()))
    }

    /// Encode a typed key to its record path.
    pub fn encode(&self, key: &Value) -> Result<String> {
        if self.format == DatasetFormat::PointCloudV1 {
            let name = match key {
                Value::String(s) => s.as_str(),
                other => {
                    return Err(DatasetError::InvalidPrimaryKey {
                        value: other.to_string(),
                        data_type: "tile name".to_string(),
                    });
                }
            };
            if name.is_empty() || name.contains('/') || name.starts_with('.') {
                return Err(DatasetError::InvalidPrimaryKey {
                    value: name.to_string(),
                    data_type: "tile name".to_string(),
                });
            }
            return Ok(format!("tile/{}", name));
        }

        let packed = to_canonical_json(&[key])?;
        let hash = hex::encode(Sha256::digest(&packed));
        let encoded = URL_SAFE_NO_PAD.encode(&packed);
        let prefix = match self.format {
            DatasetFormat::TableV2 => "feature/",
            _ => "",
        };
        Ok(format!("{}{}/{}/{}", prefix, &hash[0..2], &hash[2..4], encoded))
    }

    /// Decode a dataset-relative path.
    ///
    /// Meta paths decode to [`DecodedPath::Meta`]. Paths outside both the meta
    /// and record namespaces fail with [`DatasetError::NotADataRecord`]; paths
    /// inside the record namespace that cannot be decoded fail with
    /// [`DatasetError::MalformedPath`].
    pub fn decode(&self, path: &str) -> Result<DecodedPath> {
        if let Some(name) = path.strip_prefix("meta/") {
            return Ok(DecodedPath::Meta(name.to_string()));
        }

        match self.format {
            DatasetFormat::PointCloudV1 => match path.strip_prefix("tile/") {
                Some(name) if !name.is_empty() && !name.contains('/') => Ok(DecodedPath::Item(
                    ItemKind::Tile,
                    Value::String(name.to_string()),
                )),
                Some(_) => Err(self.malformed(path, "tile names cannot contain '/'")),
                None => Err(DatasetError::NotADataRecord(path.to_string())),
            },
            DatasetFormat::TableV2 => match path.strip_prefix("feature/") {
                Some(rest) => self.decode_hashed(path, rest),
                None => Err(DatasetError::NotADataRecord(path.to_string())),
            },
            DatasetFormat::TableV1 => {
                let parts: Vec<&str> = path.split('/').collect();
                let looks_hashed = parts.len() == 3
                    && parts[..2]
                        .iter()
                        .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()));
                if looks_hashed {
                    self.decode_hashed(path, path)
                } else {
                    Err(DatasetError::NotADataRecord(path.to_string()))
                }
            }
        }
    }

    fn decode_hashed(&self, path: &str, rest: &str) -> Result<DecodedPath> {
        let parts: Vec<&str> = rest.split('/').collect();
        let [h1, h2, encoded] = parts.as_slice() else {
            return Err(self.malformed(path, "expected <hash>/<hash>/<key>"));
        };
        let packed = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| self.malformed(path, &format!("bad base64: {}", e)))?;
        let hash = hex::encode(Sha256::digest(&packed));
        if hash[0..2] != **h1 || hash[2..4] != **h2 {
            return Err(self.malformed(path, "hash prefix does not match key"));
        }
        let values: Vec<Value> = serde_json::from_slice(&packed)
            .map_err(|e| self.malformed(path, &format!("bad key encoding: {}", e)))?;
        match <[Value; 1]>::try_from(values) {
            Ok([key]) => Ok(DecodedPath::Item(ItemKind::Feature, key)),
            Err(_) => Err(self.malformed(path, "only single-column primary keys are supported")),
        }
    }

    fn malformed(&self, path: &str, reason: &str) -> DatasetError {
        DatasetError::MalformedPath {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// The identity of a record, read from its key field.
    pub fn record_identity(&self, record: &Value) -> Result<(Value, String)> {
        let raw = record.get(&self.key_field).ok_or_else(|| DatasetError::InvalidRecord {
            dataset: String::new(),
            message: format!("record has no '{}' field", self.key_field),
        })?;
        let key = self.cast_key(raw)?;
        let identity = identity_of(&key);
        Ok((key, identity))
    }

    /// A content fingerprint used only for pairing deletes with inserts.
    ///
    /// Feature records are hashed canonically with their key field removed,
    /// so the same content stored under a different identity fingerprints
    /// equally. Tiles are hashed whole.
    pub fn fingerprint(&self, record: &Value) -> Result<String> {
        if self.format.item_kind() == ItemKind::Tile {
            return Ok(hex::encode(Sha256::digest(to_canonical_json(record)?)));
        }
        let mut content = record.clone();
        if let Value::Object(map) = &mut content {
            map.remove(&self.key_field);
        }
        Ok(hex::encode(Sha256::digest(to_canonical_json(&content)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn int_codec(format: DatasetFormat) -> PathCodec {
        PathCodec::new(format, "id", Some("INTEGER".to_string()))
    }

    #[test]
    fn test_cast_primary_key() {
        assert_eq!(cast_primary_key(&json!("5"), "INTEGER").unwrap(), json!(5));
        assert_eq!(cast_primary_key(&json!(5), "BIGINT").unwrap(), json!(5));
        assert!(cast_primary_key(&json!("five"), "INTEGER").is_err());
        assert!(cast_primary_key(&json!(1.5), "INTEGER").is_err());
        assert_eq!(cast_primary_key(&json!(5), "TEXT").unwrap(), json!("5"));
        assert_eq!(cast_primary_key(&json!("abc"), "VARCHAR(10)").unwrap(), json!("abc"));
        assert_eq!(cast_primary_key(&json!("abc"), "CLOB").unwrap(), json!("abc"));
        assert_eq!(cast_primary_key(&json!(1.5), "REAL").unwrap(), json!(1.5));
    }

    #[test]
    fn test_encode_decode_v2() {
        let codec = int_codec(DatasetFormat::TableV2);
        let path = codec.encode(&json!(5)).unwrap();
        assert!(path.starts_with("feature/"));
        assert_eq!(path.split('/').count(), 4);
        assert_eq!(
            codec.decode(&path).unwrap(),
            DecodedPath::Item(ItemKind::Feature, json!(5))
        );
    }

    #[test]
    fn test_encode_decode_v1() {
        let codec = PathCodec::new(DatasetFormat::TableV1, "code", Some("TEXT".to_string()));
        let path = codec.encode(&json!("AB-12")).unwrap();
        assert_eq!(path.split('/').count(), 3);
        assert_eq!(
            codec.decode(&path).unwrap(),
            DecodedPath::Item(ItemKind::Feature, json!("AB-12"))
        );
    }

    #[test]
    fn test_encoding_is_injective_and_type_sensitive() {
        let codec = PathCodec::new(DatasetFormat::TableV2, "id", None);
        let int_path = codec.encode(&json!(1)).unwrap();
        let str_path = codec.encode(&json!("1")).unwrap();
        assert_ne!(int_path, str_path);
        assert_ne!(codec.encode(&json!(2)).unwrap(), int_path);
    }

    #[test]
    fn test_decode_meta_and_non_records() {
        let codec = int_codec(DatasetFormat::TableV2);
        assert_eq!(
            codec.decode("meta/schema.json").unwrap(),
            DecodedPath::Meta("schema.json".to_string())
        );
        assert!(matches!(
            codec.decode("README.md"),
            Err(DatasetError::NotADataRecord(_))
        ));

        let v1 = int_codec(DatasetFormat::TableV1);
        assert!(matches!(
            v1.decode("attachments/logo.png"),
            Err(DatasetError::NotADataRecord(_))
        ));
    }

    #[test]
    fn test_decode_malformed_record_paths() {
        let codec = int_codec(DatasetFormat::TableV2);
        assert!(matches!(
            codec.decode("feature/00/00/!!!"),
            Err(DatasetError::MalformedPath { .. })
        ));

        // Valid key under the wrong hash directory
        let good = codec.encode(&json!(5)).unwrap();
        let key = good.rsplit('/').next().unwrap();
        let bad = format!("feature/zz/zz/{}", key);
        assert!(matches!(
            codec.decode(&bad),
            Err(DatasetError::MalformedPath { .. })
        ));
    }

    #[test]
    fn test_tiles() {
        let codec = PathCodec::for_tiles();
        assert_eq!(codec.encode(&json!("tile_1.laz")).unwrap(), "tile/tile_1.laz");
        assert_eq!(
            codec.decode("tile/tile_1.laz").unwrap(),
            DecodedPath::Item(ItemKind::Tile, json!("tile_1.laz"))
        );
        assert!(codec.encode(&json!("a/b")).is_err());
        assert!(matches!(
            codec.decode("other/x"),
            Err(DatasetError::NotADataRecord(_))
        ));
    }

    #[test]
    fn test_fingerprint_ignores_key_field() {
        let codec = int_codec(DatasetFormat::TableV2);
        let a = codec.fingerprint(&json!({"id": 1, "x": 10})).unwrap();
        let b = codec.fingerprint(&json!({"x": 10, "id": 2})).unwrap();
        let c = codec.fingerprint(&json!({"id": 1, "x": 11})).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_tile_fingerprint_covers_name() {
        let codec = PathCodec::for_tiles();
        let a = codec.fingerprint(&json!({"name": "a.laz", "oid": "sha256:1"})).unwrap();
        let b = codec.fingerprint(&json!({"name": "b.laz", "oid": "sha256:1"})).unwrap();
        let again = codec.fingerprint(&json!({"oid": "sha256:1", "name": "a.laz"})).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, again);
    }

    #[test]
    fn test_record_identity() {
        let codec = int_codec(DatasetFormat::TableV2);
        let (key, identity) = codec.record_identity(&json!({"id": "7", "x": 1})).unwrap();
        assert_eq!(key, json!(7));
        assert_eq!(identity, "7");
        assert!(codec.record_identity(&json!({"x": 1})).is_err());
    }

    #[test]
    fn test_format_lookup() {
        assert_eq!(
            DatasetFormat::from_dirname(".table-dataset"),
            Some(DatasetFormat::TableV2)
        );
        assert_eq!(
            DatasetFormat::from_version_str("point-cloud/1"),
            Some(DatasetFormat::PointCloudV1)
        );
        assert_eq!(DatasetFormat::parse("v1"), Some(DatasetFormat::TableV1));
        assert_eq!(DatasetFormat::from_dirname(".other"), None);
        assert!(ItemKind::Meta < ItemKind::Feature);
    }
}
