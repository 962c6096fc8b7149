//! Rendering diffs for people and parsing JSON patches back into diffs.
//!
//! The JSON form is the serialization of [`RepoDiff`]: meta deltas as a map by
//! name, record deltas as a list of `{"-": old, "+": new}` objects. Record
//! identities are not stored in the JSON; they are read back from each
//! record's key field.

use std::collections::BTreeSet;
use std::io::{self, Write};

use serde_json::Value;

use super::delta::{Delta, KeyValue, RepoDiff};
use super::error::{DiffError, Result};
use crate::dataset::{
    DatasetFormat, ItemKind, PathCodec, RepoStructure, SCHEMA_META_ITEM, Schema, codec_for,
    item_label,
};

// =============================================================================
// Text output
// =============================================================================

fn value_lines(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s.lines().map(str::to_string).collect(),
        other => serde_json::to_string_pretty(other)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect(),
    }
}

fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Write one delta as `---`/`+++` headers followed by changed lines.
fn write_delta<W: Write>(out: &mut W, ds: &str, kind: ItemKind, delta: &Delta) -> io::Result<()> {
    if let Some(old) = delta.old_kv() {
        writeln!(out, "--- {}", item_label(ds, kind, &old.key))?;
    }
    if let Some(new) = delta.new_kv() {
        writeln!(out, "+++ {}", item_label(ds, kind, &new.key))?;
    }

    let old = delta.old_kv().map(|kv| &kv.value);
    let new = delta.new_kv().map(|kv| &kv.value);
    match (old, new) {
        (Some(Value::Object(a)), Some(Value::Object(b))) => {
            let fields: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            for field in fields {
                let (va, vb) = (a.get(field), b.get(field));
                if va == vb {
                    continue;
                }
                if let Some(v) = va {
                    writeln!(out, "- {} = {}", field, field_text(v))?;
                }
                if let Some(v) = vb {
                    writeln!(out, "+ {} = {}", field, field_text(v))?;
                }
            }
        }
        (old, new) => {
            for (prefix, value) in [("-", old), ("+", new)] {
                let Some(value) = value else { continue };
                match value {
                    Value::Object(fields) => {
                        for (field, v) in fields {
                            writeln!(out, "{} {} = {}", prefix, field, field_text(v))?;
                        }
                    }
                    other => {
                        for line in value_lines(other) {
                            writeln!(out, "{} {}", prefix, line)?;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Write a diff in the human-readable text format.
pub fn write_text_diff<W: Write>(out: &mut W, diff: &RepoDiff) -> io::Result<()> {
    for (ds, ds_diff) in diff.iter() {
        for (kind, deltas) in ds_diff.iter() {
            for delta in deltas.values() {
                write_delta(out, ds, *kind, delta)?;
            }
        }
    }
    Ok(())
}

// =============================================================================
// JSON patches
// =============================================================================

fn invalid(message: impl Into<String>) -> DiffError {
    DiffError::InvalidPatch(message.into())
}

fn patch_sides(ds: &str, raw: &Value) -> Result<(Option<Value>, Option<Value>)> {
    let obj = raw
        .as_object()
        .ok_or_else(|| invalid(format!("{}: each delta must be an object", ds)))?;
    if obj.keys().any(|k| k != "-" && k != "+") {
        return Err(invalid(format!("{}: deltas may only have '-' and '+' keys", ds)));
    }
    Ok((obj.get("-").cloned(), obj.get("+").cloned()))
}

/// The codec for records of `ds` in a patch: taken from a schema the patch
/// sets, otherwise from the existing dataset.
async fn patch_codec(
    structure: &RepoStructure,
    ds: &str,
    new_schema: Option<&Value>,
    new_format: DatasetFormat,
) -> Result<PathCodec> {
    let existing = structure.get_dataset(ds).await?;
    let format = existing.as_ref().map_or(new_format, |d| d.format());
    match (new_schema, existing) {
        (Some(schema), _) if format.has_schema() => {
            let schema = Schema::from_value(ds, schema)?;
            Ok(codec_for(ds, format, Some(&schema))?)
        }
        (_, Some(dataset)) => Ok(dataset.codec().await?.clone()),
        (_, None) => Ok(codec_for(ds, format, None)?),
    }
}

/// Parse a JSON patch against the snapshot it will be applied to.
pub async fn parse_patch(
    structure: &RepoStructure,
    patch: &Value,
    new_format: DatasetFormat,
) -> Result<RepoDiff> {
    let datasets = patch
        .as_object()
        .ok_or_else(|| invalid("a patch must be an object keyed by dataset path"))?;

    let mut diff = RepoDiff::new();
    for (ds, kinds) in datasets {
        let kinds = kinds
            .as_object()
            .ok_or_else(|| invalid(format!("{}: expected an object keyed by item kind", ds)))?;

        let mut new_schema = None;
        if let Some(meta) = kinds.get(ItemKind::Meta.as_str()) {
            let meta = meta
                .as_object()
                .ok_or_else(|| invalid(format!("{}: meta must be an object", ds)))?;
            for (name, raw) in meta {
                let (old, new) = patch_sides(ds, raw)?;
                if name == SCHEMA_META_ITEM {
                    new_schema = new.clone();
                }
                let delta = Delta::from_sides(
                    old.map(|v| KeyValue::new(name.clone(), v)),
                    new.map(|v| KeyValue::new(name.clone(), v)),
                )
                .ok_or_else(|| invalid(format!("{}:meta:{}: empty delta", ds, name)))?;
                diff.entry(ds).entry(ItemKind::Meta).add_delta(delta);
            }
        }

        for (kind_name, deltas) in kinds {
            let kind = ItemKind::parse(kind_name)
                .ok_or_else(|| invalid(format!("{}: unknown item kind {:?}", ds, kind_name)))?;
            if kind == ItemKind::Meta {
                continue;
            }
            let deltas = deltas
                .as_array()
                .ok_or_else(|| invalid(format!("{}:{}: expected a list of deltas", ds, kind)))?;
            let codec = patch_codec(structure, ds, new_schema.as_ref(), new_format).await?;

            for raw in deltas {
                let (old, new) = patch_sides(ds, raw)?;
                let keyed = |value: Value| -> Result<KeyValue> {
                    let (_, identity) = codec.record_identity(&value)?;
                    Ok(KeyValue::new(identity, value))
                };
                let old = old.map(keyed).transpose()?;
                let new = new.map(keyed).transpose()?;
                let delta = Delta::from_sides(old, new)
                    .ok_or_else(|| invalid(format!("{}:{}: empty delta", ds, kind)))?;
                diff.entry(ds).entry(kind).add_delta(delta);
            }
        }
    }
    diff.prune();
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{commit, create_table, head, kv, new_repo};
    use serde_json::json;

    #[test]
    fn test_text_output() {
        let mut diff = RepoDiff::new();
        let ds = diff.entry("roads");
        ds.entry(ItemKind::Meta)
            .add_delta(Delta::Insert(KeyValue::new("title", json!("Roads"))));
        ds.entry(ItemKind::Feature).add_delta(Delta::Update {
            old: kv(json!({"id": 1, "x": 1, "name": "a"})),
            new: kv(json!({"id": 1, "x": 2, "name": "a"})),
        });
        ds.entry(ItemKind::Feature)
            .add_delta(Delta::Delete(kv(json!({"id": 2, "x": 5}))));

        let mut out = Vec::new();
        write_text_diff(&mut out, &diff).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "+++ roads:meta:title\n\
             + Roads\n\
             --- roads:feature:1\n\
             +++ roads:feature:1\n\
             - x = 1\n\
             + x = 2\n\
             --- roads:feature:2\n\
             - id = 2\n\
             - x = 5\n"
        );
    }

    #[tokio::test]
    async fn test_parse_patch_for_new_and_existing_datasets() {
        let repo = new_repo().await;
        let structure = head(&repo).await;
        let patch = json!({
            "roads": {
                "meta": {"schema.json": {"+": crate::test_fixtures::schema()}},
                "feature": [{"+": {"id": 1, "x": 1}}, {"+": {"id": 2, "x": 2}}],
            }
        });
        let diff = parse_patch(&structure, &patch, DatasetFormat::TableV2).await.unwrap();
        assert_eq!(diff, create_table("roads", &[json!({"id": 1, "x": 1}), json!({"id": 2, "x": 2})]));

        // Serializing and re-parsing gives the same diff.
        commit(&repo, &diff, "import").await;
        let structure = head(&repo).await;
        let update = json!({
            "roads": {"feature": [{"-": {"id": 1, "x": 1}, "+": {"id": 1, "x": 5}}]}
        });
        let parsed = parse_patch(&structure, &update, DatasetFormat::TableV2).await.unwrap();
        assert_eq!(serde_json::to_value(&parsed).unwrap(), update);
    }

    #[tokio::test]
    async fn test_parse_patch_errors() {
        let repo = new_repo().await;
        let structure = head(&repo).await;
        for bad in [
            json!([]),
            json!({"roads": {"bogus": []}}),
            json!({"roads": {"meta": {"title": {}}}}),
            json!({"roads": {"meta": {"title": {"*": 1}}}}),
            // No schema for a new table dataset
            json!({"roads": {"feature": [{"+": {"id": 1}}]}}),
        ] {
            assert!(
                parse_patch(&structure, &bad, DatasetFormat::TableV2).await.is_err(),
                "{}",
                bad
            );
        }
    }
}
