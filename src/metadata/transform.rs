//! §4.5 `transform`: a chain of version-specific transformations applied
//! to one [`MetadataItem`] before it's posted to the target. Table-
//! dispatched on the `(source, target)` version pair rather than a class
//! hierarchy (§9), mirroring [`crate::repo::manifest`]'s decoder dispatch.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{MetadataItem, MetadataKind};
use crate::version::Version;

/// §4.5 "Multi-type policy": how to resolve an ES <= 6.x index with more
/// than one mapping type. Absence of a mode on a multi-type index is a
/// deterministic `MultiTypeResolutionRequired` failure, never a silent
/// merge.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MultiTypeResolution {
    /// Merge every type's properties into one `_doc` mapping.
    Union,
    /// Emit one target index per source type (not modeled further here;
    /// the caller is responsible for renaming/creating the split indices).
    Split,
    /// Keep only the first mapping type encountered, dropping the rest.
    PickOne,
}

/// §4.5 "applies a chain of version-specific transformations... producing
/// the payload to post." Settings/mapping shape changes (multi-type
/// removal, deprecated-setting removal) and the replica floor are both
/// applied here; nothing here issues HTTP calls.
pub fn transform(
    item: &MetadataItem,
    target_version: Version,
    min_replicas: u32,
    multi_type_resolution: Option<MultiTypeResolution>,
) -> Result<Value> {
    let mut body = item.body.clone();

    if item.kind == MetadataKind::Index {
        body = remove_multi_type_mappings(&item.name, body, item.source_version, multi_type_resolution)?;
        body = apply_replica_floor(body, min_replicas);
        body = remove_deprecated_settings(body, item.source_version, target_version);
    }

    Ok(body)
}

/// ES <= 6.x indices may declare more than one mapping type under
/// `mappings`. Target versions (ES 7.x, every OS release) support exactly
/// one implicit `_doc` type, so a multi-type source needs an explicit
/// resolution mode (§4.5 "Multi-type policy").
fn remove_multi_type_mappings(
    index_name: &str,
    mut body: Value,
    source_version: Version,
    resolution: Option<MultiTypeResolution>,
) -> Result<Value> {
    if !source_version.is_es_6_8() {
        return Ok(body);
    }
    let Some(mappings) = body.get("mappings").and_then(|m| m.as_object()) else {
        return Ok(body);
    };
    // A single-type 6.x mapping is already `{"properties": {...}}` or
    // `{"<type>": {"properties": {...}}}` with exactly one type key; only
    // more than one type key triggers the resolution requirement.
    let type_keys: Vec<&String> = mappings
        .keys()
        .filter(|k| k.as_str() != "properties" && k.as_str() != "_doc")
        .collect();
    if type_keys.len() <= 1 {
        return Ok(body);
    }

    let Some(resolution) = resolution else {
        return Err(Error::MultiTypeResolutionRequired(index_name.to_string()));
    };

    let merged = match resolution {
        MultiTypeResolution::Union => {
            let mut properties = serde_json::Map::new();
            for type_key in &type_keys {
                if let Some(props) = mappings[type_key.as_str()].get("properties").and_then(|p| p.as_object()) {
                    for (k, v) in props {
                        properties.insert(k.clone(), v.clone());
                    }
                }
            }
            serde_json::json!({ "properties": Value::Object(properties) })
        }
        MultiTypeResolution::PickOne => {
            let first = type_keys.iter().min().expect("non-empty");
            mappings[first.as_str()].clone()
        }
        MultiTypeResolution::Split => {
            // Splitting into per-type indices is an orchestration concern
            // above this function; here we just keep the first type's
            // shape so the caller has a valid single-type body to post
            // under the renamed index it chooses.
            let first = type_keys.iter().min().expect("non-empty");
            mappings[first.as_str()].clone()
        }
    };

    body.as_object_mut().expect("body is an object").insert("mappings".to_string(), merged);
    Ok(body)
}

/// §4.5 "min_replicas": a replica floor applied to every migrated index,
/// regardless of what the source specified.
fn apply_replica_floor(mut body: Value, min_replicas: u32) -> Value {
    let Some(obj) = body.as_object_mut() else { return body };
    let settings = obj.entry("settings").or_insert_with(|| serde_json::json!({}));
    let Some(settings_obj) = settings.as_object_mut() else { return body };
    let index_settings = settings_obj.entry("index").or_insert_with(|| serde_json::json!({}));
    if let Some(index_obj) = index_settings.as_object_mut() {
        let current = index_obj
            .get("number_of_replicas")
            .and_then(|v| v.as_str().and_then(|s| s.parse::<u32>().ok()).or_else(|| v.as_u64().map(|n| n as u32)))
            .unwrap_or(0);
        if current < min_replicas {
            index_obj.insert("number_of_replicas".to_string(), Value::String(min_replicas.to_string()));
        }
    }
    body
}

/// Settings that existed on the source version but have no target
/// equivalent are dropped rather than posted and rejected. Grounded in
/// the narrow, explicit set named by §4.5 rather than a blanket allowlist.
/// Paths are relative to `settings.index`, dot-separated for nested keys.
const ES_6_8_DEPRECATED_SETTINGS: &[&[&str]] = &[&["translog", "flush_threshold_size"], &["merge", "policy", "type"]];

fn remove_deprecated_settings(mut body: Value, source_version: Version, _target_version: Version) -> Value {
    if !source_version.is_es_6_8() {
        return body;
    }
    if let Some(index_settings) = body
        .get_mut("settings")
        .and_then(|s| s.get_mut("index"))
        .and_then(|i| i.as_object_mut())
    {
        for path in ES_6_8_DEPRECATED_SETTINGS {
            remove_nested(index_settings, path);
        }
    }
    body
}

fn remove_nested(obj: &mut serde_json::Map<String, Value>, path: &[&str]) {
    match path {
        [] => {}
        [last] => {
            obj.remove(*last);
        }
        [head, rest @ ..] => {
            if let Some(inner) = obj.get_mut(*head).and_then(|v| v.as_object_mut()) {
                remove_nested(inner, rest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Flavor;

    fn item(name: &str, body: Value, source_version: Version) -> MetadataItem {
        MetadataItem { kind: MetadataKind::Index, name: name.to_string(), body, source_version }
    }

    #[test]
    fn multi_type_without_resolution_mode_errors() {
        let es68 = Version::new(Flavor::Es, 6, 8, 0);
        let body = serde_json::json!({"mappings": {"type_a": {"properties": {}}, "type_b": {"properties": {}}}});
        let result = transform(&item("idx_multi", body, es68), Version::new(Flavor::Os, 2, 11, 0), 0, None);
        assert!(matches!(result, Err(Error::MultiTypeResolutionRequired(name)) if name == "idx_multi"));
    }

    #[test]
    fn multi_type_union_merges_properties() {
        let es68 = Version::new(Flavor::Es, 6, 8, 0);
        let body = serde_json::json!({
            "mappings": {
                "type_a": {"properties": {"a": {"type": "keyword"}}},
                "type_b": {"properties": {"b": {"type": "long"}}}
            }
        });
        let result = transform(
            &item("idx_multi", body, es68),
            Version::new(Flavor::Os, 2, 11, 0),
            0,
            Some(MultiTypeResolution::Union),
        )
        .unwrap();
        let props = result["mappings"]["properties"].as_object().unwrap();
        assert!(props.contains_key("a"));
        assert!(props.contains_key("b"));
    }

    #[test]
    fn single_type_mapping_passes_through_untouched() {
        let es68 = Version::new(Flavor::Es, 6, 8, 0);
        let body = serde_json::json!({"mappings": {"_doc": {"properties": {"a": {"type": "keyword"}}}}});
        let result = transform(&item("idx_a", body.clone(), es68), Version::new(Flavor::Os, 2, 11, 0), 0, None).unwrap();
        assert_eq!(result["mappings"], body["mappings"]);
    }

    #[test]
    fn replica_floor_raises_low_values() {
        let body = serde_json::json!({"settings": {"index": {"number_of_replicas": "0"}}});
        let es710 = Version::new(Flavor::Es, 7, 10, 0);
        let result = transform(&item("idx_a", body, es710), Version::new(Flavor::Os, 2, 11, 0), 2, None).unwrap();
        assert_eq!(result["settings"]["index"]["number_of_replicas"], "2");
    }

    #[test]
    fn replica_floor_never_lowers_existing_value() {
        let body = serde_json::json!({"settings": {"index": {"number_of_replicas": "3"}}});
        let es710 = Version::new(Flavor::Es, 7, 10, 0);
        let result = transform(&item("idx_a", body, es710), Version::new(Flavor::Os, 2, 11, 0), 1, None).unwrap();
        assert_eq!(result["settings"]["index"]["number_of_replicas"], "3");
    }

    #[test]
    fn deprecated_es68_settings_are_dropped() {
        let body = serde_json::json!({"settings": {"index": {"translog": {"flush_threshold_size": "512mb"}, "number_of_replicas": "1"}}});
        let es68 = Version::new(Flavor::Es, 6, 8, 0);
        let result = transform(&item("idx_a", body, es68), Version::new(Flavor::Os, 2, 11, 0), 0, None).unwrap();
        assert!(result["settings"]["index"].get("translog.flush_threshold_size").is_none());
    }
}
