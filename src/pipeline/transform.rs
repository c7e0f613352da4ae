//! §4.4 "an optional transformer": a pluggable pure function over JSON
//! documents (§1: "transformations are pluggable black boxes treated as
//! pure functions"). The pipeline never inspects a transformer's
//! internals, only its input/output contract.

use crate::error::Result;
use crate::model::{BulkEntry, LuceneDocument};

pub trait Transformer: Send + Sync {
    fn transform(&self, doc: &LuceneDocument) -> Result<serde_json::Value>;
}

/// Passes the stored `_source` bytes through unchanged, parsed only far
/// enough to confirm it's valid JSON.
pub struct IdentityTransformer;

impl Transformer for IdentityTransformer {
    fn transform(&self, doc: &LuceneDocument) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&doc.source_json)?)
    }
}

/// Renders one transformed document into its bulk action/source line pair
/// (§4.4 "an action line `{"index":{"_id":...}}` followed by the source
/// line").
pub fn build_entry(doc: &LuceneDocument, source: &serde_json::Value) -> Result<BulkEntry> {
    let action_line = serde_json::to_vec(&serde_json::json!({"index": {"_id": doc.doc_id}}))?;
    let source_line = serde_json::to_vec(source)?;
    Ok(BulkEntry {
        doc_id: doc.doc_id.clone(),
        segment_ordinal: doc.segment_ordinal,
        action_line,
        source_line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, ordinal: u64, json: &[u8]) -> LuceneDocument {
        LuceneDocument {
            index_name: "idx".into(),
            doc_id: id.into(),
            source_json: json.to_vec(),
            segment_ordinal: ordinal,
            is_live: true,
        }
    }

    #[test]
    fn identity_transformer_round_trips_source() {
        let d = doc("1", 0, br#"{"a":1}"#);
        let value = IdentityTransformer.transform(&d).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn build_entry_renders_action_and_source_lines() {
        let d = doc("7", 3, br#"{"a":1}"#);
        let value = IdentityTransformer.transform(&d).unwrap();
        let entry = build_entry(&d, &value).unwrap();
        assert!(String::from_utf8(entry.action_line.clone()).unwrap().contains("\"_id\":\"7\""));
        assert_eq!(entry.segment_ordinal, 3);
    }
}
