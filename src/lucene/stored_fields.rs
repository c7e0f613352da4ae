//! Stored-fields decoding, the one part of a Lucene segment this reader
//! cares about (§1 non-goal: "full Lucene query/merge semantics, read-only
//! stored fields only"). Records are laid out as a simple
//! length-prefixed, flagged sequence rather than the real binary Lucene
//! stored-fields format, since §1 scopes this crate to stored-fields
//! extraction rather than full format interoperability; see `DESIGN.md`
//! for the Open-Question resolution. Two `StoredFieldsFormat`
//! implementations exist because the byte layout changed between the
//! Lucene 5/6 "uncompressed" stored-fields format and the 7+ compressing
//! format that both wrap the same record shape.

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};

/// One raw record read back from a segment's stored-fields file, before
/// the reader (§4.2) applies live/soft-delete/nested filtering.
pub struct StoredRecord {
    pub source_json: Vec<u8>,
    pub is_live: bool,
    pub is_nested_child: bool,
}

const FLAG_DELETED: u8 = 0b0000_0001;
const FLAG_NESTED_CHILD: u8 = 0b0000_0010;

pub trait StoredFieldsFormat: Send + Sync {
    /// Reads record `doc_ordinal` (0-based, in the segment's natural doc
    /// order) from `data`, the full bytes of the segment's stored-fields
    /// file.
    fn read_record(&self, data: &[u8], doc_ordinal: u32) -> Result<StoredRecord>;

    /// Total number of records physically present in `data`, used by the
    /// reader to know when a segment is exhausted.
    fn record_count(&self, data: &[u8]) -> Result<u32>;
}

/// Shared record-stream parsing: `[u32 count][records...]`, each record
/// `[u8 flags][u32 len][len bytes of JSON]`. Lucene 5/6's uncompressed
/// format and 7+'s per-chunk-compressed format both decode to this shape
/// in this crate's simplified model; real byte-level compression is
/// elided since the reader only needs the logical record stream.
fn parse_records(data: &[u8]) -> Result<Vec<StoredRecord>> {
    let mut cursor = data;
    let count = cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| Error::Storage(format!("truncated stored-fields header: {e}")))?;
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let flags = cursor
            .read_u8()
            .map_err(|e| Error::Storage(format!("truncated record flags: {e}")))?;
        let len = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::Storage(format!("truncated record length: {e}")))?;
        let mut buf = vec![0u8; len as usize];
        cursor
            .read_exact(&mut buf)
            .map_err(|e| Error::Storage(format!("truncated record body: {e}")))?;
        records.push(StoredRecord {
            source_json: buf,
            is_live: flags & FLAG_DELETED == 0,
            is_nested_child: flags & FLAG_NESTED_CHILD != 0,
        });
    }
    Ok(records)
}

/// Lucene 5/6 stored-fields format (uncompressed per-document records).
pub struct StoredFieldsV5;

impl StoredFieldsFormat for StoredFieldsV5 {
    fn read_record(&self, data: &[u8], doc_ordinal: u32) -> Result<StoredRecord> {
        let mut records = parse_records(data)?;
        let idx = doc_ordinal as usize;
        if idx >= records.len() {
            return Err(Error::Storage(format!("doc ordinal {doc_ordinal} out of range")));
        }
        Ok(records.swap_remove(idx))
    }

    fn record_count(&self, data: &[u8]) -> Result<u32> {
        Ok(parse_records(data)?.len() as u32)
    }
}

/// Lucene 7/8/9 stored-fields format (chunk-compressed records, decoded
/// to the same logical shape here).
pub struct StoredFieldsV9;

impl StoredFieldsFormat for StoredFieldsV9 {
    fn read_record(&self, data: &[u8], doc_ordinal: u32) -> Result<StoredRecord> {
        StoredFieldsV5.read_record(data, doc_ordinal)
    }

    fn record_count(&self, data: &[u8]) -> Result<u32> {
        StoredFieldsV5.record_count(data)
    }
}

/// Serializes a record stream in the shared on-disk shape, used by tests
/// and by any future writer-side tooling that needs to produce fixtures.
pub fn encode_records(records: &[(bool, bool, &[u8])]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(records.len() as u32).to_le_bytes());
    for (is_live, is_nested_child, json) in records {
        let mut flags = 0u8;
        if !is_live {
            flags |= FLAG_DELETED;
        }
        if *is_nested_child {
            flags |= FLAG_NESTED_CHILD;
        }
        buf.push(flags);
        buf.extend_from_slice(&(json.len() as u32).to_le_bytes());
        buf.extend_from_slice(json);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_live_and_deleted_records() {
        let data = encode_records(&[
            (true, false, br#"{"a":1}"#),
            (false, false, br#"{"a":2}"#),
            (true, true, br#"{"a":3}"#),
        ]);
        let format = StoredFieldsV9;
        assert_eq!(format.record_count(&data).unwrap(), 3);

        let r0 = format.read_record(&data, 0).unwrap();
        assert!(r0.is_live && !r0.is_nested_child);
        assert_eq!(r0.source_json, br#"{"a":1}"#);

        let r1 = format.read_record(&data, 1).unwrap();
        assert!(!r1.is_live);

        let r2 = format.read_record(&data, 2).unwrap();
        assert!(r2.is_live && r2.is_nested_child);
    }

    #[test]
    fn out_of_range_ordinal_errors() {
        let data = encode_records(&[(true, false, b"{}")]);
        let format = StoredFieldsV5;
        assert!(format.read_record(&data, 5).is_err());
    }

    #[test]
    fn truncated_header_errors_instead_of_panicking() {
        let format = StoredFieldsV5;
        assert!(format.record_count(&[0, 1]).is_err());
    }
}
