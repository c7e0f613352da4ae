//! Segment enumeration: which segments exist in a shard directory, in
//! what order, and what each declares about itself (codec name,
//! soft-deletes field). An index is the union of its segments (GLOSSARY).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub name: String,
    pub doc_count: u32,
    pub codec: String,
    /// Present when the index configures soft-deletes (§3): any record
    /// with this field set is a soft-deleted tombstone, skipped just like
    /// a hard-deleted doc.
    pub soft_deletes_field: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct SegmentInfosWire {
    segments: Vec<SegmentInfo>,
}

/// The decoded `segments_N` file: an ordered list of segments making up a
/// shard (GLOSSARY: "an index is a union of segments"). Segment order
/// here defines the ascending `segmentOrdinal` order the reader must
/// preserve (§4.2 invariants).
pub struct SegmentInfos {
    pub segments: Vec<SegmentInfo>,
}

impl SegmentInfos {
    /// Reads the highest-numbered `segments_N` file in `shard_dir`, the
    /// same "latest generation wins" convention the repository manifest
    /// uses for `index-N` (§4.1).
    pub fn read(shard_dir: &Path) -> Result<Self> {
        let mut candidates: Vec<(u64, std::path::PathBuf)> = fs::read_dir(shard_dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.strip_prefix("segments_")
                    .and_then(|n| n.parse::<u64>().ok())
                    .map(|n| (n, e.path()))
            })
            .collect();
        candidates.sort_by_key(|(n, _)| *n);
        let (_, path) = candidates
            .pop()
            .ok_or_else(|| Error::Storage(format!("no segments_N file in {}", shard_dir.display())))?;
        let bytes = fs::read(&path)?;
        let wire: SegmentInfosWire = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Storage(format!("malformed segments file {}: {e}", path.display())))?;
        Ok(Self { segments: wire.segments })
    }

    pub fn stored_fields_path(shard_dir: &Path, segment: &SegmentInfo) -> std::path::PathBuf {
        shard_dir.join(format!("{}.fld", segment.name))
    }
}
