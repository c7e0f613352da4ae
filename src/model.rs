//! Shared data model (§3). These types cross every component boundary:
//! the repository emits `ShardFileInfo`, the unpacker consumes it, the
//! Lucene reader emits `LuceneDocument`, the pipeline batches it into
//! `BulkBatch`es and reports progress as a `CheckpointCursor`, and the
//! coordinator tracks `WorkItem`s independently of all of the above.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::version::Version;

/// A logical file within a shard, as listed in a shard manifest
/// (`snap-<snap>.dat`). Files named `v__*` are virtual: their content is
/// the literal bytes of `meta_hash`, never stored as a blob part.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShardFileInfo {
    pub name: String,
    pub physical_name: String,
    pub length: u64,
    pub checksum: String,
    pub part_size: u64,
    pub meta_hash: Option<Vec<u8>>,
    pub parts: Vec<String>,
}

impl ShardFileInfo {
    pub fn is_virtual(&self) -> bool {
        self.name.starts_with("v__")
    }
}

/// One index entry in a repository manifest: name plus the opaque UUID
/// the repository uses to lay out `indices/<uuid>/...` on disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexRef {
    pub name: String,
    pub uuid: String,
}

/// Decoded `index-N` repository manifest: what snapshots exist, what
/// indices each covers, and the per-shard file list for each.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct SnapshotManifest {
    pub snapshots: Vec<String>,
    pub indices: Vec<IndexRef>,
    /// `(index name, shard number) -> file list`, scoped to one snapshot.
    pub shard_files: HashMap<(String, u32), Vec<ShardFileInfo>>,
}

/// One stored document read out of a Lucene shard. Deleted, soft-deleted
/// and nested-child documents never reach this type - the reader filters
/// them before emitting (§4.2 invariants).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LuceneDocument {
    pub index_name: String,
    pub doc_id: String,
    pub source_json: Vec<u8>,
    pub segment_ordinal: u64,
    pub is_live: bool,
}

/// Coordinator-tracked state of a `WorkItem` (§4.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum WorkItemState {
    Unassigned,
    Leased,
    Completed,
    /// Terminal: completed via `completeWithSuccessors`. The successors
    /// themselves start `Unassigned`.
    Split,
}

/// One shard-sized unit of reindexing work. `id` encodes
/// `"<index>__<shard>"`, plus a generation suffix (`"__g1"`, `"__g2"`, ...)
/// when the item is a successor of a split.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub index_name: String,
    pub shard_number: u32,
    pub state: WorkItemState,
    pub owner: Option<String>,
    pub lease_expiry: Option<i64>,
    pub acquisition_exponent: u32,
    pub progress_checkpoint: Option<CheckpointCursor>,
}

impl WorkItem {
    pub fn new_id(index_name: &str, shard_number: u32) -> String {
        format!("{index_name}__{shard_number}")
    }

    pub fn successor_id(&self, generation: u32) -> String {
        format!("{}__{}__g{}", self.index_name, self.shard_number, generation)
    }

    pub fn unassigned(index_name: impl Into<String>, shard_number: u32) -> Self {
        let index_name = index_name.into();
        let id = Self::new_id(&index_name, shard_number);
        Self {
            id,
            index_name,
            shard_number,
            state: WorkItemState::Unassigned,
            owner: None,
            lease_expiry: None,
            acquisition_exponent: 0,
            progress_checkpoint: None,
        }
    }
}

/// The highest segment ordinal whose bulk write has been durably
/// acknowledged by the target, for one work item. Strictly
/// non-decreasing for the worker currently holding the lease (§3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CheckpointCursor {
    pub last_segment_ordinal: u64,
}

/// One document queued for a bulk request: its id, the pre-rendered
/// action line, and the pre-rendered source line. Rendering both lines up
/// front lets the accumulator (§4.4) count bytes without re-serializing.
#[derive(Clone, Debug)]
pub struct BulkEntry {
    pub doc_id: String,
    pub segment_ordinal: u64,
    pub action_line: Vec<u8>,
    pub source_line: Vec<u8>,
}

impl BulkEntry {
    /// Bytes this entry contributes to a bulk body, including the two
    /// newline separators the wire format requires.
    pub fn wire_len(&self) -> usize {
        self.action_line.len() + 1 + self.source_line.len() + 1
    }
}

/// An ordered, size-bounded group of [`BulkEntry`] values ready to be
/// posted as one `_bulk` request (§3, §4.4).
#[derive(Clone, Debug, Default)]
pub struct BulkBatch {
    pub index_name: String,
    pub entries: Vec<BulkEntry>,
}

impl BulkBatch {
    pub fn byte_len(&self) -> usize {
        self.entries.iter().map(BulkEntry::wire_len).sum()
    }

    pub fn max_segment_ordinal(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.segment_ordinal).max()
    }

    pub fn to_ndjson(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.byte_len());
        for entry in &self.entries {
            buf.extend_from_slice(&entry.action_line);
            buf.push(b'\n');
            buf.extend_from_slice(&entry.source_line);
            buf.push(b'\n');
        }
        buf
    }
}

/// The different kinds of global/index metadata the migrator moves,
/// tagged so the run report can group outcomes by kind (§4.5, §7).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MetadataKind {
    LegacyTemplate,
    ComponentTemplate,
    IndexTemplate,
    Index,
    Alias,
}

impl MetadataKind {
    /// §4.5 ordering: legacy templates, component templates, index
    /// templates, indices, then aliases.
    pub fn migration_order() -> [MetadataKind; 5] {
        [
            MetadataKind::LegacyTemplate,
            MetadataKind::ComponentTemplate,
            MetadataKind::IndexTemplate,
            MetadataKind::Index,
            MetadataKind::Alias,
        ]
    }
}

/// One piece of metadata to migrate: a template, index, or alias body,
/// tagged with the version it was read from so `transform` knows which
/// chain to run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataItem {
    pub kind: MetadataKind,
    pub name: String,
    pub body: serde_json::Value,
    pub source_version: Version,
}
