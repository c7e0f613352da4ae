//! §4.2 Lucene Document Reader: a lazy, restartable iterator over a
//! prepared shard directory's live, root documents.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{instrument, warn};

use crate::error::Result;
use crate::lucene::codec::CodecRegistry;
use crate::lucene::segment::{SegmentInfo, SegmentInfos};
use crate::model::LuceneDocument;

/// Reads one segment's stored-fields file into memory, on first access,
/// and caches it for the life of the reader - a segment only needs to be
/// opened once no matter how many live docs it contributes.
struct SegmentCursor {
    info: SegmentInfo,
    data: Vec<u8>,
    next_doc_ordinal: u32,
}

/// A lazy, restartable sequence of [`LuceneDocument`] values, in ascending
/// `segmentOrdinal` order (§4.2 invariants). Implements [`Iterator`] so
/// cancellation is just "stop polling and drop" - resources (the open
/// shard directory, per-segment buffers) are released by ordinary `Drop`
/// with no separate cancellation protocol needed.
pub struct LuceneDocumentReader {
    shard_dir: PathBuf,
    index_name: String,
    registry: Arc<CodecRegistry>,
    segments: std::vec::IntoIter<SegmentInfo>,
    current: Option<SegmentCursor>,
    next_ordinal: u64,
    /// Documents with `segmentOrdinal <= resume_after` are skipped without
    /// being emitted, so a restarted worker resumes past its checkpoint
    /// (§4.4 "On a restart, the pipeline must skip...").
    resume_after: Option<u64>,
}

impl LuceneDocumentReader {
    #[instrument(skip(registry), fields(index = %index_name))]
    pub fn open(
        shard_dir: impl Into<PathBuf>,
        index_name: impl Into<String>,
        registry: Arc<CodecRegistry>,
        resume_after: Option<u64>,
    ) -> Result<Self> {
        let shard_dir = shard_dir.into();
        let infos = SegmentInfos::read(&shard_dir)?;
        Ok(Self {
            shard_dir,
            index_name: index_name.into(),
            registry,
            segments: infos.segments.into_iter(),
            current: None,
            next_ordinal: 0,
            resume_after,
        })
    }

    fn advance_segment(&mut self) -> Result<bool> {
        match self.segments.next() {
            Some(info) => {
                let path = SegmentInfos::stored_fields_path(&self.shard_dir, &info);
                let data = fs::read(&path)?;
                self.current = Some(SegmentCursor { info, next_doc_ordinal: 0, data });
                Ok(true)
            }
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }

    /// Reads and classifies the next record in the current segment,
    /// returning `None` once the segment is exhausted. Unknown codec
    /// names resolve through [`CodecRegistry::resolve`], never erroring
    /// (§4.2 codec-tolerance contract).
    fn next_in_segment(&mut self) -> Result<Option<LuceneDocument>> {
        let ordinal = self.next_ordinal;
        let cursor = self.current.as_mut().expect("advance_segment called first");
        let format = self.registry.resolve(&cursor.info.codec).stored_fields_format();
        let count = format.record_count(&cursor.data)?;
        if cursor.next_doc_ordinal >= count {
            return Ok(None);
        }
        let record = format.read_record(&cursor.data, cursor.next_doc_ordinal)?;
        cursor.next_doc_ordinal += 1;
        self.next_ordinal += 1;

        if !record.is_live || record.is_nested_child {
            return Ok(Some(LuceneDocument {
                index_name: self.index_name.clone(),
                doc_id: String::new(),
                source_json: Vec::new(),
                segment_ordinal: ordinal,
                is_live: false,
            }));
        }

        let doc_id = extract_doc_id(&record.source_json).unwrap_or_else(|| ordinal.to_string());
        Ok(Some(LuceneDocument {
            index_name: self.index_name.clone(),
            doc_id,
            source_json: record.source_json,
            segment_ordinal: ordinal,
            is_live: true,
        }))
    }
}

/// Pulls `_id` out of the stored `_source` envelope when present; falls
/// back to the caller-supplied ordinal otherwise. Real shards store the
/// id alongside `_source` in a sibling stored field - modeled here as an
/// optional top-level `_id` key for simplicity.
fn extract_doc_id(source_json: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(source_json).ok()?;
    value.get("_id").and_then(|v| v.as_str()).map(|s| s.to_string())
}

impl Iterator for LuceneDocumentReader {
    type Item = Result<LuceneDocument>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                match self.advance_segment() {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(e) => return Some(Err(e)),
                }
            }

            match self.next_in_segment() {
                Ok(Some(doc)) => {
                    if let Some(resume_after) = self.resume_after {
                        if doc.segment_ordinal <= resume_after {
                            continue;
                        }
                    }
                    if !doc.is_live {
                        continue;
                    }
                    return Some(Ok(doc));
                }
                Ok(None) => {
                    self.current = None;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read record, skipping rest of segment");
                    self.current = None;
                    return Some(Err(e));
                }
            }
        }
    }
}
