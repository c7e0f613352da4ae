//! §4.4 accumulator stage: groups transformed documents into
//! [`BulkBatch`]es bounded by document count and byte budget, partitioned
//! per index so one stream carrying mixed indices never mixes a bulk
//! request's path (§4.4: "if a single stream mixes indices, the pipeline
//! partitions per index").

use crate::model::{BulkBatch, BulkEntry};

pub struct Accumulator {
    max_docs: usize,
    max_bytes: usize,
    current: Option<BulkBatch>,
}

impl Accumulator {
    pub fn new(max_docs: usize, max_bytes: usize) -> Self {
        Self { max_docs, max_bytes, current: None }
    }

    /// Adds one entry for `index_name`. Returns a completed batch when
    /// adding would cross either threshold, or when `index_name` differs
    /// from the batch in progress - the new entry starts the next batch.
    pub fn push(&mut self, index_name: &str, entry: BulkEntry) -> Option<BulkBatch> {
        let flush_for_index_change = self
            .current
            .as_ref()
            .is_some_and(|batch| batch.index_name != index_name);

        let flush_for_threshold = self.current.as_ref().is_some_and(|batch| {
            batch.entries.len() + 1 > self.max_docs || batch.byte_len() + entry.wire_len() > self.max_bytes
        });

        let flushed = if flush_for_index_change || flush_for_threshold {
            self.current.take()
        } else {
            None
        };

        let batch = self.current.get_or_insert_with(|| BulkBatch { index_name: index_name.to_string(), entries: vec![] });
        batch.entries.push(entry);
        flushed
    }

    /// Flushes whatever batch is in progress at end-of-stream (§4.4:
    /// "accumulation flushes the last batch at end-of-stream").
    pub fn finish(&mut self) -> Option<BulkBatch> {
        self.current.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, bytes: usize) -> BulkEntry {
        BulkEntry {
            doc_id: id.into(),
            segment_ordinal: 0,
            action_line: vec![b'a'; bytes / 2],
            source_line: vec![b'b'; bytes - bytes / 2],
        }
    }

    #[test]
    fn flushes_on_doc_count_threshold() {
        let mut acc = Accumulator::new(2, 1_000_000);
        assert!(acc.push("idx", entry("1", 10)).is_none());
        assert!(acc.push("idx", entry("2", 10)).is_none());
        let flushed = acc.push("idx", entry("3", 10)).unwrap();
        assert_eq!(flushed.entries.len(), 2);
        let last = acc.finish().unwrap();
        assert_eq!(last.entries.len(), 1);
    }

    #[test]
    fn flushes_on_byte_threshold() {
        let mut acc = Accumulator::new(1000, 25);
        assert!(acc.push("idx", entry("1", 20)).is_none());
        let flushed = acc.push("idx", entry("2", 20)).unwrap();
        assert_eq!(flushed.entries.len(), 1);
    }

    #[test]
    fn flushes_on_index_change() {
        let mut acc = Accumulator::new(1000, 1_000_000);
        assert!(acc.push("idx_a", entry("1", 10)).is_none());
        let flushed = acc.push("idx_b", entry("2", 10)).unwrap();
        assert_eq!(flushed.index_name, "idx_a");
        let last = acc.finish().unwrap();
        assert_eq!(last.index_name, "idx_b");
    }
}
