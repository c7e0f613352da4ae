//! §4.2 Lucene Document Reader: extracts live, root documents from a
//! shard directory produced by [`crate::repo::ShardUnpacker`], tolerant
//! of codecs this process doesn't recognize.

pub mod codec;
pub mod reader;
pub mod segment;
pub mod stored_fields;

pub use codec::{Codec, CodecRegistry};
pub use reader::LuceneDocumentReader;
pub use segment::{SegmentInfo, SegmentInfos};
