use std::io;
use thiserror::Error;

/// The error taxonomy shared by every component: snapshot unpacking, the
/// Lucene reader, the work coordinator, the reindex pipeline and the
/// metadata migrator all return `Error` so the CLI can assemble one
/// `RunReport` (see [`crate::report`]) out of whatever bubbles up.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("index error: {0}")]
    Index(String),

    /// 5xx, connection reset, DNS failure, or another condition worth
    /// retrying with backoff. Never surfaced to the final report on its
    /// own - callers retry and only report the terminal error.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// The target cluster returned 400 on an otherwise-idempotent create.
    #[error("invalid response from target for {operation}: {detail}")]
    InvalidResponse { operation: String, detail: String },

    /// An unexpected non-2xx response, after the retry budget is spent.
    #[error("operation failed after retries: {0}")]
    OperationFailed(String),

    /// A blob part was unreadable or failed its checksum; the shard's
    /// partial unpack directory has already been removed by the caller.
    #[error("shard unpack failed for {index}/{shard}: {reason}")]
    ShardUnpackFailed {
        index: String,
        shard: u32,
        reason: String,
    },

    /// A Lucene segment advertises a codec name with no registered
    /// implementation. The reader never surfaces this to its caller - it
    /// synthesizes a [`crate::lucene::codec::FallbackCodec`] instead - but
    /// the variant exists so the fallback path can be unit tested.
    #[error("unknown Lucene codec: {0}")]
    CodecUnknown(String),

    /// A CAS update failed because another worker now owns the lease.
    /// The pipeline must terminate without further side effects on the
    /// target.
    #[error("lease for work item {0} is held elsewhere")]
    LeaseHeldElsewhere(String),

    /// Source metadata has multiple mapping types and no resolution mode
    /// was supplied.
    #[error("index {0} has multiple mapping types; an explicit resolution mode is required")]
    MultiTypeResolutionRequired(String),

    /// No transformer chain exists for this source/target version pair.
    #[error("unsupported version pair: source {source}, target {target}")]
    UnsupportedVersion { source: String, target: String },

    /// CLI argument misuse. The binary maps this to exit code 999.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// `true` for errors whose underlying cause is transient and thus
    /// eligible for another retry attempt. Used by the generic retry
    /// helper in [`crate::retry`] to decide whether to keep looping.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TransientIo(_) => true,
            Error::OperationFailed(_) => true,
            Error::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status()
                        .is_some_and(|s| s.is_server_error() || s.as_u16() == 429)
            }
            Error::Io(_) => true,
            _ => false,
        }
    }
}
