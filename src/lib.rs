//! Reindex-From-Snapshot core: reads a source cluster's on-disk snapshot,
//! extracts per-shard Lucene documents, coordinates shard-level work
//! across independent workers, and streams documents into a target
//! cluster via bulk-indexing HTTP requests. A parallel metadata migrator
//! moves templates, indices and aliases across version boundaries.

pub mod checksum;
pub mod coordinator;
pub mod error;
pub mod lucene;
pub mod metadata;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod repo;
pub mod retry;
pub mod storage;
pub mod version;

pub use error::{Error, Result};
pub use storage::StorageProvider;
pub use version::{Flavor, Version};
