//! Shard unpack protocol (§4.1 step 3): reconstructs one shard's Lucene
//! directory on local disk from a `SnapshotRepository`, by streaming blob
//! parts back-to-back and materializing virtual `v__` files from their
//! `meta_hash` bytes.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

use crate::checksum;
use crate::error::{Error, Result};
use crate::model::ShardFileInfo;
use crate::repo::SnapshotRepository;

/// Buffered-loop chunk size used while concatenating blob parts into the
/// on-disk physical file (§4.1 step 2: "write to `physicalName` in a
/// fixed-size buffered loop").
const COPY_BUFFER_BYTES: usize = 1 << 20;

/// A pluggable forward-upgrade pass (§4.1 step 3, §9's second Open
/// Question): rewrites segments of Lucene format `from` as format
/// `from + 1` in place. Treated as an optional optimization - the reader
/// (§4.2) must succeed whether or not any pass ran.
pub trait UpgradePass: Send + Sync {
    fn from_format(&self) -> u32;
    fn upgrade(&self, shard_dir: &Path) -> Result<()>;
}

pub struct ShardUnpacker<'a, R: SnapshotRepository + ?Sized> {
    repo: &'a R,
    base_dir: PathBuf,
    upgrade_passes: Vec<Box<dyn UpgradePass>>,
}

impl<'a, R: SnapshotRepository + ?Sized> ShardUnpacker<'a, R> {
    pub fn new(repo: &'a R, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo,
            base_dir: base_dir.into(),
            upgrade_passes: Vec::new(),
        }
    }

    pub fn with_upgrade_passes(mut self, passes: Vec<Box<dyn UpgradePass>>) -> Self {
        self.upgrade_passes = passes;
        self
    }

    /// Materializes `index_name`'s `shard_number` under `<base>/<index>/<shard>/`,
    /// returning the directory path. On any failure the partial directory
    /// is removed before the error propagates (§4.1 "Failure semantics").
    #[instrument(skip(self), fields(index = %index_name, shard = shard_number))]
    pub async fn unpack(
        &self,
        snapshot: &str,
        index_name: &str,
        index_uuid: &str,
        shard_number: u32,
    ) -> Result<PathBuf> {
        let shard_dir = self.base_dir.join(index_name).join(shard_number.to_string());
        fs::create_dir_all(&shard_dir).await?;

        match self
            .unpack_inner(snapshot, index_name, index_uuid, shard_number, &shard_dir)
            .await
        {
            Ok(()) => {
                self.run_upgrade_passes(&shard_dir);
                info!(dir = %shard_dir.display(), "shard unpacked");
                Ok(shard_dir)
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&shard_dir).await;
                Err(Error::ShardUnpackFailed {
                    index: index_name.to_string(),
                    shard: shard_number,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn unpack_inner(
        &self,
        snapshot: &str,
        index_name: &str,
        index_uuid: &str,
        shard_number: u32,
        shard_dir: &Path,
    ) -> Result<()> {
        let files = self.repo.shard_manifest(snapshot, index_name, shard_number).await?;
        for file in &files {
            self.write_file(file, index_uuid, shard_number, shard_dir).await?;
        }
        Ok(())
    }

    async fn write_file(
        &self,
        file: &ShardFileInfo,
        index_uuid: &str,
        shard_number: u32,
        shard_dir: &Path,
    ) -> Result<()> {
        let dest_path = shard_dir.join(&file.physical_name);
        if file.is_virtual() {
            let bytes = file.meta_hash.as_deref().ok_or_else(|| {
                Error::Storage(format!("virtual file {} has no meta_hash", file.name))
            })?;
            fs::write(&dest_path, bytes).await?;
            return Ok(());
        }

        let mut out = fs::File::create(&dest_path).await?;
        let mut written = 0u64;
        let mut whole = Vec::with_capacity(file.length as usize);
        for part_name in &file.parts {
            let data = self.repo.blob(index_uuid, shard_number, part_name).await?;
            for chunk in data.chunks(COPY_BUFFER_BYTES) {
                out.write_all(chunk).await?;
            }
            written += data.len() as u64;
            whole.extend_from_slice(&data);
        }
        out.flush().await?;

        if written != file.length {
            return Err(Error::Storage(format!(
                "{}: expected {} bytes, wrote {}",
                file.physical_name, file.length, written
            )));
        }
        self.verify_checksum(file, &whole)?;
        Ok(())
    }

    /// §4.1 "Failure semantics": a checksum mismatch on a blob part fails
    /// the whole unpack. Manifests that carry no recognizable hex checksum
    /// (e.g. the legacy ES 6.8 format, §4.1) are trusted on length alone.
    fn verify_checksum(&self, file: &ShardFileInfo, data: &[u8]) -> Result<()> {
        let Some(expected) = parse_hex_checksum(&file.checksum) else {
            return Ok(());
        };
        checksum::verify_checksum(data, &expected).map_err(|_| {
            Error::Storage(format!("{}: checksum mismatch against manifest", file.physical_name))
        })
    }

    /// Runs every registered upgrade pass in format order, logging and
    /// continuing past any individual pass's failure (§4.1: "Tolerate
    /// upgrade failures per format - the reader must also handle the
    /// original format").
    fn run_upgrade_passes(&self, shard_dir: &Path) {
        let mut passes: Vec<&Box<dyn UpgradePass>> = self.upgrade_passes.iter().collect();
        passes.sort_by_key(|p| p.from_format());
        for pass in passes {
            if let Err(e) = pass.upgrade(shard_dir) {
                warn!(format = pass.from_format(), error = %e, "forward-upgrade pass failed, continuing with original format");
            }
        }
    }
}

/// Parses a 64-character lowercase-hex SHA-256 string into bytes; any other
/// shape (short opaque manifest checksums, legacy formats) is left
/// unverified rather than rejected.
fn parse_hex_checksum(s: &str) -> Option<[u8; 32]> {
    if s.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IndexRef;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeRepo {
        manifest: HashMap<(String, u32), Vec<ShardFileInfo>>,
        blobs: HashMap<String, Vec<u8>>,
        fail_blob: Mutex<Option<String>>,
    }

    #[async_trait]
    impl SnapshotRepository for FakeRepo {
        async fn list_snapshots(&self) -> Result<Vec<String>> {
            Ok(vec!["s1".into()])
        }
        async fn list_indices(&self, _snapshot: &str) -> Result<Vec<IndexRef>> {
            Ok(vec![])
        }
        async fn list_shards(&self, _snapshot: &str, _index_name: &str) -> Result<Vec<u32>> {
            Ok(vec![0])
        }
        async fn shard_manifest(
            &self,
            _snapshot: &str,
            index_name: &str,
            shard_number: u32,
        ) -> Result<Vec<ShardFileInfo>> {
            Ok(self
                .manifest
                .get(&(index_name.to_string(), shard_number))
                .cloned()
                .unwrap_or_default())
        }
        async fn blob(&self, _index_uuid: &str, _shard_number: u32, part_name: &str) -> Result<Vec<u8>> {
            if let Some(failing) = self.fail_blob.lock().unwrap().as_ref() {
                if failing == part_name {
                    return Err(Error::Storage("simulated blob read failure".into()));
                }
            }
            self.blobs
                .get(part_name)
                .cloned()
                .ok_or_else(|| Error::Storage(format!("no such part {part_name}")))
        }
        async fn global_metadata_bytes(&self, _snapshot: &str) -> Result<Vec<u8>> {
            Ok(vec![])
        }
        async fn index_metadata_bytes(&self, _snapshot: &str, _index_name: &str) -> Result<Vec<u8>> {
            Ok(vec![])
        }
    }

    fn sample_file(name: &str, data: &[u8]) -> (ShardFileInfo, Vec<u8>) {
        (
            ShardFileInfo {
                name: name.to_string(),
                physical_name: name.to_string(),
                length: data.len() as u64,
                checksum: "ignored".into(),
                part_size: data.len() as u64,
                meta_hash: None,
                parts: vec![name.to_string()],
            },
            data.to_vec(),
        )
    }

    #[tokio::test]
    async fn unpack_writes_regular_and_virtual_files() {
        let (regular_info, regular_data) = sample_file("_0.cfs", b"lucene segment bytes");
        let virtual_info = ShardFileInfo {
            name: "v__meta".into(),
            physical_name: "segments_1".into(),
            length: 4,
            checksum: "x".into(),
            part_size: 4,
            meta_hash: Some(vec![9, 9, 9, 9]),
            parts: vec![],
        };

        let mut manifest = HashMap::new();
        manifest.insert(
            ("idx_a".to_string(), 0u32),
            vec![regular_info, virtual_info],
        );
        let mut blobs = HashMap::new();
        blobs.insert("_0.cfs".to_string(), regular_data);

        let repo = FakeRepo { manifest, blobs, fail_blob: Mutex::new(None) };
        let dir = tempfile::tempdir().unwrap();
        let unpacker = ShardUnpacker::new(&repo, dir.path());

        let shard_dir = unpacker.unpack("s1", "idx_a", "uuid-a", 0).await.unwrap();
        assert_eq!(
            fs::read(shard_dir.join("_0.cfs")).await.unwrap(),
            b"lucene segment bytes"
        );
        assert_eq!(fs::read(shard_dir.join("segments_1")).await.unwrap(), vec![9, 9, 9, 9]);
    }

    #[tokio::test]
    async fn failed_blob_read_removes_partial_directory() {
        let (info, data) = sample_file("_0.cfs", b"x");
        let mut manifest = HashMap::new();
        manifest.insert(("idx_a".to_string(), 0u32), vec![info]);
        let mut blobs = HashMap::new();
        blobs.insert("_0.cfs".to_string(), data);

        let repo = FakeRepo {
            manifest,
            blobs,
            fail_blob: Mutex::new(Some("_0.cfs".to_string())),
        };
        let dir = tempfile::tempdir().unwrap();
        let unpacker = ShardUnpacker::new(&repo, dir.path());

        let result = unpacker.unpack("s1", "idx_a", "uuid-a", 0).await;
        assert!(matches!(result, Err(Error::ShardUnpackFailed { .. })));
        assert!(!dir.path().join("idx_a").join("0").exists());
    }

    #[tokio::test]
    async fn length_mismatch_fails_unpack() {
        let mut info_data = sample_file("_0.cfs", b"short");
        info_data.0.length = 9999;
        let mut manifest = HashMap::new();
        manifest.insert(("idx_a".to_string(), 0u32), vec![info_data.0]);
        let mut blobs = HashMap::new();
        blobs.insert("_0.cfs".to_string(), info_data.1);

        let repo = FakeRepo { manifest, blobs, fail_blob: Mutex::new(None) };
        let dir = tempfile::tempdir().unwrap();
        let unpacker = ShardUnpacker::new(&repo, dir.path());
        let result = unpacker.unpack("s1", "idx_a", "uuid-a", 0).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn checksum_mismatch_fails_unpack() {
        let (mut info, data) = sample_file("_0.cfs", b"lucene segment bytes");
        info.checksum = "0".repeat(64);
        let mut manifest = HashMap::new();
        manifest.insert(("idx_a".to_string(), 0u32), vec![info]);
        let mut blobs = HashMap::new();
        blobs.insert("_0.cfs".to_string(), data);

        let repo = FakeRepo { manifest, blobs, fail_blob: Mutex::new(None) };
        let dir = tempfile::tempdir().unwrap();
        let unpacker = ShardUnpacker::new(&repo, dir.path());
        let result = unpacker.unpack("s1", "idx_a", "uuid-a", 0).await;
        assert!(matches!(result, Err(Error::ShardUnpackFailed { .. })));
        assert!(!dir.path().join("idx_a").join("0").exists());
    }

    #[tokio::test]
    async fn correct_checksum_passes() {
        let data = b"lucene segment bytes".to_vec();
        let sum = checksum::to_hex(&checksum::compute_checksum(&data));
        let mut info = sample_file("_0.cfs", &data).0;
        info.checksum = sum;
        let mut manifest = HashMap::new();
        manifest.insert(("idx_a".to_string(), 0u32), vec![info]);
        let mut blobs = HashMap::new();
        blobs.insert("_0.cfs".to_string(), data);

        let repo = FakeRepo { manifest, blobs, fail_blob: Mutex::new(None) };
        let dir = tempfile::tempdir().unwrap();
        let unpacker = ShardUnpacker::new(&repo, dir.path());
        assert!(unpacker.unpack("s1", "idx_a", "uuid-a", 0).await.is_ok());
    }
}
