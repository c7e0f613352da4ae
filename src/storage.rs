//! Read-only access to a snapshot repository's bytes, abstracting over a
//! local filesystem root and an S3 prefix (§4.1: "either local directory or
//! S3 URI + local cache directory + region"). Generalized from the
//! teacher's bucket-lifecycle `StorageProvider` trait: a snapshot
//! repository is never written to by this crate (snapshot *creation* is a
//! non-goal, §1), so the surface here is read/list/exists plus a streaming
//! read for blob-part concatenation, instead of the teacher's
//! create/delete-bucket methods.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::fs;

use crate::error::{Error, Result};
use crate::retry::{with_retry, RetryPolicy};

#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Reads the entire contents of `path`, relative to the provider's root.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Streams `path` as a sequence of chunks, used when concatenating
    /// shard blob parts without holding the whole part in memory at once.
    async fn read_stream(&self, path: &Path) -> Result<BoxStream<'static, Result<Bytes>>>;

    /// Lists entries immediately under `prefix` (non-recursive), returning
    /// paths relative to the provider's root.
    async fn list(&self, prefix: &Path) -> Result<Vec<String>>;

    async fn exists(&self, path: &Path) -> Result<bool>;
}

/// A filesystem-rooted repository, e.g. `--file-system-repo-path`.
pub struct LocalStorageProvider {
    root: PathBuf,
}

impl LocalStorageProvider {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl StorageProvider for LocalStorageProvider {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let full_path = self.root.join(path);
        fs::read(full_path).await.map_err(Error::from)
    }

    async fn read_stream(&self, path: &Path) -> Result<BoxStream<'static, Result<Bytes>>> {
        use tokio_util::io::ReaderStream;
        let full_path = self.root.join(path);
        let file = fs::File::open(full_path).await.map_err(Error::from)?;
        let stream = ReaderStream::new(file).map(|r| r.map_err(Error::from));
        Ok(Box::pin(stream))
    }

    async fn list(&self, prefix: &Path) -> Result<Vec<String>> {
        let full_path = self.root.join(prefix);
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(full_path).await.map_err(Error::from)?;

        while let Some(entry) = read_dir.next_entry().await.map_err(Error::from)? {
            if let Ok(path) = entry.path().strip_prefix(&self.root) {
                if let Some(path_str) = path.to_str() {
                    entries.push(path_str.to_string());
                }
            }
        }
        Ok(entries)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(fs::metadata(self.root.join(path)).await.is_ok())
    }
}

/// An S3-backed repository (`--s3-repo-uri` + `--s3-region`), retrying gets
/// per [`RetryPolicy::S3_BLOB`] on transient failures - 4xx responses are
/// treated as fatal and never retried.
#[cfg(feature = "aws")]
pub struct S3StorageProvider {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: PathBuf,
}

#[cfg(feature = "aws")]
impl S3StorageProvider {
    pub async fn new(bucket: impl Into<String>, prefix: impl Into<PathBuf>, region: impl Into<String>) -> Self {
        let region = aws_config::Region::new(region.into());
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region)
            .load()
            .await;
        Self {
            client: aws_sdk_s3::Client::new(&config),
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    fn key(&self, path: &Path) -> String {
        self.prefix.join(path).to_string_lossy().replace('\\', "/")
    }

    fn classify(err: aws_sdk_s3::error::SdkError<impl std::error::Error + Send + Sync + 'static>) -> Error {
        if err.raw_response().is_some_and(|r| r.status().is_server_error()) {
            Error::TransientIo(err.to_string())
        } else {
            Error::Storage(err.to_string())
        }
    }
}

#[cfg(feature = "aws")]
#[async_trait]
impl StorageProvider for S3StorageProvider {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let key = self.key(path);
        with_retry(RetryPolicy::S3_BLOB, || {
            let key = key.clone();
            async move {
                let resp = self
                    .client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(&key)
                    .send()
                    .await
                    .map_err(Self::classify)?;
                let bytes = resp
                    .body
                    .collect()
                    .await
                    .map_err(|e| Error::TransientIo(e.to_string()))?
                    .into_bytes();
                Ok(bytes.to_vec())
            }
        })
        .await
    }

    async fn read_stream(&self, path: &Path) -> Result<BoxStream<'static, Result<Bytes>>> {
        // S3 objects are fetched whole and then chunked; the manifest's
        // part boundaries already bound each object's size to something
        // reasonable to hold in memory (§4.1 `partSize`).
        let data = self.read(path).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(Bytes::from(data)) })))
    }

    async fn list(&self, prefix: &Path) -> Result<Vec<String>> {
        let key_prefix = self.key(prefix);
        let mut out = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&key_prefix)
                .delimiter("/");
            if let Some(token) = continuation.take() {
                req = req.continuation_token(token);
            }
            let resp = with_retry(RetryPolicy::S3_BLOB, || {
                let req = req.clone();
                async move { req.send().await.map_err(Self::classify) }
            })
            .await?;
            for obj in resp.contents() {
                if let Some(key) = obj.key() {
                    out.push(key.trim_start_matches(&self.prefix.to_string_lossy().to_string()).to_string());
                }
            }
            match resp.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(out)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let key = self.key(path);
        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(e) => Err(Self::classify(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn local_provider_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalStorageProvider::new(dir.path());
        let path = PathBuf::from("indices/abc/0/snap-s1.dat");
        assert!(!provider.exists(&path).await.unwrap());
        fs::create_dir_all(dir.path().join("indices/abc/0")).await.unwrap();
        fs::write(dir.path().join(&path), b"manifest bytes").await.unwrap();
        assert!(provider.exists(&path).await.unwrap());
        assert_eq!(provider.read(&path).await.unwrap(), b"manifest bytes");
    }

    #[tokio::test]
    async fn local_provider_lists_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalStorageProvider::new(dir.path());
        fs::create_dir_all(dir.path().join("indices")).await.unwrap();
        fs::write(dir.path().join("indices/meta-idx.dat"), b"x").await.unwrap();
        let entries = provider.list(Path::new("indices")).await.unwrap();
        assert_eq!(entries, vec!["indices/meta-idx.dat".to_string()]);
    }
}
