//! Blob storage for match videos and analysis audit records.
//!
//! Objects are addressed by a relative key (e.g. `matches/match_7.mp4`);
//! that key is what gets persisted as a match's `video_url`. Clients and
//! the scoring oracle receive a time-limited URL from [`BlobStore::signed_url`].

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;

use crate::signing::LinkSigner;

/// Errors from a blob store backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Invalid or expired media link: {0}")]
    InvalidLink(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `bytes` under `key`, returning the reference to store.
    async fn store(&self, bytes: Bytes, key: &str, content_type: &str)
        -> Result<String, StorageError>;

    /// Read back an object previously returned by [`BlobStore::store`].
    async fn retrieve(&self, url_ref: &str) -> Result<Bytes, StorageError>;

    /// A URL granting read access to `url_ref` for `ttl`.
    async fn signed_url(&self, url_ref: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// Reject keys that are empty, absolute, or escape the store root.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let path = Path::new(key);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if key.is_empty() || escapes {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Local filesystem
// ---------------------------------------------------------------------------

/// Stores objects below a root directory. Used in development and tests.
///
/// Signed URLs point at the API's `/media` route under `public_url`, which
/// checks the link token and streams the object back.
pub struct LocalBlobStore {
    root: PathBuf,
    public_url: String,
    signer: Arc<LinkSigner>,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_url: &str, signer: Arc<LinkSigner>) -> Self {
        Self {
            root: root.into(),
            public_url: public_url.trim_end_matches('/').to_string(),
            signer,
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn store(
        &self,
        bytes: Bytes,
        key: &str,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write then rename so readers never observe a partial object.
        let tmp = path.with_extension("partial");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(key, size = bytes.len(), "Stored blob locally");
        Ok(key.to_string())
    }

    async fn retrieve(&self, url_ref: &str) -> Result<Bytes, StorageError> {
        let path = self.path_for(url_ref)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(url_ref.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn signed_url(&self, url_ref: &str, ttl: Duration) -> Result<String, StorageError> {
        validate_key(url_ref)?;
        let token = self.signer.sign(url_ref, ttl)?;
        Ok(format!("{}/media/{url_ref}?token={token}", self.public_url))
    }
}

// ---------------------------------------------------------------------------
// S3
// ---------------------------------------------------------------------------

/// Stores objects in an S3 bucket, credentials from the default AWS chain.
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from the environment (`AWS_REGION`, credentials, ...).
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_s3::Client::new(&config), bucket)
    }
}

fn s3_error(err: impl std::error::Error + 'static) -> StorageError {
    StorageError::S3(aws_sdk_s3::error::DisplayErrorContext(err).to_string())
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn store(
        &self,
        bytes: Bytes,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        validate_key(key)?;
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(s3_error)?;

        tracing::debug!(bucket = %self.bucket, key, size, "Stored blob in S3");
        Ok(key.to_string())
    }

    async fn retrieve(&self, url_ref: &str) -> Result<Bytes, StorageError> {
        validate_key(url_ref)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(url_ref)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound(url_ref.to_string())
                } else {
                    s3_error(e)
                }
            })?;

        let data = output.body.collect().await.map_err(s3_error)?;
        Ok(data.into_bytes())
    }

    async fn signed_url(&self, url_ref: &str, ttl: Duration) -> Result<String, StorageError> {
        validate_key(url_ref)?;
        let presign = PresigningConfig::expires_in(ttl).map_err(s3_error)?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(url_ref)
            .presigned(presign)
            .await
            .map_err(s3_error)?;
        Ok(request.uri().to_string())
    }
}
