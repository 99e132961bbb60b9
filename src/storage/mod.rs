//! Blob storage abstraction
//!
//! Content-addressed binary artifacts (uploaded CVs, generated documents)
//! behind one client over the Apache Arrow `object_store` crate. Backends:
//! a local directory tree (keys map 1:1 to relative paths), an S3-style
//! bucket with identical key semantics, and in-memory for tests. Server-side
//! encryption on S3 is a bucket-policy concern; private objects get no URL
//! and callers use `signed_url`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as StoragePath;
use object_store::signer::Signer;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{StorageConfig, StorageProvider};
use crate::error::{CoreError, ErrorCode};

/// Longest accepted object key, in bytes.
const MAX_KEY_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("invalid file: {0}")]
    FileInvalid(String),

    #[error("storage provider error: {0}")]
    Provider(String),
}

impl StorageError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StorageError::FileNotFound(_) => ErrorCode::FileNotFound,
            StorageError::FileInvalid(_) => ErrorCode::FileInvalid,
            StorageError::Provider(_) => ErrorCode::ProviderError,
        }
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        let code = err.code();
        CoreError::new(code, err.to_string())
    }
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StorageError::FileNotFound(path),
            other => StorageError::Provider(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Options accepted by [`BlobStore::upload`].
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    pub public: bool,
}

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub provider: &'static str,
    pub key: String,
    /// Direct URL when the object is publicly addressable, otherwise `None`
    /// and callers go through [`BlobStore::signed_url`].
    pub url: Option<String>,
    pub size: u64,
}

/// Metadata for a stored object.
#[derive(Debug, Clone)]
pub struct BlobMetadata {
    pub key: String,
    pub size: u64,
    pub last_modified: chrono::DateTime<chrono::Utc>,
    pub e_tag: Option<String>,
}

#[derive(Clone)]
enum Backend {
    Local { base_path: PathBuf },
    Memory,
    S3 { s3: Arc<AmazonS3>, bucket: String, endpoint: Option<String> },
}

/// Storage client wrapping an `object_store` backend.
#[derive(Clone)]
pub struct BlobStore {
    store: Arc<dyn ObjectStore>,
    backend: Backend,
}

impl BlobStore {
    /// Build the backend selected by configuration.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.provider {
            StorageProvider::Local => Self::local(&config.base_path),
            StorageProvider::Memory => Ok(Self::in_memory()),
            StorageProvider::S3 => Self::s3(config),
        }
    }

    /// Local directory tree rooted at `base_path`.
    pub fn local(base_path: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(base_path)
            .map_err(|e| StorageError::Provider(format!("cannot create base path: {e}")))?;
        let store = LocalFileSystem::new_with_prefix(base_path)
            .map_err(|e| StorageError::Provider(e.to_string()))?;
        info!(base_path = %base_path.display(), "Local blob store ready");
        Ok(Self {
            store: Arc::new(store),
            backend: Backend::Local {
                base_path: base_path.to_path_buf(),
            },
        })
    }

    /// In-memory storage for tests and development.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            backend: Backend::Memory,
        }
    }

    fn s3(config: &StorageConfig) -> Result<Self> {
        let mut builder = AmazonS3Builder::new().with_bucket_name(&config.bucket);

        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            builder = builder
                .with_access_key_id(access_key)
                .with_secret_access_key(secret_key);
        }

        let s3 = Arc::new(
            builder
                .build()
                .map_err(|e| StorageError::Provider(e.to_string()))?,
        );
        info!(bucket = %config.bucket, "S3 blob store ready");
        Ok(Self {
            store: s3.clone(),
            backend: Backend::S3 {
                s3,
                bucket: config.bucket.clone(),
                endpoint: config.endpoint.clone(),
            },
        })
    }

    pub fn provider(&self) -> &'static str {
        match self.backend {
            Backend::Local { .. } => "local",
            Backend::Memory => "memory",
            Backend::S3 { .. } => "s3",
        }
    }

    /// Upload bytes under a key. Empty payloads and malformed keys are
    /// rejected before the backend is touched.
    pub async fn upload(&self, data: Vec<u8>, key: &str, opts: &UploadOptions) -> Result<UploadResult> {
        let path = validate_key(key)?;
        if data.is_empty() {
            return Err(StorageError::FileInvalid("empty upload".to_string()));
        }
        let size = data.len() as u64;

        let mut attributes = Attributes::new();
        if let Some(content_type) = &opts.content_type {
            attributes.insert(Attribute::ContentType, content_type.clone().into());
        }
        for (name, value) in &opts.metadata {
            attributes.insert(Attribute::Metadata(name.clone().into()), value.clone().into());
        }

        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store.put_opts(&path, data.into(), options).await?;
        debug!(key, size, provider = self.provider(), "Uploaded blob");

        let url = if opts.public { self.public_url(key) } else { None };

        Ok(UploadResult {
            provider: self.provider(),
            key: key.to_string(),
            url,
            size,
        })
    }

    pub async fn download(&self, key: &str) -> Result<bytes::Bytes> {
        let path = validate_key(key)?;
        let result = self.store.get(&path).await?;
        let bytes = result.bytes().await?;
        debug!(key, size = bytes.len(), "Downloaded blob");
        Ok(bytes)
    }

    /// Returns whether the object existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let path = validate_key(key)?;
        match self.store.delete(&path).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = validate_key(key)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn metadata(&self, key: &str) -> Result<BlobMetadata> {
        let path = validate_key(key)?;
        let meta = self.store.head(&path).await?;
        Ok(BlobMetadata {
            key: key.to_string(),
            size: meta.size,
            last_modified: meta.last_modified,
            e_tag: meta.e_tag,
        })
    }

    /// Time-limited URL for direct reads. On local storage this is a plain
    /// `file://` URL and the TTL is advisory.
    pub async fn signed_url(&self, key: &str, ttl_secs: u64) -> Result<String> {
        let path = validate_key(key)?;
        match &self.backend {
            Backend::S3 { s3, .. } => {
                let url = s3
                    .signed_url(reqwest::Method::GET, &path, Duration::from_secs(ttl_secs))
                    .await
                    .map_err(|e| StorageError::Provider(e.to_string()))?;
                Ok(url.to_string())
            }
            Backend::Local { base_path } => {
                Ok(format!("file://{}/{}", base_path.display(), key))
            }
            Backend::Memory => Ok(format!("memory://{key}")),
        }
    }

    /// List keys under a prefix, up to `limit`.
    pub async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        let path = if prefix.is_empty() {
            None
        } else {
            Some(validate_key(prefix)?)
        };

        let mut keys = Vec::new();
        let mut stream = self.store.list(path.as_ref());
        while let Some(item) = stream.next().await {
            let meta = item?;
            keys.push(meta.location.to_string());
            if keys.len() >= limit {
                break;
            }
        }
        Ok(keys)
    }

    pub async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let from = validate_key(src)?;
        let to = validate_key(dst)?;
        self.store.copy(&from, &to).await?;
        Ok(())
    }

    pub async fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let from = validate_key(src)?;
        let to = validate_key(dst)?;
        self.store.rename(&from, &to).await?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> Option<String> {
        match &self.backend {
            Backend::Local { base_path } => {
                Some(format!("file://{}/{}", base_path.display(), key))
            }
            Backend::Memory => None,
            Backend::S3 { bucket, endpoint, .. } => match endpoint {
                Some(endpoint) => Some(format!("{endpoint}/{bucket}/{key}")),
                None => Some(format!("https://{bucket}.s3.amazonaws.com/{key}")),
            },
        }
    }
}

/// Keys must be non-empty, at most 1024 bytes, relative, and free of `..`
/// path traversal segments.
fn validate_key(key: &str) -> Result<StoragePath> {
    if key.is_empty() {
        return Err(StorageError::FileInvalid("empty object key".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StorageError::FileInvalid(format!(
            "object key exceeds {MAX_KEY_LEN} bytes"
        )));
    }
    if key.starts_with('/') {
        return Err(StorageError::FileInvalid("object key must be relative".to_string()));
    }
    if key.split('/').any(|segment| segment == "..") {
        return Err(StorageError::FileInvalid(
            "object key must not contain '..' segments".to_string(),
        ));
    }
    StoragePath::parse(key).map_err(|e| StorageError::FileInvalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_download_round_trip() {
        let store = BlobStore::in_memory();
        let data = b"fake pdf bytes".to_vec();

        let result = store
            .upload(data.clone(), "uploads/user-1/cv.pdf", &UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(result.size, data.len() as u64);
        assert_eq!(result.provider, "memory");
        assert!(result.url.is_none());

        let downloaded = store.download("uploads/user-1/cv.pdf").await.unwrap();
        assert_eq!(downloaded, data);
    }

    #[tokio::test]
    async fn test_empty_upload_rejected() {
        let store = BlobStore::in_memory();
        let result = store
            .upload(Vec::new(), "uploads/empty.pdf", &UploadOptions::default())
            .await;
        assert!(matches!(result, Err(StorageError::FileInvalid(_))));
    }

    #[tokio::test]
    async fn test_traversal_key_rejected() {
        let store = BlobStore::in_memory();
        let result = store
            .upload(b"x".to_vec(), "uploads/../secrets", &UploadOptions::default())
            .await;
        assert!(matches!(result, Err(StorageError::FileInvalid(_))));

        let result = store.download("../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::FileInvalid(_))));
    }

    #[tokio::test]
    async fn test_oversized_key_rejected() {
        let store = BlobStore::in_memory();
        let key = "k".repeat(MAX_KEY_LEN + 1);
        let result = store.exists(&key).await;
        assert!(matches!(result, Err(StorageError::FileInvalid(_))));
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let store = BlobStore::in_memory();
        let result = store.download("nope/missing.pdf").await;
        assert!(matches!(result, Err(StorageError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_and_exists() {
        let store = BlobStore::in_memory();
        store
            .upload(b"x".to_vec(), "a/b.bin", &UploadOptions::default())
            .await
            .unwrap();

        assert!(store.exists("a/b.bin").await.unwrap());
        assert!(store.delete("a/b.bin").await.unwrap());
        assert!(!store.exists("a/b.bin").await.unwrap());
        assert!(!store.delete("a/b.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_and_rename() {
        let store = BlobStore::in_memory();
        store
            .upload(b"doc".to_vec(), "src/doc.pdf", &UploadOptions::default())
            .await
            .unwrap();

        store.copy("src/doc.pdf", "copy/doc.pdf").await.unwrap();
        assert!(store.exists("src/doc.pdf").await.unwrap());
        assert!(store.exists("copy/doc.pdf").await.unwrap());

        store.rename("src/doc.pdf", "moved/doc.pdf").await.unwrap();
        assert!(!store.exists("src/doc.pdf").await.unwrap());
        assert!(store.exists("moved/doc.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_with_limit() {
        let store = BlobStore::in_memory();
        for i in 0..5 {
            store
                .upload(b"x".to_vec(), &format!("batch/file-{i}.bin"), &UploadOptions::default())
                .await
                .unwrap();
        }

        let keys = store.list("batch", 3).await.unwrap();
        assert_eq!(keys.len(), 3);
        let all = store.list("batch", 100).await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn test_local_backend_round_trip() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = BlobStore::local(temp_dir.path()).unwrap();

        store
            .upload(b"on disk".to_vec(), "nested/dir/file.bin", &UploadOptions::default())
            .await
            .unwrap();
        let data = store.download("nested/dir/file.bin").await.unwrap();
        assert_eq!(&data[..], b"on disk");

        let url = store.signed_url("nested/dir/file.bin", 60).await.unwrap();
        assert!(url.starts_with("file://"));
    }
}
