//! Blob storage for uploaded files
//!
//! Jobs reference uploads by an opaque `upload_ref` (the content hash).
//! The filesystem implementation keeps the bytes plus a JSON sidecar with
//! the declared filename and MIME type.

use crate::error::{SourceError, SourceResult};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::debug;

/// Synthetic canonical URL for uploaded content, derived from its hash
///
/// Uploads have no real URL; the content hash gives re-uploads of the same
/// bytes the same document identity.
pub fn synthetic_upload_url(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("file://{:x}", hasher.finalize())
}

/// An upload retrieved from blob storage
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub bytes: Bytes,
    pub filename: Option<String>,
    pub mime: Option<String>,
}

/// Blob store the job payload's `upload_ref` points into
#[async_trait]
pub trait UploadStore: Send + Sync {
    /// Persist bytes and return the `upload_ref` to put in a job payload
    async fn store(
        &self,
        bytes: Bytes,
        filename: Option<String>,
        mime: Option<String>,
    ) -> SourceResult<String>;

    /// Retrieve a previously stored upload
    async fn fetch(&self, upload_ref: &str) -> SourceResult<StoredUpload>;
}

#[derive(Debug, Serialize, Deserialize)]
struct SidecarMeta {
    filename: Option<String>,
    mime: Option<String>,
}

/// Filesystem-backed upload store, one file per upload plus a JSON sidecar
pub struct FsUploadStore {
    root: PathBuf,
}

impl FsUploadStore {
    /// Create a store rooted at `root`, creating the directory if needed
    ///
    /// # Errors
    ///
    /// Returns `SourceError::UploadStore` if the directory cannot be created.
    pub fn new(root: PathBuf) -> SourceResult<Self> {
        std::fs::create_dir_all(&root)
            .map_err(|e| SourceError::UploadStore(format!("create {}: {e}", root.display())))?;
        Ok(Self { root })
    }

    fn blob_path(&self, upload_ref: &str) -> PathBuf {
        self.root.join(upload_ref)
    }

    fn meta_path(&self, upload_ref: &str) -> PathBuf {
        self.root.join(format!("{upload_ref}.meta.json"))
    }
}

#[async_trait]
impl UploadStore for FsUploadStore {
    async fn store(
        &self,
        bytes: Bytes,
        filename: Option<String>,
        mime: Option<String>,
    ) -> SourceResult<String> {
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let upload_ref = format!("{:x}", hasher.finalize());

        let blob = self.blob_path(&upload_ref);
        let meta = self.meta_path(&upload_ref);
        let sidecar = SidecarMeta { filename, mime };
        let sidecar_json = serde_json::to_vec(&sidecar)
            .map_err(|e| SourceError::UploadStore(format!("encode sidecar: {e}")))?;

        let write_ref = upload_ref.clone();
        tokio::task::spawn_blocking(move || -> SourceResult<()> {
            std::fs::write(&blob, &bytes)
                .map_err(|e| SourceError::UploadStore(format!("write blob: {e}")))?;
            std::fs::write(&meta, &sidecar_json)
                .map_err(|e| SourceError::UploadStore(format!("write sidecar: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| SourceError::UploadStore(format!("store task failed: {e}")))??;

        debug!(upload_ref = %write_ref, "Stored upload");
        Ok(write_ref)
    }

    async fn fetch(&self, upload_ref: &str) -> SourceResult<StoredUpload> {
        let blob = self.blob_path(upload_ref);
        let meta = self.meta_path(upload_ref);
        let reference = upload_ref.to_string();

        tokio::task::spawn_blocking(move || -> SourceResult<StoredUpload> {
            let bytes = std::fs::read(&blob).map_err(|e| {
                SourceError::UploadStore(format!("upload {reference} not readable: {e}"))
            })?;
            let sidecar: SidecarMeta = std::fs::read(&meta)
                .ok()
                .and_then(|raw| serde_json::from_slice(&raw).ok())
                .unwrap_or(SidecarMeta {
                    filename: None,
                    mime: None,
                });
            Ok(StoredUpload {
                bytes: Bytes::from(bytes),
                filename: sidecar.filename,
                mime: sidecar.mime,
            })
        })
        .await
        .map_err(|e| SourceError::UploadStore(format!("fetch task failed: {e}")))?
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_url_is_stable() {
        let a = synthetic_upload_url(b"same bytes");
        let b = synthetic_upload_url(b"same bytes");
        let c = synthetic_upload_url(b"other bytes");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("file://"));
    }

    #[tokio::test]
    async fn test_store_fetch_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsUploadStore::new(dir.path().to_path_buf()).unwrap();

        let upload_ref = store
            .store(
                Bytes::from_static(b"document body"),
                Some("doc.txt".to_string()),
                Some("text/plain".to_string()),
            )
            .await
            .unwrap();

        let fetched = store.fetch(&upload_ref).await.unwrap();
        assert_eq!(fetched.bytes.as_ref(), b"document body");
        assert_eq!(fetched.filename.as_deref(), Some("doc.txt"));
        assert_eq!(fetched.mime.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_fetch_unknown_ref_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsUploadStore::new(dir.path().to_path_buf()).unwrap();
        assert!(store.fetch("deadbeef").await.is_err());
    }

    #[tokio::test]
    async fn test_same_content_same_ref() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsUploadStore::new(dir.path().to_path_buf()).unwrap();

        let a = store
            .store(Bytes::from_static(b"abc"), None, None)
            .await
            .unwrap();
        let b = store
            .store(Bytes::from_static(b"abc"), Some("x".to_string()), None)
            .await
            .unwrap();
        assert_eq!(a, b);
    }
}
