//! Staging of uploaded videos as local files the decoder can open.
//!
//! Two backends: a plain local temp file, or a round trip through an S3 bucket
//! for deployments that keep uploads off the serving host's disk until needed.

use crate::config::{StorageBackend, StorageConfig};
use async_trait::async_trait;
use aws_sdk_s3::{config::Region, primitives::ByteStream, Client};
use bytes::Bytes;
use std::{
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::TempPath;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to write temp file: {0}")]
    LocalWrite(#[from] std::io::Error),
    #[error("Failed to upload to object storage: {0}")]
    Upload(String),
    #[error("Failed to download from object storage: {0}")]
    Download(String),
    #[error("Failed to delete from object storage: {0}")]
    Delete(String),
    #[error("Storage worker failed: {0}")]
    Worker(String),
}

/// A local copy of an upload. The file is removed when this is dropped.
#[derive(Debug)]
pub struct StagedFile {
    path: TempPath,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
pub trait TempStorage: Send + Sync + 'static {
    async fn stage(&self, data: Bytes, suffix: &str) -> Result<StagedFile, StorageError>;
}

async fn write_local(
    dir: PathBuf,
    data: Bytes,
    suffix: String,
) -> Result<StagedFile, StorageError> {
    tokio::task::spawn_blocking(move || -> Result<StagedFile, StorageError> {
        let mut file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&suffix)
            .tempfile_in(&dir)?;
        file.write_all(&data)?;
        file.flush()?;
        Ok(StagedFile {
            path: file.into_temp_path(),
        })
    })
    .await
    .map_err(|e| StorageError::Worker(e.to_string()))?
}

pub struct LocalTempStorage {
    dir: PathBuf,
}

impl LocalTempStorage {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl TempStorage for LocalTempStorage {
    async fn stage(&self, data: Bytes, suffix: &str) -> Result<StagedFile, StorageError> {
        write_local(self.dir.clone(), data, suffix.to_string()).await
    }
}

/// The three object calls the S3 round trip needs.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), StorageError>;
    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

pub struct S3Bucket {
    client: Client,
    bucket: String,
}

impl S3Bucket {
    pub async fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let bucket = config
            .s3
            .bucket
            .clone()
            .ok_or_else(|| StorageError::Upload("no bucket configured".into()))?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.s3.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.s3.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.s3.endpoint_url.is_some())
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket,
        })
    }
}

#[async_trait]
impl ObjectStore for S3Bucket {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;
        tracing::debug!("Uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Download(e.to_string()))?;
        let data = object
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Download(e.to_string()))?
            .into_bytes();
        Ok(data)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Delete(e.to_string()))?;
        tracing::debug!("Deleted s3://{}/{}", self.bucket, key);
        Ok(())
    }
}

/// Stages uploads through an object store: put, fetch back to a local temp
/// file, then delete the remote copy.
pub struct S3TempStorage {
    store: Box<dyn ObjectStore>,
    prefix: String,
    local_dir: PathBuf,
}

impl S3TempStorage {
    pub async fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let store = S3Bucket::new(config).await?;
        Ok(Self::with_store(
            Box::new(store),
            &config.s3.prefix,
            config.get_temp_dir(),
        ))
    }

    pub fn with_store(store: Box<dyn ObjectStore>, prefix: &str, local_dir: PathBuf) -> Self {
        Self {
            store,
            prefix: prefix.trim_matches('/').to_string(),
            local_dir,
        }
    }

    fn object_key(&self, suffix: &str) -> String {
        let name = format!("{}{}", uuid::Uuid::new_v4(), suffix);
        if self.prefix.is_empty() {
            name
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    async fn delete_remote(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            tracing::warn!("Failed to delete remote object {}: {}", key, e);
        }
    }
}

#[async_trait]
impl TempStorage for S3TempStorage {
    async fn stage(&self, data: Bytes, suffix: &str) -> Result<StagedFile, StorageError> {
        let key = self.object_key(suffix);

        if let Err(e) = self.store.put(&key, data).await {
            // A failed put can still leave a partial object behind.
            self.delete_remote(&key).await;
            return Err(e);
        }

        let staged = match self.store.get(&key).await {
            Ok(data) => write_local(self.local_dir.clone(), data, suffix.to_string()).await,
            Err(e) => Err(e),
        };
        self.delete_remote(&key).await;
        staged
    }
}

pub async fn from_config(config: &StorageConfig) -> Result<Box<dyn TempStorage>, StorageError> {
    match config.backend {
        StorageBackend::Local => Ok(Box::new(LocalTempStorage::new(config.get_temp_dir()))),
        StorageBackend::S3 => Ok(Box::new(S3TempStorage::new(config).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::{collections::HashMap, sync::Arc};

    #[derive(Default)]
    struct Calls {
        objects: HashMap<String, Bytes>,
        deleted: Vec<String>,
    }

    /// In-memory bucket; `fail_get` makes every download fail.
    #[derive(Clone, Default)]
    struct MemoryStore {
        calls: Arc<Mutex<Calls>>,
        fail_get: bool,
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn put(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
            self.calls.lock().objects.insert(key.to_string(), data);
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
            if self.fail_get {
                return Err(StorageError::Download("connection reset".into()));
            }
            self.calls
                .lock()
                .objects
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::Download(format!("no such key {}", key)))
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            let mut calls = self.calls.lock();
            calls.objects.remove(key);
            calls.deleted.push(key.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_local_staging_round_trip_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalTempStorage::new(dir.path().to_path_buf());

        let staged = storage
            .stage(Bytes::from_static(b"not really a video"), ".mp4")
            .await
            .unwrap();
        let path = staged.path().to_path_buf();

        assert!(path.starts_with(dir.path()));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp4"));
        assert_eq!(std::fs::read(&path).unwrap(), b"not really a video");

        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_local_staging_into_missing_dir_fails() {
        let storage = LocalTempStorage::new(PathBuf::from("/nonexistent/staging/dir"));

        let result = storage.stage(Bytes::from_static(b"data"), ".mp4").await;
        assert!(matches!(result, Err(StorageError::LocalWrite(_))));
    }

    #[tokio::test]
    async fn test_s3_object_keys_are_unique_and_prefixed() {
        let config = StorageConfig {
            backend: StorageBackend::S3,
            temp_dir: None,
            s3: crate::config::S3Config {
                bucket: Some("bucket".into()),
                region: Some("eu-west-1".into()),
                prefix: "/uploads/".into(),
                endpoint_url: Some("http://127.0.0.1:9000".into()),
            },
        };
        let storage = S3TempStorage::new(&config).await.unwrap();

        let first = storage.object_key(".mp4");
        let second = storage.object_key(".mp4");

        assert!(first.starts_with("uploads/"));
        assert!(first.ends_with(".mp4"));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_object_store_round_trip_removes_remote_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        let storage =
            S3TempStorage::with_store(Box::new(store.clone()), "uploads", dir.path().to_path_buf());

        let staged = storage
            .stage(Bytes::from_static(b"frames"), ".mp4")
            .await
            .unwrap();

        assert_eq!(std::fs::read(staged.path()).unwrap(), b"frames");
        let calls = store.calls.lock();
        assert!(calls.objects.is_empty());
        assert_eq!(calls.deleted.len(), 1);
        assert!(calls.deleted[0].starts_with("uploads/"));
    }

    #[tokio::test]
    async fn test_failed_download_still_deletes_remote_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore {
            fail_get: true,
            ..Default::default()
        };
        let storage =
            S3TempStorage::with_store(Box::new(store.clone()), "uploads", dir.path().to_path_buf());

        let result = storage.stage(Bytes::from_static(b"frames"), ".mp4").await;

        assert!(matches!(result, Err(StorageError::Download(_))));
        let calls = store.calls.lock();
        assert_eq!(calls.deleted.len(), 1);
        assert!(calls.objects.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
