//! Local filesystem storage backend.
//!
//! Objects are stored as flat files under `{root}/{bucket}/{name}`.
//! Writes go to a temp file under `{root}/.tmp`, are fsynced, and are then
//! renamed into place so readers never observe a partial object.

use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::backend::{ObjectInfo, ObjectReader, ObjectStore, StorageError, StoreFuture};

/// Stores objects on the local filesystem.
pub struct LocalBackend {
    /// Root directory for all stored objects.
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new `LocalBackend` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self { root })
    }

    /// Resolve a bucket directory, rejecting names that escape the root.
    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        if bucket.is_empty() || bucket.starts_with('.') || !is_single_component(bucket) {
            return Err(anyhow::anyhow!("invalid bucket name: {bucket:?}").into());
        }
        Ok(self.root.join(bucket))
    }

    /// Resolve an object path, rejecting path traversal.
    fn object_path(&self, bucket: &str, name: &str) -> Result<PathBuf, StorageError> {
        let dir = self.bucket_dir(bucket)?;
        if name.is_empty()
            || Path::new(name)
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(anyhow::anyhow!("invalid object name: {name:?}").into());
        }
        Ok(dir.join(name))
    }

    /// Generate a temp file path under .tmp/ for atomic writes.
    fn temp_path(&self) -> PathBuf {
        let id: [u8; 8] = rand::random();
        self.root.join(".tmp").join(format!("tmp-{}", hex::encode(id)))
    }

    async fn info_for(path: &Path, name: String) -> Result<ObjectInfo, StorageError> {
        let meta = tokio::fs::metadata(path).await?;
        let last_modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(ObjectInfo {
            name,
            size: if meta.is_dir() { 0 } else { meta.len() },
            last_modified,
        })
    }
}

fn is_single_component(s: &str) -> bool {
    let mut components = Path::new(s).components();
    matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none()
}

fn map_not_found(err: std::io::Error, bucket: &str, name: &str) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::no_such_key(bucket, name)
    } else {
        err.into()
    }
}

impl ObjectStore for LocalBackend {
    fn ensure_bucket<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let dir = self.bucket_dir(bucket)?;
            tokio::fs::create_dir_all(dir).await?;
            Ok(())
        })
    }

    fn put_object<'a>(
        &'a self,
        bucket: &'a str,
        name: &'a str,
        file: tokio::fs::File,
        size: u64,
        _content_type: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let final_path = self.object_path(bucket, name)?;
            if let Some(parent) = final_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let tmp_path = self.temp_path();
            let result: Result<(), StorageError> = async {
                let mut out = tokio::fs::File::create(&tmp_path).await?;
                let mut bounded = tokio::io::AsyncReadExt::take(file, size);
                let copied = tokio::io::copy(&mut bounded, &mut out).await?;
                if copied != size {
                    return Err(StorageError::from(anyhow::anyhow!(
                        "short read storing {name}: expected {size} bytes, got {copied}"
                    )));
                }
                out.flush().await?;
                out.sync_all().await?;
                tokio::fs::rename(&tmp_path, &final_path).await?;
                Ok(())
            }
            .await;

            if result.is_err() {
                let _ = tokio::fs::remove_file(&tmp_path).await;
            }
            result
        })
    }

    fn get_object<'a>(&'a self, bucket: &'a str, name: &'a str) -> StoreFuture<'a, ObjectReader> {
        Box::pin(async move {
            let path = self.object_path(bucket, name)?;
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| map_not_found(e, bucket, name))?;
            let meta = file.metadata().await?;
            if meta.is_dir() {
                return Err(StorageError::no_such_key(bucket, name));
            }
            Ok(ObjectReader {
                size: meta.len(),
                last_modified: meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now()),
                body: Box::pin(ReaderStream::new(file)),
            })
        })
    }

    fn stat_object<'a>(&'a self, bucket: &'a str, name: &'a str) -> StoreFuture<'a, ObjectInfo> {
        Box::pin(async move {
            let path = self.object_path(bucket, name)?;
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => Self::info_for(&path, name.to_string()).await,
                Ok(_) => Err(StorageError::no_such_key(bucket, name)),
                Err(e) => Err(map_not_found(e, bucket, name)),
            }
        })
    }

    fn list_objects<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a, Vec<ObjectInfo>> {
        Box::pin(async move {
            let dir = self.bucket_dir(bucket)?;
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };

            let mut out = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let file_name = entry.file_name().to_string_lossy().into_owned();
                let is_dir = entry.file_type().await?.is_dir();
                let name = if is_dir {
                    format!("{file_name}/")
                } else {
                    file_name
                };
                out.push(Self::info_for(&entry.path(), name).await?);
            }
            out.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(out)
        })
    }

    fn delete_object<'a>(&'a self, bucket: &'a str, name: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = self.object_path(bucket, name)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) => Err(map_not_found(e, bucket, name)),
            }
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
