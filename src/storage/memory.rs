//! In-memory storage backend.
//!
//! Buckets and objects are held in a `tokio::sync::RwLock<HashMap<...>>`.
//! Used for tests and for throwaway deployments; nothing survives a
//! restart.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::io::AsyncReadExt;

use super::backend::{collapse_one_level, ObjectInfo, ObjectReader, ObjectStore, StorageError, StoreFuture};

/// One stored object.
#[derive(Debug, Clone)]
struct MemoryObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

/// In-memory storage backend.
#[derive(Default)]
pub struct MemoryBackend {
    /// bucket -> (name -> object).
    buckets: tokio::sync::RwLock<HashMap<String, BTreeMap<String, MemoryObject>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

// ── ObjectStore implementation ─────────────────────────────────────────

impl ObjectStore for MemoryBackend {
    fn ensure_bucket<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            buckets.entry(bucket.to_string()).or_default();
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
            let mut data = Vec::with_capacity(size as usize);
            file.take(size).read_to_end(&mut data).await?;
            if data.len() as u64 != size {
                return Err(anyhow::anyhow!(
                    "short read staging {name}: expected {size} bytes, got {}",
                    data.len()
                )
                .into());
            }

            let mut buckets = self.buckets.write().await;
            let objects = buckets
                .get_mut(bucket)
                .ok_or_else(|| anyhow::anyhow!("bucket does not exist: {bucket}"))?;
            objects.insert(
                name.to_string(),
                MemoryObject {
                    data: Bytes::from(data),
                    last_modified: Utc::now(),
                },
            );
            Ok(())
        })
    }

    fn get_object<'a>(&'a self, bucket: &'a str, name: &'a str) -> StoreFuture<'a, ObjectReader> {
        Box::pin(async move {
            let buckets = self.buckets.read().await;
            let obj = buckets
                .get(bucket)
                .and_then(|objects| objects.get(name))
                .ok_or_else(|| StorageError::no_such_key(bucket, name))?;
            let data = obj.data.clone();
            Ok(ObjectReader {
                size: data.len() as u64,
                last_modified: obj.last_modified,
                body: Box::pin(futures::stream::once(async move {
                    Ok::<_, std::io::Error>(data)
                })),
            })
        })
    }

    fn stat_object<'a>(&'a self, bucket: &'a str, name: &'a str) -> StoreFuture<'a, ObjectInfo> {
        Box::pin(async move {
            let buckets = self.buckets.read().await;
            buckets
                .get(bucket)
                .and_then(|objects| objects.get(name))
                .map(|obj| ObjectInfo {
                    name: name.to_string(),
                    size: obj.data.len() as u64,
                    last_modified: obj.last_modified,
                })
                .ok_or_else(|| StorageError::no_such_key(bucket, name))
        })
    }

    fn list_objects<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a, Vec<ObjectInfo>> {
        Box::pin(async move {
            let buckets = self.buckets.read().await;
            let Some(objects) = buckets.get(bucket) else {
                return Ok(Vec::new());
            };
            Ok(collapse_one_level(objects.iter().map(|(name, obj)| ObjectInfo {
                name: name.clone(),
                size: obj.data.len() as u64,
                last_modified: obj.last_modified,
            })))
        })
    }

    fn delete_object<'a>(&'a self, bucket: &'a str, name: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            // Missing objects are not an error, matching S3 semantics.
            let mut buckets = self.buckets.write().await;
            if let Some(objects) = buckets.get_mut(bucket) {
                objects.remove(name);
            }
            Ok(())
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
