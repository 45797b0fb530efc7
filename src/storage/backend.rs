//! Abstract object store contract.
//!
//! Every storage backend must implement [`ObjectStore`].  A bucket is a
//! tenant's partition; names are flat object keys inside it.  Reads hand
//! back a byte stream so callers never need the whole object in memory.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by every [`ObjectStore`] method.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Failure reported by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The named object does not exist.
    #[error("object not found: {bucket}/{name}")]
    NoSuchKey { bucket: String, name: String },

    /// Transport or backend failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    pub fn no_such_key(bucket: &str, name: &str) -> Self {
        StorageError::NoSuchKey {
            bucket: bucket.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NoSuchKey { .. })
    }

    /// Fixed, low-cardinality description used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::NoSuchKey { .. } => "not_found",
            StorageError::Other(_) => "upstream",
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Other(err.into())
    }
}

/// Summary of one listed or stat'ed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object name within the bucket. Collapsed prefixes end in `/`.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
}

/// An object opened for reading.
pub struct ObjectReader {
    /// Exact size reported by the store.
    pub size: u64,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Object bytes.
    pub body: BoxStream<'static, std::io::Result<Bytes>>,
}

/// Async object storage contract.
pub trait ObjectStore: Send + Sync + 'static {
    /// Create the bucket if it does not exist yet.
    fn ensure_bucket<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a, ()>;

    /// Store exactly `size` bytes read from `file` under `bucket/name`.
    fn put_object<'a>(
        &'a self,
        bucket: &'a str,
        name: &'a str,
        file: tokio::fs::File,
        size: u64,
        content_type: &'a str,
    ) -> StoreFuture<'a, ()>;

    /// Open `bucket/name` for streaming.
    fn get_object<'a>(&'a self, bucket: &'a str, name: &'a str) -> StoreFuture<'a, ObjectReader>;

    /// Describe `bucket/name` without reading it.
    fn stat_object<'a>(&'a self, bucket: &'a str, name: &'a str) -> StoreFuture<'a, ObjectInfo>;

    /// List one level of `bucket`. Missing buckets list as empty.
    fn list_objects<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a, Vec<ObjectInfo>>;

    /// Remove `bucket/name`.
    fn delete_object<'a>(&'a self, bucket: &'a str, name: &'a str) -> StoreFuture<'a, ()>;
}

/// Fold a flat set of names into one directory level.
///
/// Names containing `/` collapse into a single `prefix/` entry with size 0.
pub(crate) fn collapse_one_level(objects: impl IntoIterator<Item = ObjectInfo>) -> Vec<ObjectInfo> {
    let mut out: Vec<ObjectInfo> = Vec::new();
    for obj in objects {
        match obj.name.find('/') {
            Some(idx) => {
                let prefix = format!("{}/", &obj.name[..idx]);
                if !out.iter().any(|o| o.name == prefix) {
                    out.push(ObjectInfo {
                        name: prefix,
                        size: 0,
                        last_modified: obj.last_modified,
                    });
                }
            }
            None => out.push(obj),
        }
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, size: u64) -> ObjectInfo {
        ObjectInfo {
            name: name.to_string(),
            size,
            last_modified: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        }
    }

    #[test]
    fn test_collapse_keeps_flat_names() {
        let out = collapse_one_level(vec![info("b.txt", 2), info("a.txt", 1)]);
        let names: Vec<_> = out.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_collapse_nested_names_into_prefix() {
        let out = collapse_one_level(vec![
            info("docs/a.txt", 5),
            info("docs/b.txt", 7),
            info("top.txt", 1),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "docs/");
        assert_eq!(out[0].size, 0);
        assert_eq!(out[1].name, "top.txt");
    }

    #[test]
    fn test_storage_error_not_found() {
        assert!(StorageError::no_such_key("t", "x").is_not_found());
        assert!(!StorageError::Other(anyhow::anyhow!("down")).is_not_found());
    }

    #[test]
    fn test_storage_error_kind_omits_names() {
        let err = StorageError::no_such_key("acme", "private-report-2026.pdf");
        assert_eq!(err.kind(), "not_found");
        assert!(!err.kind().contains("private"));
        assert_eq!(StorageError::Other(anyhow::anyhow!("timeout")).kind(), "upstream");
    }
}
