//! AWS S3 storage backend.
//!
//! Every tenant partition lives under a prefix of one upstream S3 bucket.
//!
//! Key mapping:
//!   Objects:  `{prefix}{tenant}/{name}`
//!
//! Credentials are resolved via the standard AWS credential chain
//! (env vars, `~/.aws/credentials`, IAM role, etc.) unless explicit keys
//! are configured.

use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::backend::{ObjectInfo, ObjectReader, ObjectStore, StorageError, StoreFuture};

/// Backend that forwards operations to AWS S3 (or any S3-compatible API).
pub struct AwsBackend {
    /// AWS S3 SDK client.
    client: Client,
    /// The single upstream S3 bucket.
    bucket: String,
    /// Key prefix for all objects in the upstream bucket.
    prefix: String,
}

impl AwsBackend {
    /// Create a new AWS backend.
    ///
    /// Loads credentials from the default chain unless both explicit keys
    /// are given, and honours a custom endpoint for MinIO or LocalStack.
    pub async fn new(
        bucket: String,
        region: String,
        prefix: String,
        endpoint_url: Option<String>,
        use_path_style: bool,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
    ) -> anyhow::Result<Self> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region));

        if let Some(ref endpoint) = endpoint_url {
            config_loader = config_loader.endpoint_url(endpoint);
        }

        if let (Some(ref ak), Some(ref sk)) = (&access_key_id, &secret_access_key) {
            let creds = aws_sdk_s3::config::Credentials::new(
                ak,
                sk,
                None, // session_token
                None, // expiry
                "filegate-config",
            );
            config_loader = config_loader.credentials_provider(creds);
        }

        let sdk_config = config_loader.load().await;

        let s3_config_builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(use_path_style);

        let client = Client::from_conf(s3_config_builder.build());

        info!(
            "AWS storage backend initialized: bucket={} prefix='{}'",
            bucket, prefix
        );

        Ok(Self {
            client,
            bucket,
            prefix,
        })
    }

    /// Map an SDK error to a storage error with context.
    fn map_sdk_error(context: &str, err: impl std::fmt::Display) -> StorageError {
        StorageError::Other(anyhow::anyhow!("AWS S3 {context}: {err}"))
    }
}

/// Reject tenant keys that could name another tenant's key space.
///
/// A tenant is exactly one key segment, so `a` can never reach `a/b`.
fn check_tenant(tenant: &str) -> Result<(), StorageError> {
    if tenant.is_empty() || tenant == "." || tenant == ".." || tenant.contains('/') {
        return Err(anyhow::anyhow!("invalid tenant partition: {tenant:?}").into());
    }
    Ok(())
}

/// Upstream key for `name` inside a tenant partition.
fn object_key(prefix: &str, tenant: &str, name: &str) -> Result<String, StorageError> {
    check_tenant(tenant)?;
    if name.is_empty() {
        return Err(anyhow::anyhow!("empty object name").into());
    }
    Ok(format!("{prefix}{tenant}/{name}"))
}

/// Upstream listing prefix for a tenant partition.
fn tenant_prefix(prefix: &str, tenant: &str) -> Result<String, StorageError> {
    check_tenant(tenant)?;
    Ok(format!("{prefix}{tenant}/"))
}

fn to_chrono(ts: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    ts.and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
        .unwrap_or_else(Utc::now)
}

impl ObjectStore for AwsBackend {
    fn ensure_bucket<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            // Tenant partitions are key prefixes; nothing to create upstream.
            check_tenant(bucket)?;
            debug!(
                "AWS ensure_bucket: {} (no-op, namespaced in {})",
                bucket, self.bucket
            );
            Ok(())
        })
    }

    fn put_object<'a>(
        &'a self,
        bucket: &'a str,
        name: &'a str,
        file: tokio::fs::File,
        size: u64,
        content_type: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let s3_key = object_key(&self.prefix, bucket, name)?;
            debug!("AWS put_object: bucket={} key={} size={}", self.bucket, s3_key, size);

            let body = ByteStream::read_from()
                .file(file)
                .length(Length::Exact(size))
                .build()
                .await
                .map_err(|e| Self::map_sdk_error("put_object body", e))?;

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .content_type(content_type)
                .content_length(size as i64)
                .body(body)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("put_object", e))?;

            Ok(())
        })
    }

    fn get_object<'a>(&'a self, bucket: &'a str, name: &'a str) -> StoreFuture<'a, ObjectReader> {
        Box::pin(async move {
            let s3_key = object_key(&self.prefix, bucket, name)?;
            debug!("AWS get_object: bucket={} key={}", self.bucket, s3_key);

            let resp = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        StorageError::no_such_key(bucket, name)
                    } else {
                        Self::map_sdk_error("get_object", service_err)
                    }
                })?;

            let size = resp.content_length().unwrap_or(0).max(0) as u64;
            let last_modified = to_chrono(resp.last_modified());
            let reader = resp.body.into_async_read();

            Ok(ObjectReader {
                size,
                last_modified,
                body: Box::pin(ReaderStream::new(reader)),
            })
        })
    }

    fn stat_object<'a>(&'a self, bucket: &'a str, name: &'a str) -> StoreFuture<'a, ObjectInfo> {
        Box::pin(async move {
            let s3_key = object_key(&self.prefix, bucket, name)?;
            debug!("AWS head_object: bucket={} key={}", self.bucket, s3_key);

            match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .send()
                .await
            {
                Ok(resp) => Ok(ObjectInfo {
                    name: name.to_string(),
                    size: resp.content_length().unwrap_or(0).max(0) as u64,
                    last_modified: to_chrono(resp.last_modified()),
                }),
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        Err(StorageError::no_such_key(bucket, name))
                    } else {
                        Err(Self::map_sdk_error("head_object", service_err))
                    }
                }
            }
        })
    }

    fn list_objects<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a, Vec<ObjectInfo>> {
        Box::pin(async move {
            let list_prefix = tenant_prefix(&self.prefix, bucket)?;
            debug!("AWS list_objects_v2: bucket={} prefix={}", self.bucket, list_prefix);

            let mut out = Vec::new();
            let mut continuation_token: Option<String> = None;

            loop {
                let mut req = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&list_prefix)
                    .delimiter("/");

                if let Some(ref token) = continuation_token {
                    req = req.continuation_token(token);
                }

                let resp = req
                    .send()
                    .await
                    .map_err(|e| Self::map_sdk_error("list_objects_v2", e))?;

                for obj in resp.contents() {
                    let Some(name) = obj.key().and_then(|k| k.strip_prefix(&list_prefix)) else {
                        continue;
                    };
                    if name.is_empty() {
                        continue;
                    }
                    out.push(ObjectInfo {
                        name: name.to_string(),
                        size: obj.size().unwrap_or(0).max(0) as u64,
                        last_modified: to_chrono(obj.last_modified()),
                    });
                }

                for common in resp.common_prefixes() {
                    if let Some(name) = common.prefix().and_then(|p| p.strip_prefix(&list_prefix)) {
                        out.push(ObjectInfo {
                            name: name.to_string(),
                            size: 0,
                            last_modified: Utc::now(),
                        });
                    }
                }

                if resp.is_truncated() == Some(true) {
                    continuation_token = resp.next_continuation_token().map(|s| s.to_string());
                } else {
                    break;
                }
            }

            out.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(out)
        })
    }

    fn delete_object<'a>(&'a self, bucket: &'a str, name: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let s3_key = object_key(&self.prefix, bucket, name)?;
            debug!("AWS delete_object: bucket={} key={}", self.bucket, s3_key);

            // S3 delete_object is idempotent -- no error for missing keys.
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("delete_object", e))?;

            Ok(())
        })
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_mapping() {
        assert_eq!(
            object_key("filegate/", "tenant-a", "report.pdf").unwrap(),
            "filegate/tenant-a/report.pdf"
        );
    }

    #[test]
    fn test_object_key_mapping_no_prefix() {
        assert_eq!(
            object_key("", "tenant-a", "report.pdf").unwrap(),
            "tenant-a/report.pdf"
        );
    }

    #[test]
    fn test_object_key_with_special_chars() {
        assert_eq!(
            object_key("data/", "t", "key with spaces.txt").unwrap(),
            "data/t/key with spaces.txt"
        );
    }

    #[test]
    fn test_tenant_prefix_ends_with_slash() {
        let prefix = tenant_prefix("data/", "t").unwrap();
        assert_eq!(prefix, "data/t/");
        assert!(object_key("data/", "t", "x").unwrap().starts_with(&prefix));
    }

    #[test]
    fn test_tenant_cannot_reach_nested_tenant() {
        // Tenant "a" asking for "b/secret" must stay inside "a/", and a
        // tenant key "a/b" is refused outright.
        assert!(object_key("", "a/b", "secret").is_err());
        assert!(tenant_prefix("", "a/b").is_err());
        assert_eq!(object_key("", "a", "b/secret").unwrap(), "a/b/secret");
    }

    #[test]
    fn test_invalid_tenant_keys_rejected() {
        for tenant in ["", ".", "..", "/", "a/", "../a"] {
            let err = object_key("data/", tenant, "x.txt").unwrap_err();
            assert!(!err.is_not_found(), "{tenant:?}");
            assert!(tenant_prefix("data/", tenant).is_err(), "{tenant:?}");
        }
        assert!(object_key("data/", "t", "").is_err());
    }

    #[test]
    fn test_missing_timestamp_falls_back_to_now() {
        let before = Utc::now();
        assert!(to_chrono(None) >= before);
        let ts = aws_sdk_s3::primitives::DateTime::from_secs(86_400);
        assert_eq!(to_chrono(Some(&ts)).timestamp(), 86_400);
    }
}
