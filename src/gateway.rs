//! Per-tenant file operations over the object store.
//!
//! The tenant key is the storage partition: every call takes it as the
//! bucket name and there is no way to address another tenant's files.
//!
//! Uploads are multipart streams.  Each file part is staged to a temp file
//! first so the store receives an exact length, then handed over as a
//! bounded reader.  Parts are processed one at a time and a failing part
//! never aborts the batch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::Multipart;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::errors::GatewayError;
use crate::metrics::MetricsRecorder;
use crate::models::FileEntry;
use crate::storage::backend::{ObjectReader, ObjectStore, StorageError};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Outcome of one multipart upload request.
#[derive(Debug, Default)]
pub struct UploadReport {
    /// Names stored, in request order.
    pub uploaded: Vec<String>,
    /// One message per failed part.
    pub errors: Vec<String>,
    /// The tenant's listing after the upload, empty if it could not be read.
    pub files: Vec<FileEntry>,
}

impl UploadReport {
    pub fn summary(&self) -> String {
        if self.errors.is_empty() {
            format!("{} uploaded", self.uploaded.len())
        } else {
            format!(
                "{} uploaded, {} error(s)",
                self.uploaded.len(),
                self.errors.len()
            )
        }
    }
}

/// Why staging a part failed.
enum StageError {
    /// The request body itself is broken; the whole upload aborts.
    Body(MultipartError),
    /// Only this part is lost.
    Part(String),
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        StageError::Part(format!("staging failed: {err}"))
    }
}

/// Streams tenant files to and from the object store.
pub struct ObjectGateway {
    store: Arc<dyn ObjectStore>,
    metrics: MetricsRecorder,
    /// Where upload parts are staged.
    staging_dir: PathBuf,
    /// Per-file byte limit; 0 disables it.
    max_file_size: u64,
}

impl ObjectGateway {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        metrics: MetricsRecorder,
        staging_dir: PathBuf,
        max_file_size: u64,
    ) -> Self {
        Self {
            store,
            metrics,
            staging_dir,
            max_file_size,
        }
    }

    fn store_failure(&self, operation: &'static str, tenant: &str, name: &str, err: &StorageError) {
        self.metrics.record_store_error(operation, tenant, err.kind());
        error!(operation = operation, tenant = %tenant, name = %name, error = %err, "object store call failed");
    }

    // ── Upload ─────────────────────────────────────────────────────

    /// Store every file part of `multipart` under `tenant`.
    ///
    /// Only a broken request body fails the whole call.
    pub async fn upload(
        &self,
        tenant: &str,
        mut multipart: Multipart,
    ) -> Result<UploadReport, GatewayError> {
        let mut report = UploadReport::default();

        loop {
            let field = multipart.next_field().await.map_err(malformed)?;
            let Some(mut field) = field else {
                break;
            };
            let Some(raw_name) = field.file_name().map(str::to_string) else {
                debug!(tenant = %tenant, field = ?field.name(), "skipping non-file form field");
                continue;
            };

            let name = sanitize_file_name(&raw_name);
            if name.is_empty() {
                report
                    .errors
                    .push(format!("{raw_name}: invalid file name"));
                continue;
            }
            let content_type = field
                .content_type()
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string();

            match self.upload_part(tenant, &name, &content_type, &mut field).await {
                Ok(size) => {
                    info!(tenant = %tenant, name = %name, size = size, "file uploaded");
                    report.uploaded.push(name);
                }
                Err(StageError::Body(err)) => return Err(malformed(err)),
                Err(StageError::Part(reason)) => {
                    warn!(tenant = %tenant, name = %name, reason = %reason, "upload part failed");
                    report.errors.push(format!("{name}: {reason}"));
                }
            }
        }

        report.files = match self.list(tenant).await {
            Ok(files) => files,
            Err(err) => {
                warn!(tenant = %tenant, error = %err, "post-upload listing failed");
                Vec::new()
            }
        };
        Ok(report)
    }

    /// Stage one part to disk and hand it to the store. Returns the size.
    async fn upload_part(
        &self,
        tenant: &str,
        name: &str,
        content_type: &str,
        field: &mut Field<'_>,
    ) -> Result<u64, StageError> {
        let started = Instant::now();
        let staged = tempfile::Builder::new()
            .prefix(".filegate-upload-")
            .tempfile_in(&self.staging_dir)?;

        let size = {
            let mut out = tokio::fs::File::from_std(staged.reopen()?);
            let mut size: u64 = 0;
            while let Some(chunk) = field.chunk().await.map_err(StageError::Body)? {
                size += chunk.len() as u64;
                if self.max_file_size > 0 && size > self.max_file_size {
                    return Err(StageError::Part(format!(
                        "file exceeds the {} byte limit",
                        self.max_file_size
                    )));
                }
                out.write_all(&chunk).await?;
            }
            out.flush().await?;
            size
        };

        let reader = tokio::fs::File::from_std(staged.reopen()?);
        let stored: Result<(), StorageError> = async move {
            self.store.ensure_bucket(tenant).await?;
            self.store
                .put_object(tenant, name, reader, size, content_type)
                .await
        }
        .await;

        if let Err(err) = stored {
            self.store_failure("upload", tenant, name, &err);
            return Err(StageError::Part(format!("store rejected file: {err}")));
        }
        self.metrics.record_upload(tenant, size, started.elapsed());

        if let Err(err) = staged.close() {
            warn!(tenant = %tenant, name = %name, error = %err, "failed to remove staged upload");
        }
        Ok(size)
    }

    // ── Download ───────────────────────────────────────────────────

    /// Open `name` for streaming.  Nothing is sent before this succeeds.
    pub async fn download(&self, tenant: &str, name: &str) -> Result<ObjectReader, GatewayError> {
        match self.store.get_object(tenant, name).await {
            Ok(reader) => {
                self.metrics.record_download(tenant);
                debug!(tenant = %tenant, name = %name, size = reader.size, "download opened");
                Ok(reader)
            }
            Err(err) => {
                self.store_failure("download", tenant, name, &err);
                Err(GatewayError::DownloadFailed {
                    name: name.to_string(),
                })
            }
        }
    }

    // ── List ───────────────────────────────────────────────────────

    /// One level of the tenant's files. Any store error fails the call.
    pub async fn list(&self, tenant: &str) -> Result<Vec<FileEntry>, GatewayError> {
        let objects = self.store.list_objects(tenant).await.map_err(|err| {
            self.store_failure("list", tenant, "", &err);
            GatewayError::Upstream(anyhow::Error::new(err).context("listing failed"))
        })?;
        self.metrics.record_listing(tenant, objects.len());
        Ok(objects.iter().map(FileEntry::from).collect())
    }

    // ── Delete ─────────────────────────────────────────────────────

    /// Remove `name`, then return the tenant's remaining files.
    ///
    /// Absence and delete failures are both reported as not found.
    pub async fn delete(&self, tenant: &str, name: &str) -> Result<Vec<FileEntry>, GatewayError> {
        let not_found = || GatewayError::NotFound {
            name: name.to_string(),
        };

        if let Err(err) = self.store.stat_object(tenant, name).await {
            if err.is_not_found() {
                self.metrics.record_store_error("delete", tenant, err.kind());
                debug!(tenant = %tenant, name = %name, "delete of missing file");
                return Err(not_found());
            }
            self.store_failure("delete", tenant, name, &err);
            return Err(GatewayError::Upstream(anyhow::Error::new(err)));
        }

        if let Err(err) = self.store.delete_object(tenant, name).await {
            self.store_failure("delete", tenant, name, &err);
            return Err(not_found());
        }
        self.metrics.record_delete(tenant);
        info!(tenant = %tenant, name = %name, "file deleted");

        Ok(self.list(tenant).await.unwrap_or_else(|err| {
            warn!(tenant = %tenant, error = %err, "post-delete listing failed");
            Vec::new()
        }))
    }
}

fn malformed(err: MultipartError) -> GatewayError {
    GatewayError::MalformedBody {
        message: err.body_text(),
    }
}

/// Reduce a client-supplied file name to its final path segment.
pub fn sanitize_file_name(raw: &str) -> String {
    let last = raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default().trim();
    match last {
        "." | ".." => String::new(),
        other => other.to_string(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::STORE_ERRORS_TOTAL;
    use crate::storage::backend::{ObjectInfo, StoreFuture};
    use crate::storage::memory::MemoryBackend;
    use axum::body::Body;
    use axum::extract::FromRequest;
    use bytes::Bytes;
    use futures::TryStreamExt;

    const BOUNDARY: &str = "XfilegateBoundaryX";

    fn gateway(max_file_size: u64) -> (tempfile::TempDir, ObjectGateway) {
        let staging = tempfile::tempdir().unwrap();
        let gw = ObjectGateway::new(
            Arc::new(MemoryBackend::new()),
            MetricsRecorder::detached(),
            staging.path().to_path_buf(),
            max_file_size,
        );
        (staging, gw)
    }

    /// In-memory store that fails the selected operations.
    #[derive(Default)]
    struct FailingStore {
        inner: MemoryBackend,
        fail_put_of: Option<&'static str>,
        fail_list: bool,
        fail_stat: bool,
        fail_delete: bool,
    }

    fn injected(operation: &str) -> StorageError {
        StorageError::Other(anyhow::anyhow!("injected {operation} failure"))
    }

    impl ObjectStore for FailingStore {
        fn ensure_bucket<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a, ()> {
            self.inner.ensure_bucket(bucket)
        }

        fn put_object<'a>(
            &'a self,
            bucket: &'a str,
            name: &'a str,
            file: tokio::fs::File,
            size: u64,
            content_type: &'a str,
        ) -> StoreFuture<'a, ()> {
            if self.fail_put_of == Some(name) {
                return Box::pin(async { Err(injected("put")) });
            }
            self.inner.put_object(bucket, name, file, size, content_type)
        }

        fn get_object<'a>(&'a self, bucket: &'a str, name: &'a str) -> StoreFuture<'a, ObjectReader> {
            self.inner.get_object(bucket, name)
        }

        fn stat_object<'a>(&'a self, bucket: &'a str, name: &'a str) -> StoreFuture<'a, ObjectInfo> {
            if self.fail_stat {
                return Box::pin(async { Err(injected("stat")) });
            }
            self.inner.stat_object(bucket, name)
        }

        fn list_objects<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a, Vec<ObjectInfo>> {
            if self.fail_list {
                return Box::pin(async { Err(injected("list")) });
            }
            self.inner.list_objects(bucket)
        }

        fn delete_object<'a>(&'a self, bucket: &'a str, name: &'a str) -> StoreFuture<'a, ()> {
            if self.fail_delete {
                return Box::pin(async { Err(injected("delete")) });
            }
            self.inner.delete_object(bucket, name)
        }
    }

    fn gateway_over(
        store: FailingStore,
        metrics: MetricsRecorder,
    ) -> (tempfile::TempDir, ObjectGateway) {
        let staging = tempfile::tempdir().unwrap();
        let gw = ObjectGateway::new(Arc::new(store), metrics, staging.path().to_path_buf(), 0);
        (staging, gw)
    }

    /// Current value of the store error counter for one label set.
    fn store_errors(metrics: &MetricsRecorder, operation: &str, tenant: &str, kind: &str) -> Option<String> {
        let text = metrics.render().unwrap();
        let operation = format!("operation=\"{operation}\"");
        let tenant = format!("tenant=\"{tenant}\"");
        let kind = format!("error=\"{kind}\"");
        text.lines()
            .find(|l| {
                l.starts_with(STORE_ERRORS_TOTAL)
                    && l.contains(&operation)
                    && l.contains(&tenant)
                    && l.contains(&kind)
            })
            .and_then(|l| l.rsplit(' ').next())
            .map(str::to_string)
    }

    /// Build a multipart body from `(file name, content)` pairs.
    fn multipart_body(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, content) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    async fn multipart(body: Vec<u8>) -> Multipart {
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/files")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        Multipart::from_request(req, &()).await.unwrap()
    }

    async fn upload(gw: &ObjectGateway, tenant: &str, files: &[(&str, &[u8])]) -> UploadReport {
        gw.upload(tenant, multipart(multipart_body(files)).await)
            .await
            .unwrap()
    }

    async fn read_all(reader: ObjectReader) -> Vec<u8> {
        let chunks: Vec<Bytes> = reader.body.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn test_upload_then_download_roundtrip() {
        let (_staging, gw) = gateway(0);
        let report = upload(&gw, "acme", &[("a.txt", b"hello gateway")]).await;
        assert_eq!(report.uploaded, vec!["a.txt"]);
        assert!(report.errors.is_empty());
        assert_eq!(report.files.len(), 1);

        let reader = gw.download("acme", "a.txt").await.unwrap();
        assert_eq!(reader.size, 13);
        assert_eq!(read_all(reader).await, b"hello gateway");
    }

    #[tokio::test]
    async fn test_partial_batch_failure() {
        let (_staging, gw) = gateway(8);
        let report = upload(
            &gw,
            "acme",
            &[
                ("one.txt", b"small"),
                ("two.txt", b"this part is far too large"),
                ("three.txt", b"tiny"),
            ],
        )
        .await;

        assert_eq!(report.uploaded, vec!["one.txt", "three.txt"]);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("two.txt"));
        let summary = report.summary();
        assert!(summary.contains("2 uploaded"));
        assert!(summary.contains("1 error"));
        assert!(gw.download("acme", "two.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_staging_files_are_removed() {
        let (staging, gw) = gateway(8);
        upload(&gw, "acme", &[("ok.txt", b"ok"), ("big.txt", b"0123456789abcdef")]).await;
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_upload_strips_client_paths() {
        let (_staging, gw) = gateway(0);
        let report = upload(&gw, "acme", &[("docs/2026/notes.md", b"# hi")]).await;
        assert_eq!(report.uploaded, vec!["notes.md"]);
    }

    #[tokio::test]
    async fn test_upload_skips_non_file_fields() {
        let (_staging, gw) = gateway(0);
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"comment\"\r\n\r\nhello\r\n"
        )
        .into_bytes();
        body.extend(multipart_body(&[("a.txt", b"x")]));
        let report = gw.upload("acme", multipart(body).await).await.unwrap();
        assert_eq!(report.uploaded, vec!["a.txt"]);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_body_is_malformed() {
        let (_staging, gw) = gateway(0);
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"a.txt\"\r\n\r\nno closing boundary"
        )
        .into_bytes();
        let err = gw.upload("acme", multipart(body).await).await.unwrap_err();
        assert!(matches!(err, GatewayError::MalformedBody { .. }));
    }

    #[tokio::test]
    async fn test_download_missing_is_download_failed() {
        let (_staging, gw) = gateway(0);
        let err = gw.download("acme", "nope.txt").await.err().unwrap();
        assert!(matches!(err, GatewayError::DownloadFailed { .. }));
    }

    #[tokio::test]
    async fn test_list_is_idempotent() {
        let (_staging, gw) = gateway(0);
        upload(&gw, "acme", &[("a.txt", b"1"), ("Makefile", b"all:")]).await;

        let first = gw.list("acme").await.unwrap();
        let second = gw.list("acme").await.unwrap();
        assert_eq!(first, second);
        let makefile = first.iter().find(|f| f.file_name == "Makefile").unwrap();
        assert_eq!(makefile.file_type, "Makefile");
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let (_staging, gw) = gateway(0);
        upload(&gw, "acme", &[("secret.txt", b"acme only")]).await;
        assert!(gw.list("globex").await.unwrap().is_empty());
        assert!(gw.download("globex", "secret.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let (_staging, gw) = gateway(0);
        let err = gw.delete("acme", "missing.txt").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_present_then_list() {
        let (_staging, gw) = gateway(0);
        upload(&gw, "acme", &[("present.txt", b"p"), ("keep.txt", b"k")]).await;

        let remaining = gw.delete("acme", "present.txt").await.unwrap();
        let names: Vec<_> = remaining.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["keep.txt"]);
        assert!(gw
            .list("acme")
            .await
            .unwrap()
            .iter()
            .all(|f| f.file_name != "present.txt"));
    }

    #[tokio::test]
    async fn test_put_failure_mid_batch_continues() {
        let metrics = MetricsRecorder::install().unwrap();
        let store = FailingStore {
            fail_put_of: Some("two.txt"),
            ..Default::default()
        };
        let (staging, gw) = gateway_over(store, metrics.clone());

        let report = upload(
            &gw,
            "put-failure-tenant",
            &[("one.txt", b"1"), ("two.txt", b"2"), ("three.txt", b"3")],
        )
        .await;

        assert_eq!(report.uploaded, vec!["one.txt", "three.txt"]);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("two.txt"));
        assert_eq!(report.files.len(), 2);
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
        assert_eq!(
            store_errors(&metrics, "upload", "put-failure-tenant", "upstream").as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn test_relist_failure_leaves_upload_listing_empty() {
        let metrics = MetricsRecorder::install().unwrap();
        let store = FailingStore {
            fail_list: true,
            ..Default::default()
        };
        let (_staging, gw) = gateway_over(store, metrics.clone());

        let report = upload(&gw, "relist-failure-tenant", &[("a.txt", b"a")]).await;
        assert_eq!(report.uploaded, vec!["a.txt"]);
        assert!(report.errors.is_empty());
        assert!(report.files.is_empty());
        assert_eq!(
            store_errors(&metrics, "list", "relist-failure-tenant", "upstream").as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn test_list_failure_fails_the_call() {
        let store = FailingStore {
            fail_list: true,
            ..Default::default()
        };
        let (_staging, gw) = gateway_over(store, MetricsRecorder::detached());
        let err = gw.list("acme").await.unwrap_err();
        assert!(matches!(err, GatewayError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_failed_delete_is_not_found() {
        let metrics = MetricsRecorder::install().unwrap();
        let store = FailingStore {
            fail_delete: true,
            ..Default::default()
        };
        let (_staging, gw) = gateway_over(store, metrics.clone());
        upload(&gw, "delete-failure-tenant", &[("keep.txt", b"k")]).await;

        let err = gw.delete("delete-failure-tenant", "keep.txt").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound { .. }));
        assert_eq!(gw.list("delete-failure-tenant").await.unwrap().len(), 1);
        assert_eq!(
            store_errors(&metrics, "delete", "delete-failure-tenant", "upstream").as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn test_stat_failure_on_delete_is_upstream() {
        let store = FailingStore {
            fail_stat: true,
            ..Default::default()
        };
        let (_staging, gw) = gateway_over(store, MetricsRecorder::detached());
        let err = gw.delete("acme", "anything.txt").await.unwrap_err();
        assert!(matches!(err, GatewayError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_missing_file_errors_use_fixed_labels() {
        let metrics = MetricsRecorder::install().unwrap();
        let (_staging, gw) = gateway_over(FailingStore::default(), metrics.clone());

        gw.delete("label-tenant", "private-plan.txt").await.unwrap_err();
        gw.download("label-tenant", "private-plan.txt").await.err().unwrap();

        assert_eq!(
            store_errors(&metrics, "delete", "label-tenant", "not_found").as_deref(),
            Some("1")
        );
        assert_eq!(
            store_errors(&metrics, "download", "label-tenant", "not_found").as_deref(),
            Some("1")
        );
        assert!(!metrics.render().unwrap().contains("private-plan"));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("a.txt"), "a.txt");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("dir/"), "");
        assert_eq!(sanitize_file_name(".."), "");
    }
}
