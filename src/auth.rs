//! Cache-aside tenant authorization.
//!
//! A tenant key is valid when the fast credential cache holds a live entry
//! for it, or, on a miss, when the source-of-truth store knows it.  Cache
//! population and last-login refreshes run as detached background tasks:
//! they never delay the caller and their failures are only logged.
//!
//! A cache miss never proves absence.  A source-of-truth outage is reported
//! as an error, so uncached tenants fail closed with a 5xx instead of being
//! silently accepted or rejected.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::credentials::store::{CredentialCache, CredentialStore};
use crate::errors::GatewayError;
use crate::metrics::MetricsRecorder;

/// Seconds per day, for converting the configured TTL.
const SECONDS_PER_DAY: u64 = 86_400;

/// Authorizes tenant keys against a credential cache backed by a durable store.
pub struct AuthCache {
    cache: Arc<dyn CredentialCache>,
    store: Arc<dyn CredentialStore>,
    /// Sliding expiry applied on every cache write.
    ttl: Duration,
    /// Detached refresh tasks.
    background: TaskTracker,
    /// Caps how many refresh tasks may run at once.
    permits: Arc<Semaphore>,
    metrics: MetricsRecorder,
}

impl AuthCache {
    pub fn new(
        cache: Arc<dyn CredentialCache>,
        store: Arc<dyn CredentialStore>,
        ttl_days: u64,
        max_background_tasks: usize,
        metrics: MetricsRecorder,
    ) -> Self {
        Self {
            cache,
            store,
            ttl: Duration::from_secs(ttl_days.saturating_mul(SECONDS_PER_DAY)),
            background: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(max_background_tasks)),
            metrics,
        }
    }

    /// Decide whether `tenant_key` may use the gateway.
    ///
    /// Returns `Ok(false)` only when the source of truth has no such key.
    pub async fn authorize(&self, tenant_key: &str) -> Result<bool, GatewayError> {
        if tenant_key.is_empty() {
            return Err(GatewayError::validation("Tenant key is required"));
        }

        let started = Instant::now();
        let cached = self.cache.exists(tenant_key).await;
        self.metrics
            .record_credential_query("cache", "exists", cached.is_ok(), started.elapsed());

        match cached {
            Ok(true) => {
                debug!(tenant = %tenant_key, "tenant key found in cache");
                self.refresh_last_login(tenant_key);
                return Ok(true);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(tenant = %tenant_key, error = %e, "credential cache probe failed, falling back to store");
            }
        }

        let started = Instant::now();
        let lookup = self.store.get_credential(tenant_key).await;
        self.metrics.record_credential_query(
            "source_of_truth",
            "get_credential",
            lookup.is_ok(),
            started.elapsed(),
        );

        let record = lookup.map_err(|e| {
            error!(tenant = %tenant_key, error = %e, "credential store lookup failed");
            GatewayError::Upstream(e.context("credential store unavailable"))
        })?;

        let Some(mut record) = record else {
            debug!(tenant = %tenant_key, "unknown tenant key");
            self.evict(tenant_key);
            return Ok(false);
        };

        let now = Utc::now();
        record.last_login_at = Some(now);

        let cache = Arc::clone(&self.cache);
        let store = Arc::clone(&self.store);
        let ttl = self.ttl;
        let key = tenant_key.to_string();
        self.spawn_background("cache_populate", async move {
            if let Err(e) = cache.put(record, ttl).await {
                warn!(tenant = %key, error = %e, "credential cache populate failed");
            }
            store.update_last_login(&key, now).await
        });

        Ok(true)
    }

    /// Drop any cached entry for a key the source of truth does not know.
    fn evict(&self, tenant_key: &str) {
        let cache = Arc::clone(&self.cache);
        let key = tenant_key.to_string();
        self.spawn_background("cache_evict", async move { cache.remove(&key).await });
    }

    /// Refresh `last_login_at` in both stores and slide the cache expiry.
    fn refresh_last_login(&self, tenant_key: &str) {
        let cache = Arc::clone(&self.cache);
        let store = Arc::clone(&self.store);
        let ttl = self.ttl;
        let key = tenant_key.to_string();
        self.spawn_background("last_login_refresh", async move {
            let now = Utc::now();
            if let Err(e) = cache.touch_last_login(&key, now, ttl).await {
                warn!(tenant = %key, error = %e, "credential cache touch failed");
            }
            store.update_last_login(&key, now).await
        });
    }

    fn spawn_background<F>(&self, task: &'static str, fut: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            warn!(task = task, "background task limit reached, skipping credential refresh");
            return;
        };
        self.background.spawn(async move {
            let _permit = permit;
            if let Err(e) = fut.await {
                warn!(task = task, error = %e, "background credential refresh failed");
            }
        });
    }

    /// Wait for every background task spawned so far.
    pub async fn flush(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    /// Stop accepting background work and wait up to `timeout` for the rest.
    ///
    /// Returns `false` if tasks were still running when the timeout expired.
    pub async fn shutdown_background(&self, timeout: Duration) -> bool {
        self.background.close();
        tokio::time::timeout(timeout, self.background.wait())
            .await
            .is_ok()
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::cache::MemoryCredentialCache;
    use crate::credentials::sqlite::SqliteCredentialStore;
    use crate::credentials::store::{CredentialFuture, TenantCredential};
    use chrono::DateTime;

    /// A source of truth that is always down.
    struct UnreachableStore;

    impl CredentialStore for UnreachableStore {
        fn get_credential<'a>(
            &'a self,
            _tenant_key: &'a str,
        ) -> CredentialFuture<'a, Option<TenantCredential>> {
            Box::pin(async { Err(anyhow::anyhow!("connection refused")) })
        }

        fn update_last_login<'a>(
            &'a self,
            _tenant_key: &'a str,
            _at: DateTime<Utc>,
        ) -> CredentialFuture<'a, ()> {
            Box::pin(async { Err(anyhow::anyhow!("connection refused")) })
        }
    }

    /// A cache whose writes always fail and which remembers evictions.
    #[derive(Default)]
    struct FlakyCache {
        removed: std::sync::Mutex<Vec<String>>,
    }

    impl CredentialCache for FlakyCache {
        fn exists<'a>(&'a self, _tenant_key: &'a str) -> CredentialFuture<'a, bool> {
            Box::pin(async { Ok(false) })
        }

        fn put(&self, _record: TenantCredential, _ttl: Duration) -> CredentialFuture<'_, ()> {
            Box::pin(async { Err(anyhow::anyhow!("cache is read-only")) })
        }

        fn touch_last_login<'a>(
            &'a self,
            _tenant_key: &'a str,
            _at: DateTime<Utc>,
            _ttl: Duration,
        ) -> CredentialFuture<'a, ()> {
            Box::pin(async { Err(anyhow::anyhow!("cache is read-only")) })
        }

        fn remove<'a>(&'a self, tenant_key: &'a str) -> CredentialFuture<'a, ()> {
            Box::pin(async move {
                self.removed.lock().unwrap().push(tenant_key.to_string());
                Ok(())
            })
        }
    }

    fn setup(
        store: Arc<dyn CredentialStore>,
        max_background_tasks: usize,
    ) -> (Arc<MemoryCredentialCache>, AuthCache) {
        let cache = Arc::new(MemoryCredentialCache::new());
        let auth = AuthCache::new(
            cache.clone(),
            store,
            14,
            max_background_tasks,
            MetricsRecorder::detached(),
        );
        (cache, auth)
    }

    fn seeded_store() -> Arc<SqliteCredentialStore> {
        let store = SqliteCredentialStore::new(":memory:").unwrap();
        store.seed_credential("acme", "ops@acme.test").unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_empty_key_is_validation_error() {
        let (_cache, auth) = setup(seeded_store(), 8);
        let err = auth.authorize("").await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_store_hit_populates_cache() {
        let (cache, auth) = setup(seeded_store(), 8);
        assert!(!cache.exists("acme").await.unwrap());

        assert!(auth.authorize("acme").await.unwrap());
        auth.flush().await;

        let cached = cache.record("acme").await.unwrap();
        assert_eq!(cached.email, "ops@acme.test");
        assert!(cached.last_login_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_key_is_rejected() {
        let (cache, auth) = setup(seeded_store(), 8);
        assert!(!auth.authorize("intruder").await.unwrap());
        auth.flush().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_acceptance_refreshes_store_last_login() {
        let store = seeded_store();
        let (_cache, auth) = setup(store.clone(), 8);

        assert!(auth.authorize("acme").await.unwrap());
        auth.flush().await;
        assert!(auth.authorize("acme").await.unwrap());
        auth.flush().await;

        let record = store.get_credential("acme").await.unwrap().unwrap();
        assert!(record.last_login_at.is_some());
    }

    #[tokio::test]
    async fn test_store_outage_is_an_error_for_uncached_tenant() {
        let (_cache, auth) = setup(Arc::new(UnreachableStore), 8);
        let err = auth.authorize("acme").await.unwrap_err();
        assert!(matches!(err, GatewayError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_store_outage_does_not_affect_cached_tenant() {
        let (cache, auth) = setup(Arc::new(UnreachableStore), 8);
        cache
            .put(TenantCredential::new("acme", ""), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(auth.authorize("acme").await.unwrap());
        // The failing last-login refresh is swallowed.
        auth.flush().await;
        assert!(cache.exists("acme").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_first_authorizations() {
        let (cache, auth) = setup(seeded_store(), 8);
        let (a, b) = tokio::join!(auth.authorize("acme"), auth.authorize("acme"));
        assert!(a.unwrap());
        assert!(b.unwrap());
        auth.flush().await;
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_saturated_background_pool_skips_refresh() {
        let (cache, auth) = setup(seeded_store(), 0);
        assert!(auth.authorize("acme").await.unwrap());
        auth.flush().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_shutdown_background_waits() {
        let (cache, auth) = setup(seeded_store(), 8);
        assert!(auth.authorize("acme").await.unwrap());
        assert!(auth.shutdown_background(Duration::from_secs(5)).await);
        assert!(cache.exists("acme").await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_records_login() {
        let store = seeded_store();
        let auth = AuthCache::new(
            Arc::new(FlakyCache::default()),
            store.clone(),
            14,
            8,
            MetricsRecorder::detached(),
        );

        assert!(auth.authorize("acme").await.unwrap());
        auth.flush().await;

        let record = store.get_credential("acme").await.unwrap().unwrap();
        assert!(record.last_login_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_key_evicts_cached_entry() {
        let cache = Arc::new(FlakyCache::default());
        let auth = AuthCache::new(
            cache.clone(),
            seeded_store(),
            14,
            8,
            MetricsRecorder::detached(),
        );

        assert!(!auth.authorize("revoked").await.unwrap());
        auth.flush().await;
        assert_eq!(*cache.removed.lock().unwrap(), vec!["revoked".to_string()]);
    }
}
