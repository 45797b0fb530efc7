//! In-process credential cache.
//!
//! Entries are keyed `tenant:<key>` and carry an absolute expiry.  Expired
//! entries read as absent and are pruned lazily on the next write.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::store::{CredentialCache, CredentialFuture, TenantCredential};

struct CachedCredential {
    record: TenantCredential,
    expires_at: Instant,
}

impl CachedCredential {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Credential cache held in process memory.
#[derive(Default)]
pub struct MemoryCredentialCache {
    entries: tokio::sync::RwLock<HashMap<String, CachedCredential>>,
}

impl MemoryCredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cache_key(tenant_key: &str) -> String {
        format!("tenant:{tenant_key}")
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Live cached record for `tenant_key`.
    #[cfg(test)]
    pub(crate) async fn record(&self, tenant_key: &str) -> Option<TenantCredential> {
        self.entries
            .read()
            .await
            .get(&Self::cache_key(tenant_key))
            .filter(|e| e.is_live(Instant::now()))
            .map(|e| e.record.clone())
    }
}

impl CredentialCache for MemoryCredentialCache {
    fn exists<'a>(&'a self, tenant_key: &'a str) -> CredentialFuture<'a, bool> {
        Box::pin(async move {
            let entries = self.entries.read().await;
            Ok(entries
                .get(&Self::cache_key(tenant_key))
                .is_some_and(|e| e.is_live(Instant::now())))
        })
    }

    fn put(&self, record: TenantCredential, ttl: Duration) -> CredentialFuture<'_, ()> {
        Box::pin(async move {
            let now = Instant::now();
            let mut entries = self.entries.write().await;
            entries.retain(|_, e| e.is_live(now));
            entries.insert(
                Self::cache_key(&record.tenant_key),
                CachedCredential {
                    record,
                    expires_at: now + ttl,
                },
            );
            Ok(())
        })
    }

    fn touch_last_login<'a>(
        &'a self,
        tenant_key: &'a str,
        at: DateTime<Utc>,
        ttl: Duration,
    ) -> CredentialFuture<'a, ()> {
        Box::pin(async move {
            let now = Instant::now();
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries
                .get_mut(&Self::cache_key(tenant_key))
                .filter(|e| e.is_live(now))
            {
                entry.record.last_login_at = Some(at);
                entry.expires_at = now + ttl;
            }
            Ok(())
        })
    }

    fn remove<'a>(&'a self, tenant_key: &'a str) -> CredentialFuture<'a, ()> {
        Box::pin(async move {
            self.entries
                .write()
                .await
                .remove(&Self::cache_key(tenant_key));
            Ok(())
        })
    }
}
