//! Credential store and cache contracts.
//!
//! Both traits use manually desugared async methods (pinned boxed futures)
//! so they can be held as `Arc<dyn ...>` and shared across requests.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed future returned by credential store and cache methods.
pub type CredentialFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Default access flags for a newly provisioned tenant.
pub const DEFAULT_ACCESS_FLAGS: &str = "010";

// ── Record types ───────────────────────────────────────────────────

/// One provisioned tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantCredential {
    /// Unique tenant key. Doubles as the tenant's storage partition name.
    pub tenant_key: String,
    /// Contact email.
    pub email: String,
    /// Opaque access flags.
    pub access_flags: String,
    /// When the tenant was provisioned.
    pub created_at: DateTime<Utc>,
    /// Last successful authorization, if any.
    pub last_login_at: Option<DateTime<Utc>>,
}

impl TenantCredential {
    /// A fresh credential with default flags and no login history.
    pub fn new(tenant_key: &str, email: &str) -> Self {
        Self {
            tenant_key: tenant_key.to_string(),
            email: email.to_string(),
            access_flags: DEFAULT_ACCESS_FLAGS.to_string(),
            created_at: Utc::now(),
            last_login_at: None,
        }
    }
}

// ── Traits ─────────────────────────────────────────────────────────

/// The durable source of truth for tenant credentials.
pub trait CredentialStore: Send + Sync + 'static {
    /// Look up a tenant by exact key.
    fn get_credential<'a>(&'a self, tenant_key: &'a str)
        -> CredentialFuture<'a, Option<TenantCredential>>;

    /// Record a successful authorization.
    fn update_last_login<'a>(
        &'a self,
        tenant_key: &'a str,
        at: DateTime<Utc>,
    ) -> CredentialFuture<'a, ()>;
}

/// Fast, expiring cache of tenant credentials.
///
/// A miss never proves a tenant does not exist.
pub trait CredentialCache: Send + Sync + 'static {
    /// Whether a live entry exists for `tenant_key`.
    fn exists<'a>(&'a self, tenant_key: &'a str) -> CredentialFuture<'a, bool>;

    /// Insert or replace an entry that expires after `ttl`.
    fn put(&self, record: TenantCredential, ttl: Duration) -> CredentialFuture<'_, ()>;

    /// Set `last_login_at` and slide the expiry. No-op when absent.
    fn touch_last_login<'a>(
        &'a self,
        tenant_key: &'a str,
        at: DateTime<Utc>,
        ttl: Duration,
    ) -> CredentialFuture<'a, ()>;

    /// Drop an entry.
    fn remove<'a>(&'a self, tenant_key: &'a str) -> CredentialFuture<'a, ()>;
}
