//! SQLite-backed credential store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::store::{CredentialFuture, CredentialStore, TenantCredential, DEFAULT_ACCESS_FLAGS};

/// Raw row as stored: timestamps are RFC 3339 text.
type CredentialRow = (String, String, String, String, Option<String>);

/// Credential store backed by a single SQLite database file.
pub struct SqliteCredentialStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("credential store mutex poisoned"))
    }

    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the tenant table if it does not already exist.
    /// Idempotent; runs on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tenant_keys (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_key     TEXT NOT NULL UNIQUE,
                email          TEXT NOT NULL DEFAULT '',
                access_flags   TEXT NOT NULL DEFAULT '010',
                created_at     TEXT NOT NULL,
                last_login_at  TEXT
            );
            ",
        )?;
        Ok(())
    }

    /// Provision the bootstrap tenant from config. Idempotent.
    pub fn seed_credential(&self, tenant_key: &str, email: &str) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO tenant_keys (tenant_key, email, access_flags, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![tenant_key, email, DEFAULT_ACCESS_FLAGS, format_timestamp(Utc::now())],
        )?;
        Ok(())
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(text: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(text)?.with_timezone(&Utc))
}

impl CredentialStore for SqliteCredentialStore {
    fn get_credential<'a>(
        &'a self,
        tenant_key: &'a str,
    ) -> CredentialFuture<'a, Option<TenantCredential>> {
        Box::pin(async move {
            let row: Option<CredentialRow> = {
                let conn = self.lock()?;
                conn.query_row(
                    "SELECT tenant_key, email, access_flags, created_at, last_login_at
                     FROM tenant_keys WHERE tenant_key = ?1",
                    params![tenant_key],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                )
                .optional()?
            };

            let Some((tenant_key, email, access_flags, created_at, last_login_at)) = row else {
                return Ok(None);
            };
            Ok(Some(TenantCredential {
                tenant_key,
                email,
                access_flags,
                created_at: parse_timestamp(&created_at)?,
                last_login_at: last_login_at.as_deref().map(parse_timestamp).transpose()?,
            }))
        })
    }

    fn update_last_login<'a>(
        &'a self,
        tenant_key: &'a str,
        at: DateTime<Utc>,
    ) -> CredentialFuture<'a, ()> {
        Box::pin(async move {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE tenant_keys SET last_login_at = ?1 WHERE tenant_key = ?2",
                params![format_timestamp(at), tenant_key],
            )?;
            Ok(())
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
