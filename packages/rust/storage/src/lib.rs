//! libSQL-backed key/value storage for the blackboard.
//!
//! [`Storage`] is a thin namespaced key/value layer over a single libSQL table
//! (embedded file or remote `libsql://` database). [`BlackboardStore`] builds
//! the plan/result/context operations on top of it.
//!
//! **Guarantees relied on:**
//! - single-key writes are atomic (one row per key)
//! - key-prefix enumeration is available (primary-key range scan)

mod blackboard;
mod keys;
mod retry;
mod schema;

use std::path::Path;

use blackboard_shared::{BlackboardError, Result, StoreConfig, expand_home};
use chrono::Utc;
use libsql::{Connection, Database, params};
use tracing::{debug, info};

pub use blackboard::BlackboardStore;
pub use keys::{StoreKey, contexts_prefix, results_prefix};
pub use retry::RetryPolicy;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open whichever backend the config names: remote URL first, else local file.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        match &config.url {
            Some(url) => {
                let token = std::env::var(&config.auth_token_env).unwrap_or_default();
                Self::open_remote(url, token).await
            }
            None => Self::open(&expand_home(&config.path)?).await,
        }
    }

    /// Open or create a database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BlackboardError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(store_error)?;

        let conn = db.connect().map_err(store_error)?;

        let storage = Self { db, conn };
        storage.bootstrap().await?;
        info!(path = %path.display(), "opened local store");
        Ok(storage)
    }

    /// Connect to a remote libSQL server.
    pub async fn open_remote(url: &str, auth_token: String) -> Result<Self> {
        let db = libsql::Builder::new_remote(url.to_string(), auth_token)
            .build()
            .await
            .map_err(store_error)?;

        let conn = db.connect().map_err(store_error)?;

        let storage = Self { db, conn };
        storage.bootstrap().await?;
        info!(url, "connected to remote store");
        Ok(storage)
    }

    /// Create the key/value table if it does not exist yet.
    async fn bootstrap(&self) -> Result<()> {
        self.conn
            .execute_batch(schema::BOOTSTRAP_SQL)
            .await
            .map_err(|e| BlackboardError::Storage(format!("schema bootstrap failed: {e}")))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Key/value operations
    // -----------------------------------------------------------------------

    /// Read the raw value stored at `key`.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM kv WHERE key = ?1", params![key])
            .await
            .map_err(store_error)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get::<String>(0).map_err(store_error)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(store_error(e)),
        }
    }

    /// Insert or overwrite the value at `key`.
    pub async fn put(&self, key: &str, kind: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO kv (key, kind, value, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                   kind = excluded.kind,
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                params![key, kind, value, now.as_str()],
            )
            .await
            .map_err(store_error)?;
        Ok(())
    }

    /// Replace the value at `key` only if it still equals `expected`.
    ///
    /// Returns `false` when another writer got there first (or the key vanished).
    pub async fn compare_and_swap(&self, key: &str, expected: &str, value: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .execute(
                "UPDATE kv SET value = ?1, updated_at = ?2 WHERE key = ?3 AND value = ?4",
                params![value, now.as_str(), key, expected],
            )
            .await
            .map_err(store_error)?;
        Ok(changed == 1)
    }

    /// List `(key, value)` pairs whose key starts with `prefix`, in key order.
    pub async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let upper = prefix_upper_bound(prefix);
        let mut rows = match &upper {
            Some(upper) => self
                .conn
                .query(
                    "SELECT key, value FROM kv WHERE key >= ?1 AND key < ?2 ORDER BY key",
                    params![prefix, upper.as_str()],
                )
                .await,
            None => self
                .conn
                .query(
                    "SELECT key, value FROM kv WHERE key >= ?1 ORDER BY key",
                    params![prefix],
                )
                .await,
        }
        .map_err(store_error)?;

        let mut results = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    let key: String = row.get(0).map_err(store_error)?;
                    let value: String = row.get(1).map_err(store_error)?;
                    results.push((key, value));
                }
                Ok(None) => break,
                Err(e) => return Err(store_error(e)),
            }
        }
        debug!(prefix, count = results.len(), "prefix scan");
        Ok(results)
    }

    /// Release the connection.
    pub fn close(self) {
        drop(self.conn);
        debug!("store connection closed");
    }
}

/// Smallest string greater than every string starting with `prefix`.
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = char::from_u32(last as u32 + 1) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

/// Classify a libSQL error: contention and connectivity are transient.
pub(crate) fn store_error(e: libsql::Error) -> BlackboardError {
    const SQLITE_BUSY: i32 = 5;
    const SQLITE_LOCKED: i32 = 6;

    let transient = match &e {
        libsql::Error::SqliteFailure(code, _) => {
            let primary = *code & 0xff;
            primary == SQLITE_BUSY || primary == SQLITE_LOCKED
        }
        libsql::Error::ConnectionFailed(_) => true,
        other => {
            let msg = other.to_string().to_ascii_lowercase();
            msg.contains("database is locked")
                || msg.contains("connection")
                || msg.contains("timed out")
        }
    };

    if transient {
        BlackboardError::StoreUnavailable(e.to_string())
    } else {
        BlackboardError::Storage(e.to_string())
    }
}
