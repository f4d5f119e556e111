//! Durable single-host credential storage using SQLite.
//!
//! Access tokens are encrypted at rest with AES-256-GCM. SQLite has no native
//! expiry, so expired rows stay until a read evicts them or
//! `cleanup_expired_tokens` sweeps them.

use super::{encryption, tally, CredentialRecord, CredentialStorage, StorageStats};
use crate::clock::Clock;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info};

/// Encrypted credential storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE credentials (
///     provider     TEXT PRIMARY KEY,
///     access_token TEXT NOT NULL,     -- sealed (nonce || ciphertext)
///     expires_at   INTEGER NOT NULL,  -- epoch ms
///     created_at   INTEGER NOT NULL   -- epoch ms
/// );
/// ```
///
/// # Thread Safety
/// The connection sits behind a `Mutex`; no lock is held across an `.await`.
/// Each operation runs inside one critical section, so expiry-check-then-delete
/// is atomic.
pub struct SqliteCredentialStorage {
    conn: Mutex<Option<Connection>>,
    encryption_key: Vec<u8>,
    clock: Arc<dyn Clock>,
}

/// A row as stored, before decryption.
struct Row {
    provider: String,
    sealed_token: String,
    expires_at: i64,
    created_at: i64,
}

impl SqliteCredentialStorage {
    /// Creates or opens the store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`:memory:` for tests)
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn new<P: AsRef<Path>>(
        db_path: P,
        encryption_key: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let key_bytes =
            encryption::validate_key(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open database")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                provider     TEXT PRIMARY KEY,
                access_token TEXT NOT NULL,
                expires_at   INTEGER NOT NULL,
                created_at   INTEGER NOT NULL
            );
            "#,
        )
        .context("Failed to create credentials table")?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            encryption_key: key_bytes,
            clock,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Credential database lock poisoned"))
    }

    /// Runs `f` against the open connection.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.lock()?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| anyhow!("Credential store is closed"))?;
        f(conn)
    }

    fn decode(&self, row: Row) -> Option<CredentialRecord> {
        match encryption::decrypt(&row.sealed_token, &self.encryption_key) {
            Ok(access_token) => Some(CredentialRecord {
                access_token,
                provider: row.provider,
                expires_at: row.expires_at,
                created_at: row.created_at,
            }),
            Err(e) => {
                error!(provider = %row.provider, error = %e, "Failed to decrypt stored credential");
                None
            }
        }
    }

    fn select_row(conn: &Connection, provider: &str) -> Result<Option<Row>> {
        conn.query_row(
            "SELECT provider, access_token, expires_at, created_at
             FROM credentials WHERE provider = ?1",
            params![provider],
            |row| {
                Ok(Row {
                    provider: row.get(0)?,
                    sealed_token: row.get(1)?,
                    expires_at: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()
        .context("Failed to query credential")
    }

    fn select_all(conn: &Connection) -> Result<Vec<Row>> {
        let mut stmt = conn
            .prepare(
                "SELECT provider, access_token, expires_at, created_at
                 FROM credentials ORDER BY provider",
            )
            .context("Failed to prepare query")?;

        let rows = stmt
            .query_map([], |row| {
                Ok(Row {
                    provider: row.get(0)?,
                    sealed_token: row.get(1)?,
                    expires_at: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .context("Failed to execute query")?
            .collect::<Result<Vec<Row>, _>>()
            .context("Failed to read results")?;

        Ok(rows)
    }

    fn delete_row(conn: &Connection, provider: &str) -> Result<bool> {
        let affected = conn
            .execute("DELETE FROM credentials WHERE provider = ?1", params![provider])
            .context("Failed to delete credential")?;
        Ok(affected > 0)
    }

    /// Reads one provider, dropping the row if it cannot be decrypted.
    fn read_healing(&self, conn: &Connection, provider: &str) -> Result<Option<CredentialRecord>> {
        let Some(row) = Self::select_row(conn, provider)? else {
            return Ok(None);
        };
        match self.decode(row) {
            Some(record) => Ok(Some(record)),
            None => {
                Self::delete_row(conn, provider)?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl CredentialStorage for SqliteCredentialStorage {
    async fn store_token(&self, record: &CredentialRecord) -> Result<()> {
        let sealed = encryption::encrypt(&record.access_token, &self.encryption_key)
            .context("Failed to encrypt access token")?;

        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO credentials (provider, access_token, expires_at, created_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(provider) DO UPDATE SET
                    access_token = excluded.access_token,
                    expires_at = excluded.expires_at,
                    created_at = excluded.created_at
                "#,
                params![record.provider, sealed, record.expires_at, record.created_at],
            )
            .context("Failed to store credential")?;
            Ok(())
        })?;

        info!(
            provider = %record.provider,
            expires_at = record.expires_at,
            "Stored credential"
        );
        Ok(())
    }

    async fn get_token(&self, provider: &str) -> Result<Option<CredentialRecord>> {
        self.with_conn(|conn| self.read_healing(conn, provider))
    }

    async fn get_valid_token(&self, provider: &str) -> Result<Option<CredentialRecord>> {
        let now = self.clock.now_millis();
        self.with_conn(|conn| match self.read_healing(conn, provider)? {
            Some(record) if record.is_expired_at(now) => {
                Self::delete_row(conn, provider)?;
                info!(provider = %provider, "Evicted expired credential");
                Ok(None)
            }
            other => Ok(other),
        })
    }

    async fn remove_token_if(&self, provider: &str, access_token: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let matches = self
                .read_healing(conn, provider)?
                .is_some_and(|record| record.access_token == access_token);
            let removed = matches && Self::delete_row(conn, provider)?;
            if removed {
                info!(provider = %provider, "Removed credential");
            }
            Ok(removed)
        })
    }

    async fn clear_tokens(&self, provider: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            match provider {
                Some(provider) => {
                    Self::delete_row(conn, provider)?;
                    info!(provider = %provider, "Cleared credential");
                }
                None => {
                    let removed = conn
                        .execute("DELETE FROM credentials", [])
                        .context("Failed to clear credentials")?;
                    info!(removed, "Cleared all credentials");
                }
            }
            Ok(())
        })
    }

    async fn cleanup_expired_tokens(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        self.with_conn(|conn| {
            let mut removed = 0;
            for row in Self::select_all(conn)? {
                let provider = row.provider.clone();
                let stale = row.expires_at <= now || self.decode(row).is_none();
                if stale && Self::delete_row(conn, &provider)? {
                    removed += 1;
                }
            }
            if removed > 0 {
                info!(removed, "Cleaned up expired or corrupt credentials");
            }
            Ok(removed)
        })
    }

    async fn list_tokens(&self) -> Result<Vec<CredentialRecord>> {
        self.with_conn(|conn| {
            Ok(Self::select_all(conn)?
                .into_iter()
                .filter_map(|row| self.decode(row))
                .collect())
        })
    }

    async fn stats(&self) -> Result<StorageStats> {
        let records = self.list_tokens().await?;
        Ok(tally(&records, self.clock.now_millis()))
    }

    async fn close(&self) -> Result<()> {
        let conn = self.lock()?.take();
        if let Some(conn) = conn {
            conn.close()
                .map_err(|(_, e)| anyhow!("Failed to close credential database: {}", e))?;
            info!("Credential database closed");
        }
        Ok(())
    }
}
