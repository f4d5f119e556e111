//! Storage for issue-tracker access credentials.
//!
//! One live [`CredentialRecord`] per provider. A new `store_token` for the same
//! provider replaces the previous record; there is no history.
//!
//! # Backends
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │          dyn CredentialStorage                │
//! │  store / get / get_valid / clear / cleanup    │
//! └──────────────────────────────────────────────┘
//!        │                 │                  │
//!        ▼                 ▼                  ▼
//!  InMemory (DashMap)   Kv (REST, TTL)    Sqlite (encrypted)
//! ```
//!
//! Every backend hands out clones; callers never hold a reference into the
//! store. Reads tolerate corrupt stored data by treating it as absent and
//! deleting it.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

mod encryption;
mod kv;
mod memory;
mod sqlite;

pub use encryption::{decrypt, derive_key, encrypt, validate_key};
pub use kv::KvCredentialStorage;
pub use memory::InMemoryCredentialStorage;
pub use sqlite::SqliteCredentialStorage;

/// Provider used when a caller does not name one.
pub const DEFAULT_PROVIDER: &str = "linear";

/// One stored access credential.
///
/// Times are Unix epoch milliseconds. `created_at <= expires_at` holds for
/// every record produced by the token exchange.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    /// Opaque bearer token. Never log it.
    pub access_token: String,
    pub provider: String,
    pub expires_at: i64,
    pub created_at: i64,
}

impl CredentialRecord {
    /// True once `now >= expires_at`.
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        now_millis >= self.expires_at
    }
}

/// Counts reported by [`CredentialStorage::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
}

/// Keyed store for [`CredentialRecord`]s.
///
/// Implementations must make `store_token` atomic (no torn records) and must
/// perform the expiry-check-then-delete in `get_valid_token` as a single step
/// against the backing store.
#[async_trait]
pub trait CredentialStorage: Send + Sync {
    /// Upserts the record under its provider.
    async fn store_token(&self, record: &CredentialRecord) -> Result<()>;

    /// Returns the stored record even if it is logically expired.
    async fn get_token(&self, provider: &str) -> Result<Option<CredentialRecord>>;

    /// Returns the record only if it has not expired. Expired records are
    /// deleted as a side effect.
    async fn get_valid_token(&self, provider: &str) -> Result<Option<CredentialRecord>>;

    async fn has_valid_token(&self, provider: &str) -> Result<bool> {
        Ok(self.get_valid_token(provider).await?.is_some())
    }

    /// Deletes `provider`'s record only while it still holds `access_token`.
    /// Returns whether a record was removed. A newer credential stored
    /// under the same provider is left in place.
    async fn remove_token_if(&self, provider: &str, access_token: &str) -> Result<bool>;

    /// Deletes one provider's record, or every record this store owns when
    /// `provider` is `None`.
    async fn clear_tokens(&self, provider: Option<&str>) -> Result<()>;

    /// Removes expired (and corrupt) records, returning how many were removed.
    async fn cleanup_expired_tokens(&self) -> Result<usize>;

    /// Snapshot of every readable record, keyed by provider.
    async fn list_tokens(&self) -> Result<Vec<CredentialRecord>>;

    async fn stats(&self) -> Result<StorageStats>;

    /// Releases resources this store owns. Shared connections are left open.
    async fn close(&self) -> Result<()>;
}

/// Tallies valid and expired records.
pub(crate) fn tally(records: &[CredentialRecord], now_millis: i64) -> StorageStats {
    let expired = records.iter().filter(|r| r.is_expired_at(now_millis)).count();
    StorageStats {
        total: records.len(),
        valid: records.len() - expired,
        expired,
    }
}

/// Background task that periodically sweeps expired credentials.
///
/// Backends with native expiry rarely find anything; the sweep still catches
/// records whose logical expiry passed before the store evicted them.
pub async fn run_token_cleanup(storage: Arc<dyn CredentialStorage>, interval_seconds: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));

    loop {
        interval.tick().await;
        match storage.cleanup_expired_tokens().await {
            Ok(0) => tracing::debug!("Credential cleanup found nothing"),
            Ok(removed) => tracing::info!(removed, "Removed expired credentials"),
            Err(e) => tracing::warn!(error = %e, "Credential cleanup failed"),
        }
    }
}
