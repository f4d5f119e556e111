//! Credential storage in the shared external key-value store.
//!
//! Records live under `cred:token:<provider>` as JSON, with a native TTL so the
//! store drops them no later than their logical expiry. The [`KvClient`] is
//! shared with other components and is never closed here.

use super::{tally, CredentialRecord, CredentialStorage, StorageStats};
use crate::clock::Clock;
use crate::kv::KvClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Namespace for every key this store owns.
pub const KEY_PREFIX: &str = "cred:token:";

pub struct KvCredentialStorage {
    kv: KvClient,
    clock: Arc<dyn Clock>,
}

/// Outcome of reading one key.
enum Stored {
    Missing,
    Corrupt,
    Record(CredentialRecord, String),
}

impl KvCredentialStorage {
    pub fn new(kv: KvClient, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    fn key(provider: &str) -> String {
        format!("{}{}", KEY_PREFIX, provider)
    }

    /// TTL in whole seconds, never below one.
    fn ttl_seconds(expires_at: i64, now: i64) -> i64 {
        expires_at.saturating_sub(now).div_euclid(1000).max(1)
    }

    async fn read(&self, key: &str) -> Result<Stored> {
        let Some(raw) = self.kv.get(key).await? else {
            return Ok(Stored::Missing);
        };
        match serde_json::from_str::<CredentialRecord>(&raw) {
            Ok(record) => Ok(Stored::Record(record, raw)),
            Err(e) => {
                error!(key = %key, error = %e, "Failed to deserialize stored credential");
                Ok(Stored::Corrupt)
            }
        }
    }

    /// Reads a key, deleting it if its contents cannot be parsed.
    async fn read_healing(&self, key: &str) -> Result<Option<(CredentialRecord, String)>> {
        match self.read(key).await? {
            Stored::Missing => Ok(None),
            Stored::Corrupt => {
                self.kv.del(&[key.to_string()]).await?;
                Ok(None)
            }
            Stored::Record(record, raw) => Ok(Some((record, raw))),
        }
    }
}

#[async_trait]
impl CredentialStorage for KvCredentialStorage {
    async fn store_token(&self, record: &CredentialRecord) -> Result<()> {
        let key = Self::key(&record.provider);
        let value = serde_json::to_string(record).context("Failed to serialize credential")?;
        let ttl = Self::ttl_seconds(record.expires_at, self.clock.now_millis());

        self.kv
            .set_ex(&key, &value, ttl)
            .await
            .context("Failed to store credential")?;

        info!(
            provider = %record.provider,
            key = %key,
            ttl_seconds = ttl,
            "Stored credential"
        );
        Ok(())
    }

    async fn get_token(&self, provider: &str) -> Result<Option<CredentialRecord>> {
        let record = self.read_healing(&Self::key(provider)).await?;
        Ok(record.map(|(record, _)| record))
    }

    async fn get_valid_token(&self, provider: &str) -> Result<Option<CredentialRecord>> {
        let key = Self::key(provider);
        let Some((record, raw)) = self.read_healing(&key).await? else {
            return Ok(None);
        };

        if record.is_expired_at(self.clock.now_millis()) {
            // Only removes the exact value we judged expired.
            if self.kv.compare_and_delete(&key, &raw).await? {
                info!(provider = %provider, "Evicted expired credential");
            }
            return Ok(None);
        }

        Ok(Some(record))
    }

    async fn remove_token_if(&self, provider: &str, access_token: &str) -> Result<bool> {
        let key = Self::key(provider);
        let Some((record, raw)) = self.read_healing(&key).await? else {
            return Ok(false);
        };
        if record.access_token != access_token {
            return Ok(false);
        }

        let removed = self.kv.compare_and_delete(&key, &raw).await?;
        if removed {
            info!(provider = %provider, "Removed credential");
        }
        Ok(removed)
    }

    async fn clear_tokens(&self, provider: Option<&str>) -> Result<()> {
        match provider {
            Some(provider) => {
                self.kv.del(&[Self::key(provider)]).await?;
                info!(provider = %provider, "Cleared credential");
            }
            None => {
                let keys = self.kv.scan_prefix(KEY_PREFIX).await?;
                let removed = self.kv.del(&keys).await?;
                info!(removed, "Cleared all credentials");
            }
        }
        Ok(())
    }

    async fn cleanup_expired_tokens(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        let mut removed = 0;

        for key in self.kv.scan_prefix(KEY_PREFIX).await? {
            match self.read(&key).await? {
                // Evicted by TTL between SCAN and GET.
                Stored::Missing => {}
                Stored::Corrupt => {
                    if self.kv.del(&[key]).await? > 0 {
                        removed += 1;
                    }
                }
                Stored::Record(record, raw) if record.is_expired_at(now) => {
                    if self.kv.compare_and_delete(&key, &raw).await? {
                        removed += 1;
                    }
                }
                Stored::Record(..) => {}
            }
        }

        if removed > 0 {
            info!(removed, "Cleaned up expired or corrupt credentials");
        }
        Ok(removed)
    }

    async fn list_tokens(&self) -> Result<Vec<CredentialRecord>> {
        let mut records = Vec::new();
        for key in self.kv.scan_prefix(KEY_PREFIX).await? {
            match self.read(&key).await? {
                Stored::Record(record, _) => records.push(record),
                Stored::Corrupt => warn!(key = %key, "Skipping corrupt credential"),
                Stored::Missing => {}
            }
        }
        records.sort_by(|a, b| a.provider.cmp(&b.provider));
        Ok(records)
    }

    async fn stats(&self) -> Result<StorageStats> {
        let records = self.list_tokens().await?;
        Ok(tally(&records, self.clock.now_millis()))
    }

    async fn close(&self) -> Result<()> {
        // The KV client belongs to the process, not to this store.
        info!("Credential storage closed (shared KV connection left open)");
        Ok(())
    }
}
