//! Process-local credential storage.
//!
//! Backed by a `DashMap`, so operations on different providers lock different
//! shards and never wait on each other.

use super::{tally, CredentialRecord, CredentialStorage, StorageStats};
use crate::clock::Clock;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

pub struct InMemoryCredentialStorage {
    tokens: DashMap<String, CredentialRecord>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCredentialStorage {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tokens: DashMap::new(),
            clock,
        }
    }
}

#[async_trait]
impl CredentialStorage for InMemoryCredentialStorage {
    async fn store_token(&self, record: &CredentialRecord) -> Result<()> {
        self.tokens.insert(record.provider.clone(), record.clone());
        info!(
            provider = %record.provider,
            expires_at = record.expires_at,
            "Stored credential"
        );
        Ok(())
    }

    async fn get_token(&self, provider: &str) -> Result<Option<CredentialRecord>> {
        Ok(self.tokens.get(provider).map(|r| r.value().clone()))
    }

    async fn get_valid_token(&self, provider: &str) -> Result<Option<CredentialRecord>> {
        let now = self.clock.now_millis();

        // Entry holds the shard write lock for the check and the removal.
        match self.tokens.entry(provider.to_string()) {
            Entry::Occupied(entry) if entry.get().is_expired_at(now) => {
                entry.remove();
                info!(provider = %provider, "Evicted expired credential");
                Ok(None)
            }
            Entry::Occupied(entry) => Ok(Some(entry.get().clone())),
            Entry::Vacant(_) => Ok(None),
        }
    }

    async fn remove_token_if(&self, provider: &str, access_token: &str) -> Result<bool> {
        let removed = self
            .tokens
            .remove_if(provider, |_, record| record.access_token == access_token)
            .is_some();
        if removed {
            info!(provider = %provider, "Removed credential");
        }
        Ok(removed)
    }

    async fn clear_tokens(&self, provider: Option<&str>) -> Result<()> {
        match provider {
            Some(provider) => {
                self.tokens.remove(provider);
                info!(provider = %provider, "Cleared credential");
            }
            None => {
                self.tokens.clear();
                info!("Cleared all credentials");
            }
        }
        Ok(())
    }

    async fn cleanup_expired_tokens(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        let mut removed = 0;

        self.tokens.retain(|_, record| {
            let keep = !record.is_expired_at(now);
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            info!(removed, "Cleaned up expired credentials");
        }
        Ok(removed)
    }

    async fn list_tokens(&self) -> Result<Vec<CredentialRecord>> {
        let mut records: Vec<_> = self.tokens.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.provider.cmp(&b.provider));
        Ok(records)
    }

    async fn stats(&self) -> Result<StorageStats> {
        let records = self.list_tokens().await?;
        Ok(tally(&records, self.clock.now_millis()))
    }

    async fn close(&self) -> Result<()> {
        // The map is the only resource this store owns.
        self.tokens.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::credentials::DEFAULT_PROVIDER;

    const T: i64 = 1_700_000_000_000;
    const HOUR: i64 = 3_600_000;

    fn setup() -> (Arc<ManualClock>, InMemoryCredentialStorage) {
        let clock = Arc::new(ManualClock::new(T));
        let storage = InMemoryCredentialStorage::new(clock.clone());
        (clock, storage)
    }

    fn record(provider: &str, token: &str, expires_at: i64) -> CredentialRecord {
        CredentialRecord {
            access_token: token.to_string(),
            provider: provider.to_string(),
            expires_at,
            created_at: T,
        }
    }

    #[tokio::test]
    async fn test_store_then_get_round_trips() {
        let (_clock, storage) = setup();
        let stored = record("linear", "abc", T + HOUR);

        storage.store_token(&stored).await.unwrap();

        let fetched = storage.get_token("linear").await.unwrap().unwrap();
        assert_eq!(fetched, stored);
    }

    #[tokio::test]
    async fn test_valid_until_clock_passes_expiry() {
        let (clock, storage) = setup();
        storage
            .store_token(&record("linear", "abc", T + HOUR))
            .await
            .unwrap();

        assert!(storage.has_valid_token("linear").await.unwrap());

        clock.advance(HOUR);
        assert!(!storage.has_valid_token("linear").await.unwrap());
        // The expired record was evicted by the validity check.
        assert!(storage.get_token("linear").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_token_returns_expired_record() {
        let (clock, storage) = setup();
        storage
            .store_token(&record(DEFAULT_PROVIDER, "abc", T + 10))
            .await
            .unwrap();
        clock.advance(20);

        let fetched = storage.get_token(DEFAULT_PROVIDER).await.unwrap();
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn test_store_overwrites_same_provider() {
        let (_clock, storage) = setup();
        storage
            .store_token(&record("linear", "old", T + HOUR))
            .await
            .unwrap();
        storage
            .store_token(&record("linear", "new", T + 2 * HOUR))
            .await
            .unwrap();

        let fetched = storage.get_token("linear").await.unwrap().unwrap();
        assert_eq!(fetched.access_token, "new");
        assert_eq!(storage.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_clear_single_and_all() {
        let (_clock, storage) = setup();
        storage.store_token(&record("linear", "a", T + HOUR)).await.unwrap();
        storage.store_token(&record("github", "b", T + HOUR)).await.unwrap();

        storage.clear_tokens(Some("linear")).await.unwrap();
        assert!(storage.get_token("linear").await.unwrap().is_none());
        assert!(storage.get_token("github").await.unwrap().is_some());

        storage.clear_tokens(None).await.unwrap();
        assert!(storage.list_tokens().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_counts_only_expired() {
        let (clock, storage) = setup();
        storage.store_token(&record("a", "1", T + 10)).await.unwrap();
        storage.store_token(&record("b", "2", T + 20)).await.unwrap();
        storage.store_token(&record("c", "3", T + HOUR)).await.unwrap();

        clock.advance(20);
        assert_eq!(storage.cleanup_expired_tokens().await.unwrap(), 2);
        // Idempotent.
        assert_eq!(storage.cleanup_expired_tokens().await.unwrap(), 0);

        let remaining = storage.list_tokens().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].provider, "c");
    }

    #[tokio::test]
    async fn test_stats() {
        let (clock, storage) = setup();
        storage.store_token(&record("a", "1", T + 10)).await.unwrap();
        storage.store_token(&record("b", "2", T + HOUR)).await.unwrap();
        clock.advance(10);

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.valid, 1);
        assert_eq!(stats.expired, 1);
    }

    #[tokio::test]
    async fn test_concurrent_stores_last_write_wins_per_provider() {
        let (_clock, storage) = setup();
        let storage = Arc::new(storage);

        let mut handles = Vec::new();
        for i in 0..16 {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                let provider = if i % 2 == 0 { "even" } else { "odd" };
                storage
                    .store_token(&record(provider, &format!("tok-{}", i), T + HOUR))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let records = storage.list_tokens().await.unwrap();
        assert_eq!(records.len(), 2);
        for r in records {
            assert!(r.access_token.starts_with("tok-"));
        }
    }

    #[tokio::test]
    async fn test_remove_if_spares_replaced_token() {
        let (_clock, storage) = setup();
        storage
            .store_token(&record("linear", "new", T + HOUR))
            .await
            .unwrap();

        assert!(!storage.remove_token_if("linear", "old").await.unwrap());
        assert_eq!(
            storage.get_token("linear").await.unwrap().unwrap().access_token,
            "new"
        );

        assert!(storage.remove_token_if("linear", "new").await.unwrap());
        assert!(storage.get_token("linear").await.unwrap().is_none());
        assert!(!storage.remove_token_if("linear", "new").await.unwrap());
    }
}
