//! OAuth state management for CSRF protection.
//!
//! A state token binds an authorization request to its callback. Tokens are
//! single-use and expire after a fixed window (10 minutes by default). The
//! in-process store sweeps stale entries whenever a new token is created; the
//! KV-backed store relies on the store's native TTL.

use crate::clock::Clock;
use crate::kv::KvClient;
use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default validity window for a state token.
pub const DEFAULT_STATE_TTL_SECONDS: i64 = 600;

/// Bytes of entropy in a state token.
const STATE_BYTES: usize = 32;

const KV_STATE_PREFIX: &str = "oauth:state:";

/// Generates an unguessable URL-safe state token from the OS CSPRNG.
pub fn random_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Issues and redeems single-use state tokens.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Issues a fresh token and records its issuance time.
    async fn create(&self) -> Result<String>;

    /// Redeems a token. `true` exactly once per issued, unexpired token;
    /// unknown, reused and expired tokens give `false`.
    async fn consume(&self, state: &str) -> Result<bool>;
}

/// OAuth state entry (tracks issuance time for expiry)
#[derive(Clone, Copy, Debug)]
pub struct StateEntry {
    pub created_at: i64,
}

/// In-process state store.
pub struct MemoryStateStore {
    states: DashMap<String, StateEntry>,
    ttl_millis: i64,
    clock: Arc<dyn Clock>,
}

impl MemoryStateStore {
    pub fn new(ttl_seconds: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            states: DashMap::new(),
            ttl_millis: ttl_seconds * 1000,
            clock,
        }
    }

    /// Drops entries older than the TTL.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.states.len();
        self.states
            .retain(|_, entry| now - entry.created_at <= self.ttl_millis);
        before.saturating_sub(self.states.len())
    }

    /// Number of outstanding tokens.
    pub fn count(&self) -> usize {
        self.states.len()
    }

    pub fn contains(&self, state: &str) -> bool {
        self.states.contains_key(state)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn create(&self) -> Result<String> {
        let swept = self.sweep_expired();
        if swept > 0 {
            debug!(swept, "Discarded stale OAuth states");
        }

        let state = random_state();
        self.states.insert(
            state.clone(),
            StateEntry {
                created_at: self.clock.now_millis(),
            },
        );
        Ok(state)
    }

    async fn consume(&self, state: &str) -> Result<bool> {
        // Remove first: a concurrent second redemption finds nothing.
        let Some((_, entry)) = self.states.remove(state) else {
            return Ok(false);
        };

        let age = self.clock.now_millis() - entry.created_at;
        if age > self.ttl_millis {
            debug!(age_ms = age, "Rejected expired OAuth state");
            return Ok(false);
        }
        Ok(true)
    }
}

/// State store shared across server processes via the KV store.
pub struct KvStateStore {
    kv: KvClient,
    ttl_seconds: i64,
    clock: Arc<dyn Clock>,
}

impl KvStateStore {
    pub fn new(kv: KvClient, ttl_seconds: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            kv,
            ttl_seconds,
            clock,
        }
    }

    fn key(state: &str) -> String {
        format!("{}{}", KV_STATE_PREFIX, state)
    }
}

#[async_trait]
impl StateStore for KvStateStore {
    async fn create(&self) -> Result<String> {
        let state = random_state();
        let issued_at = self.clock.now_millis().to_string();
        self.kv
            .set_ex(&Self::key(&state), &issued_at, self.ttl_seconds.max(1))
            .await?;
        Ok(state)
    }

    async fn consume(&self, state: &str) -> Result<bool> {
        let Some(raw) = self.kv.get_del(&Self::key(state)).await? else {
            return Ok(false);
        };

        let Ok(created_at) = raw.parse::<i64>() else {
            warn!("Discarded unreadable OAuth state entry");
            return Ok(false);
        };
        Ok(self.clock.now_millis() - created_at <= self.ttl_seconds * 1000)
    }
}
