use super::StorageBackend;
use crate::credentials::validate_key;
use crate::oauth::ClientCredentials;
use anyhow::{bail, Result};

pub const LINEAR_CLIENT_ID: &str = "LINEAR_CLIENT_ID";
pub const LINEAR_CLIENT_SECRET: &str = "LINEAR_CLIENT_SECRET";
pub const SESSION_SECRET: &str = "SESSION_SECRET";
pub const ADMIN_USERNAME: &str = "ADMIN_USERNAME";
pub const ADMIN_PASSWORD: &str = "ADMIN_PASSWORD";
pub const KV_REST_API_URL: &str = "KV_REST_API_URL";
pub const KV_REST_API_TOKEN: &str = "KV_REST_API_TOKEN";
pub const CREDENTIALS_ENCRYPTION_KEY: &str = "CREDENTIALS_ENCRYPTION_KEY";

/// Secrets read from the environment at startup.
///
/// Every required value must be present and non-empty; startup refuses to
/// continue otherwise.
#[derive(Clone)]
pub struct Secrets {
    pub client: ClientCredentials,
    pub session_secret: String,
    pub admin_username: String,
    pub admin_password: String,
    pub storage: StorageSecrets,
}

/// Backend-specific secrets.
#[derive(Clone)]
pub enum StorageSecrets {
    Memory,
    Kv { url: String, token: String },
    Sqlite { encryption_key: String },
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("client", &self.client)
            .field("admin_username", &self.admin_username)
            .finish_non_exhaustive()
    }
}

impl Secrets {
    pub fn from_env(backend: StorageBackend) -> Result<Self> {
        Self::from_lookup(backend, |name| std::env::var(name).ok())
    }

    /// Collects secrets through `lookup`, reporting every missing name at once.
    pub fn from_lookup<F>(backend: StorageBackend, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut require = |name: &'static str| -> String {
            match lookup(name).filter(|v| !v.trim().is_empty()) {
                Some(value) => value,
                None => {
                    missing.push(name);
                    String::new()
                }
            }
        };

        let client_id = require(LINEAR_CLIENT_ID);
        let client_secret = require(LINEAR_CLIENT_SECRET);
        let session_secret = require(SESSION_SECRET);
        let admin_username = require(ADMIN_USERNAME);
        let admin_password = require(ADMIN_PASSWORD);

        let storage = match backend {
            StorageBackend::Memory => StorageSecrets::Memory,
            StorageBackend::Kv => StorageSecrets::Kv {
                url: require(KV_REST_API_URL),
                token: require(KV_REST_API_TOKEN),
            },
            StorageBackend::Sqlite => StorageSecrets::Sqlite {
                encryption_key: require(CREDENTIALS_ENCRYPTION_KEY),
            },
        };

        if !missing.is_empty() {
            bail!(
                "Missing required environment variables: {}",
                missing.join(", ")
            );
        }

        if let StorageSecrets::Sqlite { encryption_key } = &storage {
            validate_key(encryption_key)?;
        }

        Ok(Self {
            client: ClientCredentials {
                client_id,
                client_secret,
            },
            session_secret,
            admin_username,
            admin_password,
            storage,
        })
    }
}
