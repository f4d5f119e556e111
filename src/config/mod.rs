pub mod secrets;
pub use secrets::{Secrets, StorageSecrets};

use crate::linear::LINEAR_API_URL;
use crate::oauth::{
    OAuthProviderConfig, DEFAULT_STATE_TTL_SECONDS, LINEAR_AUTHORIZE_URL, LINEAR_REVOKE_URL,
    LINEAR_TOKEN_URL,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Environment variable naming the TOML config file.
pub const CONFIG_PATH_ENV: &str = "VOLUNTEER_BOARD_CONFIG";

/// Used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "volunteer-board.toml";

/// Complete non-secret configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub linear: LinearConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Externally visible origin; the OAuth callback is derived from it.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Adds `Secure` to the admin session cookie.
    #[serde(default)]
    pub secure_cookies: bool,
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            public_base_url: default_public_base_url(),
            secure_cookies: false,
        }
    }
}

impl ServerConfig {
    pub fn callback_url(&self) -> String {
        format!("{}/auth/callback", self.public_base_url.trim_end_matches('/'))
    }
}

/// Which credential storage backend to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Kv,
    Sqlite,
}

/// Credential storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    /// How often expired credentials are swept (seconds)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

fn default_sqlite_path() -> String {
    "credentials.db".to_string()
}

fn default_cleanup_interval() -> u64 {
    300
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            sqlite_path: default_sqlite_path(),
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

/// OAuth handshake configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// How long an issued state token stays redeemable (seconds)
    #[serde(default = "default_state_ttl")]
    pub state_ttl_seconds: i64,
}

fn default_state_ttl() -> i64 {
    DEFAULT_STATE_TTL_SECONDS
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_ttl_seconds: default_state_ttl(),
        }
    }
}

/// Linear endpoints and outbound HTTP settings
#[derive(Debug, Clone, Deserialize)]
pub struct LinearConfig {
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_revoke_url")]
    pub revoke_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
}

fn default_authorize_url() -> String {
    LINEAR_AUTHORIZE_URL.to_string()
}

fn default_token_url() -> String {
    LINEAR_TOKEN_URL.to_string()
}

fn default_revoke_url() -> String {
    LINEAR_REVOKE_URL.to_string()
}

fn default_api_url() -> String {
    LINEAR_API_URL.to_string()
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            revoke_url: default_revoke_url(),
            api_url: default_api_url(),
            http_timeout_seconds: default_http_timeout(),
        }
    }
}

impl LinearConfig {
    pub fn provider_config(&self) -> OAuthProviderConfig {
        OAuthProviderConfig {
            auth_url: self.authorize_url.clone(),
            token_url: self.token_url.clone(),
            revoke_url: self.revoke_url.clone(),
            ..OAuthProviderConfig::default()
        }
    }
}

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Loads the file if it exists, otherwise returns defaults.
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    if path.as_ref().exists() {
        load_config(path)
    } else {
        Ok(AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:3000");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.cleanup_interval_seconds, 300);
        assert_eq!(config.oauth.state_ttl_seconds, 600);
        assert_eq!(config.linear.token_url, "https://api.linear.app/oauth/token");
        assert_eq!(config.linear.http_timeout_seconds, 30);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            bind_address = "127.0.0.1:8080"
            public_base_url = "https://board.example.org/"
            secure_cookies = true

            [storage]
            backend = "kv"
            cleanup_interval_seconds = 60

            [oauth]
            state_ttl_seconds = 300

            [linear]
            token_url = "http://localhost:9999/oauth/token"
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:8080");
        assert!(config.server.secure_cookies);
        assert_eq!(
            config.server.callback_url(),
            "https://board.example.org/auth/callback"
        );
        assert_eq!(config.storage.backend, StorageBackend::Kv);
        assert_eq!(config.oauth.state_ttl_seconds, 300);
        assert_eq!(config.linear.token_url, "http://localhost:9999/oauth/token");
        // Untouched fields keep defaults
        assert_eq!(config.linear.authorize_url, "https://linear.app/oauth/authorize");
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [storage]
            backend = "sqlite"
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.storage.sqlite_path, "credentials.db");
        assert_eq!(config.server.public_base_url, "http://localhost:3000");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let toml = r#"
            [storage]
            backend = "postgres"
        "#;
        assert!(toml::from_str::<AppConfig>(toml).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[oauth]\nstate_ttl_seconds = 120").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.oauth.state_ttl_seconds, 120);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(load_config(dir.path().join("absent.toml")).is_err());
    }
}
