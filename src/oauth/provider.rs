//! Linear OAuth handshake.
//!
//! Every authorization request uses `actor=app`: the integration acts as itself
//! rather than as the admin who authorized it. This is fixed, not a per-call
//! option.

use super::error::OAuthError;
use super::exchange;
use crate::clock::Clock;
use crate::credentials::{CredentialRecord, DEFAULT_PROVIDER};
use reqwest::Client;
use std::fmt;
use std::sync::Arc;

pub const LINEAR_AUTHORIZE_URL: &str = "https://linear.app/oauth/authorize";
pub const LINEAR_TOKEN_URL: &str = "https://api.linear.app/oauth/token";
pub const LINEAR_REVOKE_URL: &str = "https://api.linear.app/oauth/revoke";

/// Scopes requested on every authorization.
pub const SCOPES: &str = "read,write";

/// Actor mode requested on every authorization.
pub const ACTOR: &str = "app";

/// OAuth client id and secret.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    /// `None` unless both values are non-empty.
    pub fn from_parts(client_id: Option<String>, client_secret: Option<String>) -> Option<Self> {
        match (client_id, client_secret) {
            (Some(id), Some(secret)) if !id.trim().is_empty() && !secret.trim().is_empty() => {
                Some(Self {
                    client_id: id,
                    client_secret: secret,
                })
            }
            _ => None,
        }
    }

    /// First eight characters of the client id, for status displays.
    pub fn client_id_hint(&self) -> String {
        let prefix: String = self.client_id.chars().take(8).collect();
        format!("{}...", prefix)
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id_hint())
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// OAuth provider endpoints.
#[derive(Clone, Debug)]
pub struct OAuthProviderConfig {
    /// Authorization endpoint (browser redirect target)
    pub auth_url: String,

    /// Token exchange endpoint
    pub token_url: String,

    /// Token revocation endpoint
    pub revoke_url: String,

    /// Provider key stored on issued credentials
    pub provider: String,
}

impl Default for OAuthProviderConfig {
    fn default() -> Self {
        Self {
            auth_url: LINEAR_AUTHORIZE_URL.to_string(),
            token_url: LINEAR_TOKEN_URL.to_string(),
            revoke_url: LINEAR_REVOKE_URL.to_string(),
            provider: DEFAULT_PROVIDER.to_string(),
        }
    }
}

/// Builds authorization URLs and exchanges codes for credentials.
pub struct OAuthClient {
    config: OAuthProviderConfig,
    credentials: Option<ClientCredentials>,
    http_client: Client,
    clock: Arc<dyn Clock>,
}

impl OAuthClient {
    pub fn new(
        config: OAuthProviderConfig,
        credentials: Option<ClientCredentials>,
        http_client: Client,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            credentials,
            http_client,
            clock,
        }
    }

    pub fn config(&self) -> &OAuthProviderConfig {
        &self.config
    }

    pub fn credentials(&self) -> Option<&ClientCredentials> {
        self.credentials.as_ref()
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    fn require_credentials(&self) -> Result<&ClientCredentials, OAuthError> {
        self.credentials.as_ref().ok_or(OAuthError::NotConfigured)
    }

    /// Provider authorization URL carrying the redirect URI and CSRF state.
    pub fn build_authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
    ) -> Result<String, OAuthError> {
        let credentials = self.require_credentials()?;
        Ok(format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&actor={}",
            self.config.auth_url,
            urlencoding::encode(&credentials.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(SCOPES),
            urlencoding::encode(state),
            ACTOR,
        ))
    }

    /// Trades an authorization code for a credential.
    ///
    /// `redirect_uri` must match the one used to build the authorization URL.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<CredentialRecord, OAuthError> {
        let credentials = self.require_credentials()?;

        let response = exchange::exchange_code_for_token(
            &self.http_client,
            &self.config.token_url,
            code,
            redirect_uri,
            &credentials.client_id,
            &credentials.client_secret,
        )
        .await?;

        Ok(response.into_record(&self.config.provider, self.clock.now_millis()))
    }
}
