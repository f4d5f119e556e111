//! OAuth token exchange logic.
//!
//! Exchanges an authorization code for an access token and maps the
//! provider's answer onto a [`CredentialRecord`].

use super::error::OAuthError;
use crate::credentials::CredentialRecord;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Lifetime assumed when the provider omits `expires_in` (~10 years).
///
/// Linear's app-actor tokens are long-lived; this stands in for "does not
/// expire" while keeping `expires_at` a finite instant.
pub const FALLBACK_TOKEN_LIFETIME_SECONDS: i64 = 315_705_599;

/// Form body of the token request.
#[derive(Serialize)]
struct TokenRequest<'a> {
    code: &'a str,
    redirect_uri: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
}

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Builds the record as of `now`. A missing, non-positive or
    /// unrepresentable lifetime falls back to
    /// [`FALLBACK_TOKEN_LIFETIME_SECONDS`].
    pub(crate) fn into_record(self, provider: &str, now_millis: i64) -> CredentialRecord {
        let expires_at = self
            .expires_in
            .filter(|seconds| *seconds > 0)
            .and_then(|seconds| seconds.checked_mul(1000))
            .and_then(|ms| now_millis.checked_add(ms))
            .unwrap_or_else(|| now_millis.saturating_add(FALLBACK_TOKEN_LIFETIME_SECONDS * 1000));

        CredentialRecord {
            access_token: self.access_token,
            provider: provider.to_string(),
            expires_at,
            created_at: now_millis,
        }
    }
}

/// Posts the authorization code to the token endpoint.
///
/// A non-success status is reported as [`OAuthError::TokenExchange`]; the
/// response body is logged at debug level only.
pub(crate) async fn exchange_code_for_token(
    http_client: &Client,
    token_url: &str,
    code: &str,
    redirect_uri: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<TokenResponse, OAuthError> {
    let form = TokenRequest {
        code,
        redirect_uri,
        client_id,
        client_secret,
        grant_type: "authorization_code",
    };

    tracing::debug!(token_url = %token_url, "Exchanging authorization code for token");

    let response = http_client
        .post(token_url)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status = %status, body = %body, "Token endpoint rejected exchange");
        return Err(OAuthError::TokenExchange { status });
    }

    let token_response: TokenResponse = response
        .json()
        .await
        .map_err(|e| OAuthError::InvalidResponse(e.to_string()))?;

    tracing::debug!(
        expires_in = ?token_response.expires_in,
        token_type = ?token_response.token_type,
        scope = ?token_response.scope,
        "Token exchange successful"
    );

    Ok(token_response)
}
