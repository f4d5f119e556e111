//! OAuth routes: status, authorize, callback, revoke.

use super::{AppError, AppState};
use crate::credentials::{CredentialRecord, DEFAULT_PROVIDER};
use crate::oauth::{describe_expiration, is_near_expiry, ExpirationInfo};
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{Json, Redirect},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Used when the provider's error code is not a plain identifier.
const FALLBACK_PROVIDER_ERROR: &str = "provider_error";

pub fn create_auth_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth", get(auth_status))
        .route("/auth/authorize", post(authorize))
        .route("/auth/callback", get(callback))
        .route("/auth/revoke", post(revoke))
        .with_state(state)
}

/// Outcome flags echoed back by `/auth`
#[derive(Deserialize)]
pub struct StatusQuery {
    error: Option<String>,
    success: Option<String>,
}

#[derive(Serialize)]
pub struct AuthStatus {
    pub has_oauth_config: bool,
    pub oauth_client_id: String,
    pub has_access_token: bool,
    pub has_valid_token: bool,
    pub near_expiry: bool,
    pub expiration: Option<ExpirationInfo>,
    pub error: Option<String>,
    pub success: Option<String>,
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

fn to_auth(key: &str, code: &str) -> Redirect {
    Redirect::to(&format!("/auth?{}={}", key, code))
}

/// Provider error codes are echoed into a URL; anything beyond
/// `[A-Za-z0-9_]` is replaced wholesale.
fn sanitize_error_code(code: &str) -> &str {
    let plain = !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        code
    } else {
        FALLBACK_PROVIDER_ERROR
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// GET /auth
///
/// Integration status for the admin page.
async fn auth_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<AuthStatus>, AppError> {
    let record: Option<CredentialRecord> = state
        .credentials
        .get_token(DEFAULT_PROVIDER)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to read credential");
            AppError::ServerError("Failed to read credential".to_string())
        })?;

    let now = state.clock.now_millis();
    let valid = record.as_ref().filter(|r| !r.is_expired_at(now));

    Ok(Json(AuthStatus {
        has_oauth_config: state.oauth.is_configured(),
        oauth_client_id: state
            .oauth
            .credentials()
            .map(|c| c.client_id_hint())
            .unwrap_or_else(|| "Not set".to_string()),
        has_access_token: record.is_some(),
        has_valid_token: valid.is_some(),
        near_expiry: valid.map(|r| is_near_expiry(r, now)).unwrap_or(false),
        expiration: record.as_ref().map(|r| describe_expiration(r, now)),
        error: query.error.map(|e| sanitize_error_code(&e).to_string()),
        success: query.success.map(|s| sanitize_error_code(&s).to_string()),
    }))
}

/// POST /auth/authorize
///
/// Issues a state token and sends the admin to the provider.
async fn authorize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Redirect, AppError> {
    let session = state.require_admin(&headers)?;

    if !state.oauth.is_configured() {
        warn!("Authorization requested but OAuth client is not configured");
        return Ok(to_auth("error", "oauth_config_error"));
    }

    let csrf_state = state.states.create().await.map_err(|e| {
        error!(error = %e, "Failed to issue OAuth state");
        AppError::ServerError("Failed to start authorization".to_string())
    })?;

    match state
        .oauth
        .build_authorization_url(&state.callback_url, &csrf_state)
    {
        Ok(url) => {
            info!(user_id = %session.user_id, "Redirecting to OAuth provider");
            Ok(Redirect::to(&url))
        }
        Err(e) => {
            warn!(error = %e, "Failed to build authorization URL");
            Ok(to_auth("error", e.redirect_code()))
        }
    }
}

/// GET /auth/callback
///
/// # Security
/// - Requires an admin session
/// - State is single-use and consumed before the code is exchanged
async fn callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(callback): Query<OAuthCallback>,
) -> Result<Redirect, AppError> {
    state.require_admin(&headers)?;

    if let Some(provider_error) = callback.error {
        warn!(error = %provider_error, "OAuth provider returned an error");
        return Ok(to_auth("error", sanitize_error_code(&provider_error)));
    }

    let (Some(code), Some(csrf_state)) = (non_empty(callback.code), non_empty(callback.state))
    else {
        warn!("OAuth callback missing code or state");
        return Ok(to_auth("error", "missing_parameters"));
    };

    let redeemed = state.states.consume(&csrf_state).await.map_err(|e| {
        error!(error = %e, "Failed to consume OAuth state");
        AppError::ServerError("Failed to validate authorization state".to_string())
    })?;
    if !redeemed {
        warn!("OAuth callback with invalid or expired state");
        return Ok(to_auth("error", "invalid_state"));
    }

    let record = match state.oauth.exchange_code(&code, &state.callback_url).await {
        Ok(record) => record,
        Err(e) => {
            error!(error = %e, "Token exchange failed");
            return Ok(to_auth("error", e.redirect_code()));
        }
    };

    state.credentials.store_token(&record).await.map_err(|e| {
        error!(error = %e, "Failed to store credential");
        AppError::ServerError("Failed to store credential".to_string())
    })?;

    info!(provider = %record.provider, "Authorization complete");
    Ok(to_auth("success", "authorized"))
}

/// POST /auth/revoke
async fn revoke(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Redirect, AppError> {
    let session = state.require_admin(&headers)?;

    let record = state
        .credentials
        .get_token(DEFAULT_PROVIDER)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to read credential for revocation");
            AppError::ServerError("Failed to read credential".to_string())
        })?;

    state.revoker.revoke(record.as_ref()).await.map_err(|e| {
        error!(error = %e, "Revocation failed");
        AppError::ServerError("Failed to clear credential".to_string())
    })?;

    debug!(user_id = %session.user_id, "Revocation requested");
    Ok(to_auth("success", "revoked"))
}
