use reqwest::StatusCode;
use thiserror::Error;

/// Failures of the authorization handshake.
#[derive(Debug, Error)]
pub enum OAuthError {
    /// Client id or secret missing. Deliberately does not say which.
    #[error("OAuth client credentials are not configured")]
    NotConfigured,

    /// Provider answered the token request with a non-success status.
    #[error("token exchange failed with status {status}")]
    TokenExchange { status: StatusCode },

    #[error("request to OAuth provider failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("OAuth provider returned an unreadable response: {0}")]
    InvalidResponse(String),
}

impl OAuthError {
    /// Code placed in the `/auth?error=` redirect.
    pub fn redirect_code(&self) -> &'static str {
        match self {
            OAuthError::NotConfigured => "oauth_config_error",
            OAuthError::TokenExchange { .. }
            | OAuthError::Transport(_)
            | OAuthError::InvalidResponse(_) => "token_exchange_failed",
        }
    }
}
