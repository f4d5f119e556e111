//! HTTP surface.
//!
//! One router per concern, merged by [`create_app_router`]. Expected
//! conditions in the OAuth flow become redirects to `/auth?error=<code>`;
//! unexpected failures become an [`AppError`] JSON body.

pub mod admin;
pub mod auth;
pub mod issues;

pub use admin::create_admin_router;
pub use auth::create_auth_router;
pub use issues::create_issues_router;

use crate::auth::{AdminCredentials, AdminSession, SessionManager};
use crate::clock::Clock;
use crate::credentials::CredentialStorage;
use crate::oauth::{OAuthClient, Revoker, StateStore};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
    Router,
};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Where unauthenticated admin requests are sent.
pub const LOGIN_PATH: &str = "/admin/login";

/// Shared application state
pub struct AppState {
    pub oauth: OAuthClient,
    pub states: Arc<dyn StateStore>,
    pub credentials: Arc<dyn CredentialStorage>,
    pub revoker: Revoker,
    pub sessions: SessionManager,
    pub admin: AdminCredentials,
    pub clock: Arc<dyn Clock>,
    /// Registered redirect URI, `<public_base_url>/auth/callback`
    pub callback_url: String,
    pub http_client: Client,
    pub linear_api_url: String,
}

impl AppState {
    /// Admin session carried by the request, or [`AppError::LoginRequired`].
    pub fn require_admin(&self, headers: &HeaderMap) -> Result<AdminSession, AppError> {
        self.sessions.from_headers(headers).ok_or_else(|| {
            debug!("Admin session missing or invalid");
            AppError::LoginRequired
        })
    }
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types
#[derive(Debug)]
pub enum AppError {
    /// No valid admin session; answered with a redirect to the login page.
    LoginRequired,
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::LoginRequired => return Redirect::to(LOGIN_PATH).into_response(),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

/// Builds the complete application router.
pub fn create_app_router(state: AppState) -> Router {
    let state = Arc::new(state);
    Router::new()
        .merge(create_issues_router(Arc::clone(&state)))
        .merge(create_auth_router(Arc::clone(&state)))
        .merge(create_admin_router(state))
        .layer(TraceLayer::new_for_http())
}
