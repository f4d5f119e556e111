use super::{AppError, AppState, LOGIN_PATH};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

pub fn create_admin_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(LOGIN_PATH, get(login_status).post(login))
        .route("/admin/logout", post(logout))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct LoginQuery {
    error: Option<String>,
}

/// Missing fields are reported as a login error rather than a 422.
#[derive(Deserialize)]
pub struct LoginForm {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Serialize)]
pub struct LoginStatus {
    pub authenticated: bool,
    pub has_credentials: bool,
    pub error: Option<String>,
}

fn login_error(code: &str) -> Redirect {
    Redirect::to(&format!("{}?error={}", LOGIN_PATH, code))
}

/// GET /admin/login
async fn login_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Json<LoginStatus> {
    let error = query.error.filter(|code| {
        matches!(code.as_str(), "missing_credentials" | "invalid_credentials")
    });
    Json(LoginStatus {
        authenticated: state.sessions.from_headers(&headers).is_some(),
        has_credentials: state.admin.is_configured(),
        error,
    })
}

/// POST /admin/login
async fn login(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let (Some(username), Some(password)) = (form.username, form.password) else {
        return Ok(login_error("missing_credentials").into_response());
    };

    if !state.admin.verify(&username, &password) {
        warn!("Rejected admin login attempt");
        return Ok(login_error("invalid_credentials").into_response());
    }

    let sealed = state.sessions.issue(&username).map_err(|e| {
        error!(error = %e, "Failed to seal admin session");
        AppError::ServerError("Failed to create session".to_string())
    })?;

    info!(user_id = %username, "Admin logged in");
    Ok((
        [(header::SET_COOKIE, state.sessions.set_cookie(&sealed))],
        Redirect::to("/"),
    )
        .into_response())
}

/// POST /admin/logout
async fn logout(State(state): State<Arc<AppState>>) -> Response {
    (
        [(header::SET_COOKIE, state.sessions.clear_cookie())],
        Redirect::to(LOGIN_PATH),
    )
        .into_response()
}
