use super::{AppError, AppState};
use crate::credentials::DEFAULT_PROVIDER;
use crate::linear::{Issue, LinearClient};
use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub fn create_issues_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(list_issues))
        .with_state(state)
}

#[derive(Serialize)]
pub struct IssuesResponse {
    pub issues: Vec<Issue>,
}

/// GET /
///
/// Issues assigned to the integration. Empty when no valid credential is
/// stored; the client is built from the current credential on every request.
async fn list_issues(State(state): State<Arc<AppState>>) -> Result<Json<IssuesResponse>, AppError> {
    let record = state
        .credentials
        .get_valid_token(DEFAULT_PROVIDER)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to read credential");
            AppError::ServerError("Failed to read credential".to_string())
        })?;

    let Some(record) = record else {
        debug!("No valid credential; returning empty issue list");
        return Ok(Json(IssuesResponse { issues: Vec::new() }));
    };

    let issues = LinearClient::new(&state.http_client, &state.linear_api_url, &record.access_token)
        .fetch_app_issues()
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to fetch issues");
            AppError::BadGateway("Failed to fetch issues".to_string())
        })?;

    Ok(Json(IssuesResponse { issues }))
}
