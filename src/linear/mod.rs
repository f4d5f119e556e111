//! Minimal Linear GraphQL client.
//!
//! A client is built per request from the currently valid credential and
//! dropped with the request, so a revoked or expired token is never reused
//! through a stale handle.

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const LINEAR_API_URL: &str = "https://api.linear.app/graphql";

/// Issues assigned to the app itself (the `actor=app` identity).
const APP_ISSUES_QUERY: &str = r#"
query AppIssues {
  issues(filter: { assignee: { app: { eq: true } } }) {
    nodes { id identifier title url }
  }
}
"#;

/// Linear issue as shown to volunteers.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Issue {
    pub id: String,
    #[serde(default)]
    pub identifier: Option<String>,
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<IssuesData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct IssuesData {
    issues: IssueConnection,
}

#[derive(Deserialize)]
struct IssueConnection {
    nodes: Vec<Issue>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

/// HTTP client for the Linear GraphQL API.
pub struct LinearClient<'a> {
    access_token: &'a str,
    http_client: &'a Client,
    api_url: &'a str,
}

impl<'a> LinearClient<'a> {
    pub fn new(http_client: &'a Client, api_url: &'a str, access_token: &'a str) -> Self {
        Self {
            access_token,
            http_client,
            api_url,
        }
    }

    /// Fetch issues assigned to the integration.
    pub async fn fetch_app_issues(&self) -> Result<Vec<Issue>> {
        let response = self
            .http_client
            .post(self.api_url)
            .bearer_auth(self.access_token)
            .json(&json!({ "query": APP_ISSUES_QUERY }))
            .send()
            .await
            .context("Failed to send issues query")?;

        check_response_status(response.status())?;

        let body: GraphQlResponse = response
            .json()
            .await
            .context("Failed to parse issues response")?;

        if let Some(first) = body.errors.first() {
            return Err(anyhow!(
                "Linear GraphQL error: {} ({} total)",
                first.message,
                body.errors.len()
            ));
        }

        body.data
            .map(|data| data.issues.nodes)
            .ok_or_else(|| anyhow!("Linear response contained no data"))
    }
}

fn check_response_status(status: StatusCode) -> Result<()> {
    match status {
        StatusCode::UNAUTHORIZED => Err(anyhow!(
            "Linear API returned 401 Unauthorized: token expired or revoked"
        )),
        s if !s.is_success() => Err(anyhow!("Linear API error: {}", s)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    #[tokio::test]
    async fn test_fetch_app_issues() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/graphql")
            .match_header("authorization", "Bearer lin_abc")
            .match_body(Matcher::Regex("assignee".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data": {"issues": {"nodes": [
                    {"id": "i-1", "identifier": "VOL-1", "title": "Sort donations", "url": "https://linear.app/org/issue/VOL-1"},
                    {"id": "i-2", "title": "Call venue"}
                ]}}}"#,
            )
            .create_async()
            .await;

        let http = Client::new();
        let url = format!("{}/graphql", server.url());
        let issues = LinearClient::new(&http, &url, "lin_abc")
            .fetch_app_issues()
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].title, "Sort donations");
        assert_eq!(issues[0].identifier.as_deref(), Some("VOL-1"));
        assert_eq!(issues[1].url, None);
    }

    #[tokio::test]
    async fn test_graphql_errors_are_reported() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": null, "errors": [{"message": "Field not found"}]}"#)
            .create_async()
            .await;

        let http = Client::new();
        let url = format!("{}/graphql", server.url());
        let err = LinearClient::new(&http, &url, "lin_abc")
            .fetch_app_issues()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Field not found"));
    }

    #[tokio::test]
    async fn test_401_auth_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/graphql")
            .with_status(401)
            .create_async()
            .await;

        let http = Client::new();
        let url = format!("{}/graphql", server.url());
        let err = LinearClient::new(&http, &url, "expired")
            .fetch_app_issues()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("token expired or revoked"));
    }
}
