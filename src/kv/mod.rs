//! Client for an external key-value store spoken over the Redis REST protocol.
//!
//! Each command is a `POST` of a JSON array (`["SET", "key", "value"]`) to the
//! store's base URL with a bearer token. The store answers with
//! `{"result": ...}` on success or `{"error": "..."}` on failure.
//!
//! The client is cheap to clone and meant to be shared by every component that
//! keeps state in the store. Components never own it.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

/// Deletes `KEYS[1]` only while it still holds `ARGV[1]`.
const COMPARE_AND_DELETE_SCRIPT: &str =
    "if redis.call('GET', KEYS[1]) == ARGV[1] then return redis.call('DEL', KEYS[1]) else return 0 end";

/// Keys requested per SCAN round trip.
const SCAN_COUNT: &str = "100";

#[derive(Deserialize, Debug)]
struct KvResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Shared handle to the REST key-value store.
#[derive(Clone)]
pub struct KvClient {
    http_client: Client,
    base_url: String,
    token: String,
}

impl KvClient {
    pub fn new(http_client: Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Runs a single command and returns its raw `result` value.
    pub async fn command<S: AsRef<str>>(&self, args: &[S]) -> Result<Value> {
        let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
        let name = args.first().copied().unwrap_or_default();

        let response = self
            .http_client
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .json(&args)
            .send()
            .await
            .with_context(|| format!("Failed to send KV command {}", name))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read KV response for {}", name))?;

        match serde_json::from_str::<KvResponse>(&body) {
            Ok(KvResponse {
                error: Some(error), ..
            }) => Err(anyhow!("KV command {} failed: {}", name, error)),
            _ if !status.is_success() => {
                Err(anyhow!("KV store returned status {} for {}", status, name))
            }
            Ok(parsed) => Ok(parsed.result),
            Err(e) => Err(anyhow!("Malformed KV response for {}: {}", name, e)),
        }
    }

    /// `SET key value EX ttl`
    pub async fn set_ex(&self, key: &str, value: &str, ttl_seconds: i64) -> Result<()> {
        let ttl = ttl_seconds.to_string();
        self.command(&["SET", key, value, "EX", ttl.as_str()]).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self.command(&["GET", key]).await?;
        as_optional_string(value, "GET")
    }

    /// Atomically fetches and removes `key`.
    pub async fn get_del(&self, key: &str) -> Result<Option<String>> {
        let value = self.command(&["GETDEL", key]).await?;
        as_optional_string(value, "GETDEL")
    }

    /// Deletes the given keys, returning how many existed.
    pub async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut args = Vec::with_capacity(keys.len() + 1);
        args.push("DEL");
        args.extend(keys.iter().map(String::as_str));
        let value = self.command(&args).await?;
        as_count(value, "DEL")
    }

    /// Deletes `key` only if it still holds `expected`, so a value written by
    /// a concurrent caller in between is left alone.
    pub async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let value = self
            .command(&["EVAL", COMPARE_AND_DELETE_SCRIPT, "1", key, expected])
            .await?;
        Ok(as_count(value, "EVAL")? > 0)
    }

    /// Lists every key starting with `prefix` using cursor-based SCAN.
    pub async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{}*", prefix);
        let mut cursor = "0".to_string();
        let mut keys = Vec::new();

        loop {
            let value = self
                .command(&["SCAN", cursor.as_str(), "MATCH", pattern.as_str(), "COUNT", SCAN_COUNT])
                .await?;
            let (next, batch) = parse_scan_page(value)?;
            keys.extend(batch);
            if next == "0" {
                break;
            }
            cursor = next;
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

fn as_optional_string(value: Value, command: &str) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Err(anyhow!("Unexpected {} result: {}", command, other)),
    }
}

fn as_count(value: Value, command: &str) -> Result<u64> {
    match &value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| anyhow!("Unexpected {} result: {}", command, value)),
        Value::String(s) => s
            .parse()
            .map_err(|_| anyhow!("Unexpected {} result: {}", command, value)),
        _ => Err(anyhow!("Unexpected {} result: {}", command, value)),
    }
}

fn parse_scan_page(value: Value) -> Result<(String, Vec<String>)> {
    let mut parts = match value {
        Value::Array(parts) => parts,
        other => return Err(anyhow!("Unexpected SCAN result: {}", other)),
    };
    if parts.len() != 2 {
        return Err(anyhow!("SCAN result must have 2 elements, got {}", parts.len()));
    }

    let keys = match parts.pop() {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(anyhow!("Unexpected SCAN key: {}", other)),
            })
            .collect::<Result<Vec<_>>>()?,
        other => return Err(anyhow!("Unexpected SCAN key list: {:?}", other)),
    };
    let cursor = match parts.pop() {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        other => return Err(anyhow!("Unexpected SCAN cursor: {:?}", other)),
    };

    Ok((cursor, keys))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client_for(server: &Server) -> KvClient {
        KvClient::new(Client::new(), server.url(), "kv-token")
    }

    #[tokio::test]
    async fn test_set_ex_sends_command_array() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("authorization", "Bearer kv-token")
            .match_body(Matcher::Json(json!(["SET", "k", "v", "EX", "60"])))
            .with_status(200)
            .with_body(r#"{"result":"OK"}"#)
            .create_async()
            .await;

        client_for(&server).set_ex("k", "v", 60).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_missing_key_is_none() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .match_body(Matcher::Json(json!(["GET", "absent"])))
            .with_status(200)
            .with_body(r#"{"result":null}"#)
            .create_async()
            .await;

        let value = client_for(&server).get("absent").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_command_error_is_surfaced() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(400)
            .with_body(r#"{"error":"ERR unknown command"}"#)
            .create_async()
            .await;

        let err = client_for(&server).get("k").await.unwrap_err();
        assert!(err.to_string().contains("ERR unknown command"));
    }

    #[tokio::test]
    async fn test_unauthorized_status_without_json_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(401)
            .with_body("Unauthorized")
            .create_async()
            .await;

        let err = client_for(&server).get("k").await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_del_with_no_keys_skips_request() {
        // No mock registered: any request would fail with 501.
        let server = Server::new_async().await;
        let removed = client_for(&server).del(&[]).await.unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_parse_scan_page() {
        let (cursor, keys) =
            parse_scan_page(json!(["17", ["cred:token:a", "cred:token:b"]])).unwrap();
        assert_eq!(cursor, "17");
        assert_eq!(keys, vec!["cred:token:a", "cred:token:b"]);

        assert!(parse_scan_page(json!("nope")).is_err());
        assert!(parse_scan_page(json!(["0"])).is_err());
    }

    #[test]
    fn test_as_count_accepts_numbers_and_strings() {
        assert_eq!(as_count(json!(3), "DEL").unwrap(), 3);
        assert_eq!(as_count(json!("2"), "DEL").unwrap(), 2);
        assert!(as_count(json!(null), "DEL").is_err());
    }
}
