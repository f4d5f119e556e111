// In-process stand-in for a Redis REST key-value store.
//
// Expiry is measured against the same ManualClock the test drives, so TTLs
// can be crossed without sleeping.

#![allow(dead_code)]

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use dashmap::DashMap;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use volunteer_board::clock::{Clock, ManualClock};
use volunteer_board::kv::KvClient;

pub const KV_TOKEN: &str = "test-kv-token";

#[derive(Clone)]
struct Entry {
    value: String,
    /// Unix millis; `None` never expires.
    expires_at: Option<i64>,
}

struct FakeKvState {
    entries: DashMap<String, Entry>,
    clock: Arc<ManualClock>,
}

impl FakeKvState {
    fn live(&self, key: &str) -> Option<Entry> {
        let now = self.clock.now_millis();
        let expired = match self.entries.get(key) {
            None => return None,
            Some(entry) => match entry.expires_at {
                Some(at) if at <= now => true,
                _ => return Some(entry.value().clone()),
            },
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    fn live_keys(&self, prefix: &str) -> Vec<String> {
        // Collected before `live` runs: it may remove entries.
        let candidates: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect();
        candidates
            .into_iter()
            .filter(|k| self.live(k).is_some())
            .collect()
    }
}

/// Handle to a running fake KV server.
pub struct FakeKv {
    pub url: String,
    state: Arc<FakeKvState>,
}

impl FakeKv {
    pub async fn start(clock: Arc<ManualClock>) -> Self {
        let state = Arc::new(FakeKvState {
            entries: DashMap::new(),
            clock,
        });
        let app = Router::new()
            .route("/", post(handle_command))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            state,
        }
    }

    pub fn client(&self) -> KvClient {
        KvClient::new(Client::new(), self.url.as_str(), KV_TOKEN)
    }

    /// Writes a raw value with no TTL, bypassing the client.
    pub fn put_raw(&self, key: &str, value: &str) {
        self.state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
    }

    pub fn get_raw(&self, key: &str) -> Option<String> {
        self.state.live(key).map(|e| e.value)
    }

    /// Remaining TTL in whole seconds, `None` when absent or persistent.
    pub fn ttl_seconds(&self, key: &str) -> Option<i64> {
        let entry = self.state.live(key)?;
        let at = entry.expires_at?;
        Some(at.saturating_sub(self.state.clock.now_millis()) / 1000)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys = self.state.live_keys("");
        keys.sort();
        keys
    }
}

fn reply(result: Value) -> Response {
    Json(json!({ "result": result })).into_response()
}

fn fail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn handle_command(
    State(state): State<Arc<FakeKvState>>,
    headers: HeaderMap,
    Json(args): Json<Vec<String>>,
) -> Response {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", KV_TOKEN))
        .unwrap_or(false);
    if !authorized {
        return fail(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let Some(name) = args.first() else {
        return fail(StatusCode::BAD_REQUEST, "ERR empty command");
    };
    let now = state.clock.now_millis();

    match (name.to_ascii_uppercase().as_str(), &args[1..]) {
        ("SET", [key, value]) => {
            state.entries.insert(
                key.clone(),
                Entry {
                    value: value.clone(),
                    expires_at: None,
                },
            );
            reply(json!("OK"))
        }
        ("SET", [key, value, ex, ttl]) if ex.eq_ignore_ascii_case("EX") => {
            let Ok(ttl) = ttl.parse::<i64>() else {
                return fail(StatusCode::BAD_REQUEST, "ERR value is not an integer");
            };
            if ttl <= 0 {
                return fail(StatusCode::BAD_REQUEST, "ERR invalid expire time in 'set' command");
            }
            state.entries.insert(
                key.clone(),
                Entry {
                    value: value.clone(),
                    expires_at: Some(now.saturating_add(ttl.saturating_mul(1000))),
                },
            );
            reply(json!("OK"))
        }
        ("GET", [key]) => reply(state.live(key).map(|e| json!(e.value)).unwrap_or(Value::Null)),
        ("GETDEL", [key]) => {
            let value = state.live(key).and_then(|_| state.entries.remove(key));
            reply(value.map(|(_, e)| json!(e.value)).unwrap_or(Value::Null))
        }
        ("DEL", keys) if !keys.is_empty() => {
            let removed = keys
                .iter()
                .filter(|k| state.live(k).is_some() && state.entries.remove(*k).is_some())
                .count();
            reply(json!(removed))
        }
        // Only the compare-and-delete script is supported.
        ("EVAL", [_script, numkeys, key, expected]) if numkeys == "1" => {
            let matches = state
                .live(key)
                .map(|e| &e.value == expected)
                .unwrap_or(false);
            let removed = matches && state.entries.remove(key).is_some();
            reply(json!(if removed { 1 } else { 0 }))
        }
        ("SCAN", [_cursor, m, pattern, _count, _n]) if m.eq_ignore_ascii_case("MATCH") => {
            let keys = state.live_keys(pattern.trim_end_matches('*'));
            reply(json!(["0", keys]))
        }
        _ => fail(StatusCode::BAD_REQUEST, "ERR unsupported command"),
    }
}
