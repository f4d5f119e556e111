//! Sealed admin session cookie.
//!
//! The cookie carries `{user_id, issued_at}` as JSON, sealed with AES-256-GCM
//! under a key derived from the session secret. Tampered, foreign or stale
//! cookies all open to `None`.

use super::extract_cookie;
use crate::clock::Clock;
use crate::credentials::{decrypt, derive_key, encrypt};
use anyhow::{Context, Result};
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const SESSION_COOKIE: &str = "__admin_session";

/// 24 hours
pub const SESSION_MAX_AGE_SECONDS: i64 = 60 * 60 * 24;

const KEY_PURPOSE: &str = "admin-session";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSession {
    pub user_id: String,
    /// Unix milliseconds
    pub issued_at: i64,
}

pub struct SessionManager {
    key: Vec<u8>,
    secure: bool,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    pub fn new(session_secret: &str, secure: bool, clock: Arc<dyn Clock>) -> Self {
        Self {
            key: derive_key(KEY_PURPOSE, session_secret),
            secure,
            clock,
        }
    }

    /// Seals a fresh session for `user_id`.
    pub fn issue(&self, user_id: &str) -> Result<String> {
        let session = AdminSession {
            user_id: user_id.to_string(),
            issued_at: self.clock.now_millis(),
        };
        let json = serde_json::to_string(&session).context("Failed to serialize session")?;
        encrypt(&json, &self.key)
    }

    /// Opens a sealed value, rejecting anything older than the max age.
    pub fn open(&self, sealed: &str) -> Option<AdminSession> {
        let json = match decrypt(sealed, &self.key) {
            Ok(json) => json,
            Err(e) => {
                debug!(error = %e, "Rejected admin session cookie");
                return None;
            }
        };
        let session: AdminSession = serde_json::from_str(&json).ok()?;

        let age = self.clock.now_millis() - session.issued_at;
        if age > SESSION_MAX_AGE_SECONDS * 1000 {
            debug!(user_id = %session.user_id, "Admin session expired");
            return None;
        }
        Some(session)
    }

    /// Session carried by the request, if any.
    pub fn from_headers(&self, headers: &HeaderMap) -> Option<AdminSession> {
        let sealed = extract_cookie(headers, SESSION_COOKIE).ok()?;
        self.open(&sealed)
    }

    /// `Set-Cookie` value establishing the session.
    pub fn set_cookie(&self, sealed: &str) -> String {
        self.cookie_with(sealed, SESSION_MAX_AGE_SECONDS)
    }

    /// `Set-Cookie` value expiring the session.
    pub fn clear_cookie(&self) -> String {
        self.cookie_with("", 0)
    }

    fn cookie_with(&self, value: &str, max_age: i64) -> String {
        let mut cookie = format!(
            "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
            SESSION_COOKIE, value, max_age
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}
