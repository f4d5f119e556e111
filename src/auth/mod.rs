mod session;

pub use session::{AdminSession, SessionManager, SESSION_COOKIE, SESSION_MAX_AGE_SECONDS};

use axum::http::{header, HeaderMap};
use sha2::{Digest, Sha256};


/// Configured admin username and password.
#[derive(Clone)]
pub struct AdminCredentials {
    username: String,
    password: String,
}

impl AdminCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Checks a login attempt.
    ///
    /// Values are compared as SHA-256 digests so the comparison does not
    /// short-circuit on the first differing byte of the secret itself.
    /// Unconfigured credentials never match.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        if !self.is_configured() {
            return false;
        }
        let user_ok = digest_eq(username, &self.username);
        let pass_ok = digest_eq(password, &self.password);
        user_ok & pass_ok
    }
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn digest_eq(a: &str, b: &str) -> bool {
    let a = Sha256::digest(a.as_bytes());
    let b = Sha256::digest(b.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Extract a cookie value from the `Cookie` request header
///
/// Multiple `Cookie` headers are searched in order. Returns the first value
/// for `name`.
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Result<String, CookieError> {
    for value in headers.get_all(header::COOKIE) {
        let value = value.to_str().map_err(|_| CookieError::InvalidFormat)?;
        if let Some(found) = parse_cookie(value, name) {
            if found.is_empty() {
                return Err(CookieError::Empty);
            }
            return Ok(found.to_string());
        }
    }
    Err(CookieError::Missing)
}

/// Finds `name` in a `a=1; b=2` cookie string.
fn parse_cookie<'a>(header_value: &'a str, name: &str) -> Option<&'a str> {
    header_value.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key.trim() == name).then(|| value.trim().trim_matches('"'))
    })
}

/// Cookie extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum CookieError {
    /// No cookie with the requested name
    Missing,
    /// Cookie header is not valid visible ASCII
    InvalidFormat,
    /// Cookie is present but has no value
    Empty,
}

impl std::fmt::Display for CookieError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CookieError::Missing => write!(f, "Cookie not provided"),
            CookieError::InvalidFormat => write!(f, "Invalid cookie header"),
            CookieError::Empty => write!(f, "Cookie is empty"),
        }
    }
}

impl std::error::Error for CookieError {}
