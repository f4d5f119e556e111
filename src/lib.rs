// Time source shared by every expiry decision
pub mod clock;

// File and environment configuration
pub mod config;

// KV REST client (Upstash-compatible)
pub mod kv;

// Credential storage backends
pub mod credentials;

// OAuth handshake, state tokens, expiry policy and revocation
pub mod oauth;

// Issue tracker API client
pub mod linear;

// Admin login and session cookie
pub mod auth;

// HTTP routes
pub mod api;
