//! OAuth 2.0 authorization with the issue tracker (`actor=app`).
//!
//! Implements the authorization code flow:
//! 1. Admin posts to `/auth/authorize`
//! 2. A single-use state token is issued and the admin is redirected to Linear
//! 3. Linear redirects back to `/auth/callback` with `code` and `state`
//! 4. The state is consumed, the code exchanged, the credential stored
//!
//! Later requests read the stored credential and apply [`expiry`] policy;
//! [`Revoker`] ends the lifecycle.

mod error;
mod exchange;
pub mod expiry;
mod provider;
mod revoke;
mod state_store;

pub use error::OAuthError;
pub use exchange::FALLBACK_TOKEN_LIFETIME_SECONDS;
pub use expiry::{describe_expiration, is_near_expiry, ExpirationInfo};
pub use provider::{
    ClientCredentials, OAuthClient, OAuthProviderConfig, ACTOR, LINEAR_AUTHORIZE_URL,
    LINEAR_REVOKE_URL, LINEAR_TOKEN_URL, SCOPES,
};
pub use revoke::Revoker;
pub use state_store::{
    random_state, KvStateStore, MemoryStateStore, StateEntry, StateStore,
    DEFAULT_STATE_TTL_SECONDS,
};
