//! # troupe-auth
//!
//! Bearer-credential handling for the orchestrator:
//!
//! - [`TokenProvider`] keeps an OAuth access/refresh token pair fresh,
//!   refreshing proactively when the access token nears expiry.
//! - [`secrets`] seals and opens persona credentials with AES-256-GCM under
//!   the operator's master key, and hashes/compares API keys.
//!
//! The authorization-code exchange that first mints a token pair happens
//! outside this process; the provider only consumes and rotates it.

#![deny(unsafe_code)]

pub mod errors;
pub mod provider;
pub mod secrets;
pub mod types;

pub use errors::AuthError;
pub use provider::TokenProvider;
pub use secrets::{SealedSecret, SecretError};
pub use types::{now_ms, OAuthConfig, OAuthTokens};
