//! Error types for token handling.

use thiserror::Error;

/// Errors from the OAuth refresh flow.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token endpoint answered with a non-success status.
    #[error("oauth error ({status}): {message}")]
    OAuth {
        /// HTTP status code from the token endpoint.
        status: u16,
        /// Response body, verbatim.
        message: String,
    },

    /// Transport-level failure talking to the token endpoint.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// No token pair is stored.
    #[error("no tokens available")]
    NoTokens,
}
