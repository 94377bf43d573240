//! OAuth token types.

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A stored OAuth token pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch milliseconds when the access token expires.
    pub expires_at: i64,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl OAuthTokens {
    /// Whether the access token is inside the refresh margin of its expiry.
    pub fn needs_refresh(&self, now: i64, margin_ms: i64) -> bool {
        now + margin_ms >= self.expires_at
    }
}

/// Settings for the token endpoint.
#[derive(Clone, Debug)]
pub struct OAuthConfig {
    /// Token endpoint URL (grant_type=refresh_token POSTs go here).
    pub token_url: String,
    pub client_id: String,
    /// How close to expiry a token may get before a refresh is forced.
    pub refresh_margin_ms: i64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            token_url: "https://console.anthropic.com/v1/oauth/token".to_string(),
            client_id: String::new(),
            refresh_margin_ms: 10 * 60 * 1000,
        }
    }
}

/// Compute `expires_at` from a token endpoint's `expires_in` seconds.
pub fn calculate_expires_at(expires_in_secs: i64) -> i64 {
    now_ms() + expires_in_secs * 1000
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
