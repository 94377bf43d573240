//! The token provider — hands out a valid access token at dispatch time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::AuthError;
use crate::types::{calculate_expires_at, now_ms, OAuthConfig, OAuthTokens};

/// How often the background loop re-checks the stored tokens.
const KEEP_WARM_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Holds an optional OAuth token pair and refreshes it on demand.
///
/// `get_valid_access_token` is the only consumer-facing call: it returns the
/// stored access token, refreshing first when it is within the configured
/// margin of expiry, and `None` when nothing is stored or the refresh fails.
pub struct TokenProvider {
    config: OAuthConfig,
    tokens: Mutex<Option<OAuthTokens>>,
    http: reqwest::Client,
}

impl TokenProvider {
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            tokens: Mutex::new(None),
            http: reqwest::Client::new(),
        }
    }

    /// Create a provider pre-loaded with a token pair.
    pub fn with_tokens(config: OAuthConfig, tokens: OAuthTokens) -> Self {
        Self {
            config,
            tokens: Mutex::new(Some(tokens)),
            http: reqwest::Client::new(),
        }
    }

    /// Install a token pair (e.g. from the external authorization flow).
    pub async fn set_tokens(&self, tokens: OAuthTokens) {
        *self.tokens.lock().await = Some(tokens);
    }

    /// Whether a token pair is currently stored.
    pub async fn has_tokens(&self) -> bool {
        self.tokens.lock().await.is_some()
    }

    /// Return a valid access token, refreshing when near expiry.
    ///
    /// Returns `None` when no tokens are stored or the refresh fails; the
    /// caller decides whether to fall back to a static credential.
    pub async fn get_valid_access_token(&self) -> Option<String> {
        let mut guard = self.tokens.lock().await;
        let tokens = guard.as_ref()?;

        if !tokens.needs_refresh(now_ms(), self.config.refresh_margin_ms) {
            return Some(tokens.access_token.clone());
        }
        let refresh_token = tokens.refresh_token.clone();

        info!("access token near expiry, refreshing");
        match self.refresh(&refresh_token).await {
            Ok(fresh) => {
                let access = fresh.access_token.clone();
                *guard = Some(fresh);
                Some(access)
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed");
                None
            }
        }
    }

    /// POST `grant_type=refresh_token`; the refresh token rotates.
    async fn refresh(&self, refresh_token: &str) -> Result<OAuthTokens, AuthError> {
        let body = serde_json::json!({
            "grant_type": "refresh_token",
            "client_id": self.config.client_id,
            "refresh_token": refresh_token,
        });

        let resp = self
            .http
            .post(&self.config.token_url)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::OAuth {
                status,
                message: text,
            });
        }

        let data: TokenResponse = resp.json().await?;
        Ok(OAuthTokens {
            access_token: data.access_token,
            refresh_token: data.refresh_token,
            expires_at: calculate_expires_at(data.expires_in),
            scopes: Vec::new(),
        })
    }
}

/// Background loop that calls `get_valid_access_token` every 30 minutes so
/// a refresh never lands on the dispatch hot path. Runs until cancelled.
pub fn spawn_keep_warm(
    provider: Arc<TokenProvider>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(KEEP_WARM_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let _ = provider.get_valid_access_token().await;
                }
                () = cancel.cancelled() => return,
            }
        }
    })
}

/// Token endpoint response.
#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
