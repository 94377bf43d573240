//! Server configuration with environment overrides.
//!
//! Defaults are compiled in; every knob can be overridden by a `TROUPE_*`
//! environment variable. Secrets (master key, worker token, API key hash,
//! static bearer token) are env-only and never read from files.

use serde::{Deserialize, Serialize};

/// Configuration for the orchestrator server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// SQLite database path; `":memory:"` keeps everything in-process.
    pub db_path: String,
    /// Heartbeat send interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Silence threshold in seconds before a worker is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Seconds a connecting worker has to send `hello`.
    pub hello_deadline_secs: u64,
    /// Grace period announced in shutdown frames, in seconds.
    pub shutdown_grace_secs: u64,
    /// Minimum log level when `RUST_LOG` is unset.
    pub log_level: String,

    /// Shared secret workers present in the connection query string.
    #[serde(skip_serializing)]
    pub worker_token: String,
    /// Operator secret the credential master key is derived from.
    #[serde(skip_serializing)]
    pub master_key_secret: String,
    /// Hex SHA-256 of the team API key guarding `/api/*`.
    #[serde(skip_serializing)]
    pub api_key_hash: String,
    /// Static bearer token used when no OAuth pair is configured.
    #[serde(skip_serializing)]
    pub static_token: Option<String>,
    /// OAuth pair for the token provider, when configured.
    #[serde(skip_serializing)]
    pub oauth_access_token: Option<String>,
    #[serde(skip_serializing)]
    pub oauth_refresh_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 0,
            db_path: "troupe.db".into(),
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            hello_deadline_secs: 10,
            shutdown_grace_secs: 5,
            log_level: "info".into(),
            worker_token: String::new(),
            master_key_secret: String::new(),
            api_key_hash: String::new(),
            static_token: None,
            oauth_access_token: None,
            oauth_refresh_token: None,
        }
    }
}

impl ServerConfig {
    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply `TROUPE_*` environment variables over the current values.
    ///
    /// Integers are range-checked; invalid values fall back silently to
    /// the compiled defaults.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = read_env_string("TROUPE_HOST") {
            self.host = v;
        }
        if let Some(v) = read_env_u16("TROUPE_PORT", 0, 65535) {
            self.port = v;
        }
        if let Some(v) = read_env_string("TROUPE_DB_PATH") {
            self.db_path = v;
        }
        if let Some(v) = read_env_u64("TROUPE_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
            self.heartbeat_interval_secs = v;
        }
        if let Some(v) = read_env_u64("TROUPE_HEARTBEAT_TIMEOUT_SECS", 1, 86_400) {
            self.heartbeat_timeout_secs = v;
        }
        if let Some(v) = read_env_u64("TROUPE_HELLO_DEADLINE_SECS", 1, 600) {
            self.hello_deadline_secs = v;
        }
        if let Some(v) = read_env_u64("TROUPE_SHUTDOWN_GRACE_SECS", 0, 600) {
            self.shutdown_grace_secs = v;
        }
        if let Some(v) = read_env_string("TROUPE_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = read_env_string("TROUPE_WORKER_TOKEN") {
            self.worker_token = v;
        }
        if let Some(v) = read_env_string("TROUPE_MASTER_KEY") {
            self.master_key_secret = v;
        }
        if let Some(v) = read_env_string("TROUPE_API_KEY_HASH") {
            self.api_key_hash = v;
        }
        if let Some(v) = read_env_string("TROUPE_STATIC_TOKEN") {
            self.static_token = Some(v);
        }
        if let Some(v) = read_env_string("TROUPE_OAUTH_ACCESS_TOKEN") {
            self.oauth_access_token = Some(v);
        }
        if let Some(v) = read_env_string("TROUPE_OAUTH_REFRESH_TOKEN") {
            self.oauth_refresh_token = Some(v);
        }
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    read_env_string(name)?
        .parse()
        .ok()
        .filter(|v| (min..=max).contains(v))
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    read_env_string(name)?
        .parse()
        .ok()
        .filter(|v| (min..=max).contains(v))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
