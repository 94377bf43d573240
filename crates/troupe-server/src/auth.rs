//! API-key authentication for the `/api/*` surface.
//!
//! The configured value is the hex SHA-256 of the team key; the presented
//! key is hashed and compared in constant time, so the plaintext key never
//! sits in config or logs.

use axum::http::HeaderMap;

use troupe_auth::secrets::{constant_time_eq, sha256_hex};

/// Check the request's API key against the configured hash.
///
/// Accepts `x-api-key: <key>` or `authorization: Bearer <key>`. An empty
/// configured hash rejects everything (locked by default).
pub fn api_key_ok(headers: &HeaderMap, expected_hash: &str) -> bool {
    if expected_hash.is_empty() {
        return false;
    }
    let Some(presented) = presented_key(headers) else {
        return false;
    };
    let hash = sha256_hex(&presented);
    constant_time_eq(hash.as_bytes(), expected_hash.as_bytes())
}

fn presented_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(value.to_string());
    }
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn x_api_key_header_accepted() {
        let expected = sha256_hex("team-key");
        let headers = headers_with("x-api-key", "team-key");
        assert!(api_key_ok(&headers, &expected));
    }

    #[test]
    fn bearer_header_accepted() {
        let expected = sha256_hex("team-key");
        let headers = headers_with("authorization", "Bearer team-key");
        assert!(api_key_ok(&headers, &expected));
    }

    #[test]
    fn wrong_key_rejected() {
        let expected = sha256_hex("team-key");
        let headers = headers_with("x-api-key", "other-key");
        assert!(!api_key_ok(&headers, &expected));
    }

    #[test]
    fn missing_header_rejected() {
        let expected = sha256_hex("team-key");
        assert!(!api_key_ok(&HeaderMap::new(), &expected));
    }

    #[test]
    fn empty_configured_hash_rejects_everything() {
        let headers = headers_with("x-api-key", "anything");
        assert!(!api_key_ok(&headers, ""));
    }

    #[test]
    fn non_bearer_authorization_rejected() {
        let expected = sha256_hex("team-key");
        let headers = headers_with("authorization", "Basic dXNlcg==");
        assert!(!api_key_ok(&headers, &expected));
    }
}
