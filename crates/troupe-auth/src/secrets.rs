//! Credential sealing with AES-256-GCM under the operator's master key.
//!
//! A sealed credential is three base64 strings: ciphertext, a 12-byte IV,
//! and the 16-byte authentication tag, matching how the credential table
//! stores them. The master key is derived from the operator's secret with
//! SHA-256 and lives only in process memory.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Errors from sealing and opening credentials.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("invalid encoding")]
    InvalidEncoding,
    #[error("invalid UTF-8")]
    InvalidUtf8,
}

/// An encrypted credential payload as persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedSecret {
    /// Base64 ciphertext (without the tag).
    pub ciphertext: String,
    /// Base64 12-byte IV.
    pub iv: String,
    /// Base64 16-byte authentication tag.
    pub auth_tag: String,
}

/// Derive the 256-bit master key from the operator's secret string.
pub fn derive_master_key(secret: &str) -> [u8; 32] {
    let digest = Sha256::digest(secret.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

/// Seal a plaintext under the master key with a random IV.
pub fn seal(plaintext: &str, key: &[u8; 32]) -> Result<SealedSecret, SecretError> {
    let cipher = Aes256Gcm::new(key.into());
    let mut iv = [0u8; IV_LEN];
    aes_gcm::aead::rand_core::RngCore::fill_bytes(&mut OsRng, &mut iv);
    let nonce = Nonce::from_slice(&iv);

    // The AEAD API appends the tag to the ciphertext; split it back out.
    let mut combined = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| SecretError::EncryptionFailed)?;
    let tag = combined.split_off(combined.len() - TAG_LEN);

    Ok(SealedSecret {
        ciphertext: B64.encode(&combined),
        iv: B64.encode(iv),
        auth_tag: B64.encode(&tag),
    })
}

/// Open a sealed credential. Fails on any tampering of ciphertext, IV or tag.
pub fn open(sealed: &SealedSecret, key: &[u8; 32]) -> Result<String, SecretError> {
    let ciphertext = B64
        .decode(&sealed.ciphertext)
        .map_err(|_| SecretError::InvalidEncoding)?;
    let iv = B64
        .decode(&sealed.iv)
        .map_err(|_| SecretError::InvalidEncoding)?;
    let tag = B64
        .decode(&sealed.auth_tag)
        .map_err(|_| SecretError::InvalidEncoding)?;
    if iv.len() != IV_LEN || tag.len() != TAG_LEN {
        return Err(SecretError::InvalidEncoding);
    }

    let mut combined = ciphertext;
    combined.extend_from_slice(&tag);

    let cipher = Aes256Gcm::new(key.into());
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), combined.as_ref())
        .map_err(|_| SecretError::DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|_| SecretError::InvalidUtf8)
}

/// Hex SHA-256, used for the team API-key hash comparison.
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Constant-time comparison for auth validation.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 32] {
        derive_master_key("operator-secret")
    }

    #[test]
    fn seal_open_roundtrip() {
        let sealed = seal(r#"{"token":"glpat-123"}"#, &key()).unwrap();
        let opened = open(&sealed, &key()).unwrap();
        assert_eq!(opened, r#"{"token":"glpat-123"}"#);
    }

    #[test]
    fn random_ivs_differ() {
        let a = seal("same", &key()).unwrap();
        let b = seal("same", &key()).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_eq!(open(&a, &key()).unwrap(), open(&b, &key()).unwrap());
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal("secret", &key()).unwrap();
        let other = derive_master_key("different-secret");
        assert!(matches!(
            open(&sealed, &other),
            Err(SecretError::DecryptionFailed)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let mut sealed = seal("secret", &key()).unwrap();
        let mut bytes = B64.decode(&sealed.ciphertext).unwrap();
        if let Some(b) = bytes.first_mut() {
            *b ^= 0x01;
        }
        sealed.ciphertext = B64.encode(&bytes);
        assert!(open(&sealed, &key()).is_err());
    }

    #[test]
    fn tampered_tag_fails() {
        let mut sealed = seal("secret", &key()).unwrap();
        let mut tag = B64.decode(&sealed.auth_tag).unwrap();
        tag[0] ^= 0x01;
        sealed.auth_tag = B64.encode(&tag);
        assert!(matches!(
            open(&sealed, &key()),
            Err(SecretError::DecryptionFailed)
        ));
    }

    #[test]
    fn garbage_base64_is_invalid_encoding() {
        let sealed = SealedSecret {
            ciphertext: "!!not-base64!!".into(),
            iv: "AAAA".into(),
            auth_tag: "AAAA".into(),
        };
        assert!(matches!(
            open(&sealed, &key()),
            Err(SecretError::InvalidEncoding)
        ));
    }

    #[test]
    fn short_iv_is_invalid_encoding() {
        let good = seal("x", &key()).unwrap();
        let sealed = SealedSecret {
            iv: B64.encode([0u8; 4]),
            ..good
        };
        assert!(matches!(
            open(&sealed, &key()),
            Err(SecretError::InvalidEncoding)
        ));
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let sealed = seal("", &key()).unwrap();
        assert_eq!(open(&sealed, &key()).unwrap(), "");
    }

    #[test]
    fn derive_is_deterministic() {
        assert_eq!(derive_master_key("a"), derive_master_key("a"));
        assert_ne!(derive_master_key("a"), derive_master_key("b"));
    }

    #[test]
    fn sha256_hex_known_vector() {
        // sha256("abc")
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn constant_time_eq_works() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
    }
}
