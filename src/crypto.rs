//! Random material and hashing helpers shared by the auth components.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::errors::{AnchorError, ErrorCode, Result};

/// Generate a cryptographically secure random nonce, base64-encoded.
///
/// `length` is the number of random bytes. Challenge nonces use 48 bytes,
/// which encodes to 64 characters.
pub fn generate_nonce(length: usize) -> Result<String> {
    let bytes = random_bytes(length)?;
    Ok(STANDARD.encode(bytes))
}

/// Generate a random opaque token in URL-safe base64 (no padding).
///
/// Used for transfer ids and interactive session tokens, both of which end
/// up in URLs and payment memos.
pub fn generate_url_token(length: usize) -> Result<String> {
    let bytes = random_bytes(length)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn random_bytes(length: usize) -> Result<Vec<u8>> {
    if length == 0 {
        return Err(AnchorError::anchor(
            ErrorCode::ChallengeBuildFailed,
            "random length must be positive",
        ));
    }
    let mut bytes = vec![0u8; length];
    OsRng.fill_bytes(&mut bytes);
    Ok(bytes)
}

/// SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_length() {
        // 48 raw bytes -> 64 base64 characters
        let nonce = generate_nonce(48).unwrap();
        assert_eq!(nonce.len(), 64);
    }

    #[test]
    fn test_nonce_uniqueness() {
        let a = generate_nonce(48).unwrap();
        let b = generate_nonce(48).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(generate_nonce(0).is_err());
        assert!(generate_url_token(0).is_err());
    }

    #[test]
    fn test_url_token_is_url_safe() {
        let token = generate_url_token(32).unwrap();
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
        assert!(!token.contains('='));
    }

    #[test]
    fn test_sha256_known_vector() {
        let digest = sha256(b"abc");
        assert_eq!(
            digest[..4],
            [0xba, 0x78, 0x16, 0xbf],
            "SHA-256(\"abc\") prefix mismatch"
        );
    }
}
