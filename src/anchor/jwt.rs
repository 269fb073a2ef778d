//! Session tokens.
//!
//! After a challenge verifies, the anchor hands the client a bearer token:
//! a standard three-segment HS256 JWT with claims
//! `{sub, iss, iat, exp, auth_method, memo?}`. [`HmacJwt`] is the default
//! symmetric authority implementing both the minting and verifying seams.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{AnchorError, ErrorCode, Result};

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: ledger address (G...)
    pub sub: String,
    /// Issuer: anchor domain
    pub iss: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expires (Unix timestamp)
    pub exp: i64,
    /// How the session was authenticated ("web_auth")
    pub auth_method: String,
    /// Optional memo from the auth challenge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

/// Mints session tokens after successful challenge verification.
///
/// The authority owns `iss`, `iat`, and `exp`: whatever the caller puts in
/// those fields is overwritten from the authority's issuer and clock.
#[async_trait]
pub trait TokenMinter: Send + Sync {
    async fn mint(&self, claims: Claims) -> Result<String>;
}

/// Validates and decodes session tokens.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Claims>;
}

/// HMAC-SHA256 token authority; one instance implements both seams.
pub struct HmacJwt {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl HmacJwt {
    pub fn new(secret: &[u8], issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            ttl,
        }
    }
}

#[async_trait]
impl TokenMinter for HmacJwt {
    async fn mint(&self, claims: Claims) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
            ..claims
        };
        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            AnchorError::anchor(ErrorCode::TokenIssueFailed, "failed to encode token").with_cause(e)
        })
    }
}

#[async_trait]
impl TokenVerifier for HmacJwt {
    async fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry and issuer are checked below so their failures keep
        // distinct error codes.
        validation.validate_exp = false;

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            AnchorError::anchor(ErrorCode::TokenVerifyFailed, "invalid token").with_cause(e)
        })?;

        let now = Utc::now().timestamp();
        if now >= data.claims.exp {
            return Err(AnchorError::anchor(
                ErrorCode::TokenExpired,
                format!("token expired at {} (now: {})", data.claims.exp, now),
            ));
        }
        if data.claims.iss != self.issuer {
            return Err(AnchorError::anchor(
                ErrorCode::TokenVerifyFailed,
                format!(
                    "invalid issuer: expected {}, got {}",
                    self.issuer, data.claims.iss
                ),
            ));
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"a_very_long_test_secret_suitable_for_hs256_signing";

    fn subject_claims(memo: Option<&str>) -> Claims {
        Claims {
            sub: "GSUBJECT".to_string(),
            iss: String::new(),
            iat: 0,
            exp: 0,
            auth_method: "web_auth".to_string(),
            memo: memo.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_mint_verify_roundtrip() {
        let authority = HmacJwt::new(SECRET, "example.com", Duration::from_secs(3600));
        let token = authority.mint(subject_claims(None)).await.unwrap();
        assert_eq!(token.split('.').count(), 3);

        let claims = authority.verify(&token).await.unwrap();
        assert_eq!(claims.sub, "GSUBJECT");
        assert_eq!(claims.iss, "example.com");
        assert_eq!(claims.auth_method, "web_auth");
        assert_eq!(claims.memo, None);
        assert_eq!(claims.exp, claims.iat + 3600);
    }

    #[tokio::test]
    async fn test_memo_survives_roundtrip() {
        let authority = HmacJwt::new(SECRET, "example.com", Duration::from_secs(60));
        let token = authority.mint(subject_claims(Some("m-42"))).await.unwrap();
        let claims = authority.verify(&token).await.unwrap();
        assert_eq!(claims.memo.as_deref(), Some("m-42"));
    }

    #[tokio::test]
    async fn test_zero_ttl_token_is_already_expired() {
        // exp == iat == now, and verification fails at now >= exp
        let authority = HmacJwt::new(SECRET, "example.com", Duration::from_secs(0));
        let token = authority.mint(subject_claims(None)).await.unwrap();
        let err = authority.verify(&token).await.unwrap_err();
        assert!(err.is_code(ErrorCode::TokenExpired));
    }

    #[tokio::test]
    async fn test_wrong_issuer_rejected() {
        let minting = HmacJwt::new(SECRET, "evil.example", Duration::from_secs(60));
        let verifying = HmacJwt::new(SECRET, "example.com", Duration::from_secs(60));
        let token = minting.mint(subject_claims(None)).await.unwrap();
        let err = verifying.verify(&token).await.unwrap_err();
        assert!(err.is_code(ErrorCode::TokenVerifyFailed));
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let minting = HmacJwt::new(b"secret-a", "example.com", Duration::from_secs(60));
        let verifying = HmacJwt::new(b"secret-b", "example.com", Duration::from_secs(60));
        let token = minting.mint(subject_claims(None)).await.unwrap();
        let err = verifying.verify(&token).await.unwrap_err();
        assert!(err.is_code(ErrorCode::TokenVerifyFailed));
    }

    #[tokio::test]
    async fn test_tampered_payload_rejected() {
        let authority = HmacJwt::new(SECRET, "example.com", Duration::from_secs(60));
        let token = authority.mint(subject_claims(None)).await.unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = parts[1].to_string() + "xx";
        parts[1] = &forged;
        let err = authority.verify(&parts.join(".")).await.unwrap_err();
        assert!(err.is_code(ErrorCode::TokenVerifyFailed));
    }

    #[tokio::test]
    async fn test_garbage_token_rejected() {
        let authority = HmacJwt::new(SECRET, "example.com", Duration::from_secs(60));
        let err = authority.verify("not.a.token").await.unwrap_err();
        assert!(err.is_code(ErrorCode::TokenVerifyFailed));
    }
}
