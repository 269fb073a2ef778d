//! Challenge-based authentication.
//!
//! The anchor proves account control with a non-submittable transaction:
//! sequence number zero, a short validity window, and two manage-data
//! operations binding the domain and a single-use nonce. The client signs
//! the envelope and sends it back; verification checks the structure, burns
//! the nonce, and weighs the signatures against the account's medium
//! threshold before minting a session token.

use chrono::{Duration, Utc};
use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};
use std::collections::HashSet;
use std::sync::Arc;

use crate::account::AccountFetcher;
use crate::anchor::jwt::{Claims, TokenMinter, TokenVerifier};
use crate::crypto;
use crate::errors::{AnchorError, ErrorCode, Result};
use crate::signer::TransactionSigner;
use crate::store::NonceStore;
use crate::strkey;
use crate::xdr::{
    AccountId, ManageDataOp, Operation, Preconditions, TimeBounds, Transaction,
    TransactionEnvelope, XdrError,
};

const CHALLENGE_NONCE_LENGTH: usize = 48;
const CHALLENGE_TTL_SECS: i64 = 300;
const CHALLENGE_BASE_FEE: u32 = 100;
const WEB_AUTH_DOMAIN_KEY: &str = "web_auth_domain";
const AUTH_METHOD_WEB_AUTH: &str = "web_auth";

pub struct AuthConfig {
    pub domain: String,
    pub network_passphrase: String,
    /// Challenge validity window in seconds.
    pub challenge_ttl_secs: i64,
    /// Fee stamped on the (non-submittable) challenge envelope.
    pub base_fee: u32,
    /// Raw entropy bytes behind each nonce.
    pub nonce_length: usize,
    pub signer: Arc<dyn TransactionSigner>,
    pub nonce_store: Arc<dyn NonceStore>,
    pub token_minter: Arc<dyn TokenMinter>,
    pub token_verifier: Arc<dyn TokenVerifier>,
    /// Enables multisig support; without it, verification accepts the
    /// master key only.
    pub account_fetcher: Option<Arc<dyn AccountFetcher>>,
}

impl AuthConfig {
    pub fn new(
        domain: impl Into<String>,
        network_passphrase: impl Into<String>,
        signer: Arc<dyn TransactionSigner>,
        nonce_store: Arc<dyn NonceStore>,
        token_minter: Arc<dyn TokenMinter>,
        token_verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        Self {
            domain: domain.into(),
            network_passphrase: network_passphrase.into(),
            challenge_ttl_secs: CHALLENGE_TTL_SECS,
            base_fee: CHALLENGE_BASE_FEE,
            nonce_length: CHALLENGE_NONCE_LENGTH,
            signer,
            nonce_store,
            token_minter,
            token_verifier,
            account_fetcher: None,
        }
    }

    pub fn with_account_fetcher(mut self, fetcher: Arc<dyn AccountFetcher>) -> Self {
        self.account_fetcher = Some(fetcher);
        self
    }
}

pub struct AuthIssuer {
    config: AuthConfig,
}

impl std::fmt::Debug for AuthIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthIssuer").finish_non_exhaustive()
    }
}

impl AuthIssuer {
    pub fn new(config: AuthConfig) -> Result<Self> {
        if config.domain.trim().is_empty() {
            return Err(AnchorError::anchor(
                ErrorCode::ConfigInvalid,
                "domain is required",
            ));
        }
        if config.network_passphrase.trim().is_empty() {
            return Err(AnchorError::anchor(
                ErrorCode::ConfigInvalid,
                "network passphrase is required",
            ));
        }
        if config.challenge_ttl_secs <= 0 {
            return Err(AnchorError::anchor(
                ErrorCode::ConfigInvalid,
                "challenge ttl must be positive",
            ));
        }
        Ok(Self { config })
    }

    pub fn token_verifier(&self) -> Arc<dyn TokenVerifier> {
        self.config.token_verifier.clone()
    }

    fn auth_data_key(&self) -> String {
        format!("{} auth", self.config.domain)
    }

    /// Build and sign a challenge transaction for the given account.
    pub async fn create_challenge(&self, account: &str) -> Result<String> {
        let account = account.trim();
        if account.is_empty() {
            return Err(AnchorError::anchor(
                ErrorCode::ChallengeBuildFailed,
                "account is required",
            ));
        }
        let subject_key = strkey::decode_public_key(account).map_err(|e| {
            AnchorError::anchor(ErrorCode::ChallengeBuildFailed, "invalid account address")
                .with_cause(e)
        })?;

        let nonce = crypto::generate_nonce(self.config.nonce_length)?;
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.config.challenge_ttl_secs);
        self.config
            .nonce_store
            .add(&nonce, expires_at)
            .await
            .map_err(|e| {
                AnchorError::anchor(ErrorCode::ChallengeBuildFailed, "failed to store nonce")
                    .with_cause(e)
            })?;

        let server_account = self.config.signer.public_key();
        let server_key = strkey::decode_public_key(&server_account).map_err(|e| {
            AnchorError::anchor(
                ErrorCode::ChallengeBuildFailed,
                "invalid server signing key",
            )
            .with_cause(e)
        })?;

        let tx = Transaction {
            source_account: AccountId(server_key),
            fee: self.config.base_fee,
            // Sequence zero keeps the envelope non-submittable.
            seq_num: 0,
            cond: Preconditions::Time(TimeBounds {
                min_time: now.timestamp() as u64,
                max_time: expires_at.timestamp() as u64,
            }),
            operations: vec![
                Operation {
                    source_account: Some(AccountId(subject_key)),
                    body: ManageDataOp {
                        name: self.auth_data_key(),
                        value: Some(nonce.into_bytes()),
                    },
                },
                Operation {
                    source_account: Some(AccountId(server_key)),
                    body: ManageDataOp {
                        name: WEB_AUTH_DOMAIN_KEY.to_string(),
                        value: Some(self.config.domain.clone().into_bytes()),
                    },
                },
            ],
        };

        let envelope = TransactionEnvelope::new(tx);
        self.config
            .signer
            .sign_transaction(&envelope.to_base64(), &self.config.network_passphrase)
            .await
            .map_err(|e| {
                AnchorError::anchor(
                    ErrorCode::ChallengeBuildFailed,
                    "failed to sign challenge transaction",
                )
                .with_cause(e)
            })
    }

    /// Verify a signed challenge and mint a session token.
    pub async fn verify_challenge(&self, challenge_xdr: &str) -> Result<String> {
        let challenge_xdr = challenge_xdr.trim();
        if challenge_xdr.is_empty() {
            return Err(verify_failed("challenge XDR is required"));
        }

        let envelope = match TransactionEnvelope::from_base64(challenge_xdr) {
            Ok(envelope) => envelope,
            Err(XdrError::FeeBumpEnvelope) => {
                return Err(verify_failed("challenge transaction must not be fee bump"))
            }
            Err(e) => {
                return Err(verify_failed("failed to parse challenge transaction").with_cause(e))
            }
        };

        let operations = &envelope.tx.operations;
        if operations.len() < 2 {
            return Err(verify_failed(
                "challenge transaction must have at least two operations",
            ));
        }

        let first_op = &operations[0];
        if first_op.body.name != self.auth_data_key() {
            return Err(verify_failed("invalid challenge operation name"));
        }
        let nonce_bytes = match &first_op.body.value {
            Some(value) if !value.is_empty() => value.clone(),
            _ => return Err(verify_failed("challenge nonce missing")),
        };

        let second_op = &operations[1];
        if second_op.body.name != WEB_AUTH_DOMAIN_KEY {
            return Err(verify_failed("web_auth_domain operation missing"));
        }
        if second_op.body.value.as_deref() != Some(self.config.domain.as_bytes()) {
            return Err(verify_failed("web_auth_domain value mismatch"));
        }

        let server_account = self.config.signer.public_key();
        let server_key = strkey::decode_public_key(&server_account)
            .map_err(|e| verify_failed("invalid server public key").with_cause(e))?;
        if envelope.tx.source_account != AccountId(server_key) {
            return Err(verify_failed(
                "challenge transaction source account must be the server signing key",
            ));
        }

        let subject_key = match first_op.source_account {
            Some(AccountId(key)) => key,
            None => {
                return Err(verify_failed(
                    "first operation missing source account (client account)",
                ))
            }
        };
        let subject = strkey::encode_public_key(&subject_key);

        let nonce = String::from_utf8(nonce_bytes)
            .map_err(|e| verify_failed("challenge nonce is not valid UTF-8").with_cause(e))?;
        let consumed = self
            .config
            .nonce_store
            .consume(&nonce)
            .await
            .map_err(|e| verify_failed("failed to consume nonce").with_cause(e))?;
        if !consumed {
            return Err(verify_failed("nonce already used or expired"));
        }

        self.verify_challenge_signatures(&envelope, &server_key, &subject_key, &subject)
            .await?;

        let claims = Claims {
            sub: subject,
            iss: self.config.domain.clone(),
            iat: 0,
            exp: 0,
            auth_method: AUTH_METHOD_WEB_AUTH.to_string(),
            memo: None,
        };
        self.config
            .token_minter
            .mint(claims)
            .await
            .map_err(|e| verify_failed("failed to issue session token").with_cause(e))
    }

    /// Weigh the envelope's signatures: exactly one valid server signature
    /// plus client signatures summing to at least the medium threshold.
    async fn verify_challenge_signatures(
        &self,
        envelope: &TransactionEnvelope,
        server_key: &[u8; 32],
        subject_key: &[u8; 32],
        subject: &str,
    ) -> Result<()> {
        if envelope.signatures.is_empty() {
            return Err(verify_failed("challenge transaction has no signatures"));
        }

        let server_vk = VerifyingKey::from_bytes(server_key)
            .map_err(|e| verify_failed("invalid server public key").with_cause(e))?;

        let (client_signers, threshold) = self.resolve_client_signers(subject_key, subject).await?;

        let hash = envelope.tx.hash(&self.config.network_passphrase);

        let mut server_signed = false;
        let mut total_weight: u32 = 0;
        let mut seen_hints: HashSet<[u8; 4]> = HashSet::new();

        for decorated in &envelope.signatures {
            if !seen_hints.insert(decorated.hint) {
                return Err(verify_failed("duplicate signature detected"));
            }

            let signature = Signature::from_slice(&decorated.signature)
                .map_err(|_| verify_failed("transaction has unrecognized signatures"))?;

            if server_vk.verify(&hash, &signature).is_ok() {
                server_signed = true;
                continue;
            }

            let matched = client_signers.iter().find_map(|(vk, weight)| {
                vk.verify(&hash, &signature).is_ok().then_some(*weight)
            });
            match matched {
                Some(weight) => total_weight += weight,
                None => return Err(verify_failed("transaction has unrecognized signatures")),
            }
        }

        if !server_signed {
            return Err(verify_failed("challenge transaction not signed by server"));
        }
        if total_weight < threshold {
            return Err(verify_failed("challenge transaction not signed by client"));
        }
        // Unfunded accounts verify with threshold 0, but still need at
        // least one client signature.
        if threshold == 0 && total_weight == 0 {
            return Err(verify_failed("challenge transaction not signed by client"));
        }
        Ok(())
    }

    /// Resolve the subject's signer set and medium threshold.
    ///
    /// An account fetcher reporting "not found" means the account is
    /// unfunded: fall back to the master key with weight 1 and threshold 0.
    /// Other fetch failures abort verification rather than silently
    /// downgrading a multisig account.
    async fn resolve_client_signers(
        &self,
        subject_key: &[u8; 32],
        subject: &str,
    ) -> Result<(Vec<(VerifyingKey, u32)>, u32)> {
        let master = || -> Result<Vec<(VerifyingKey, u32)>> {
            let vk = VerifyingKey::from_bytes(subject_key)
                .map_err(|e| verify_failed("invalid account address").with_cause(e))?;
            Ok(vec![(vk, 1)])
        };

        let fetcher = match &self.config.account_fetcher {
            Some(fetcher) => fetcher,
            None => return Ok((master()?, 0)),
        };

        match fetcher.fetch_signers(subject).await {
            Ok((signers, thresholds)) => {
                let mut resolved = Vec::with_capacity(signers.len());
                for signer in signers {
                    // Skip malformed or non-ed25519 signer entries
                    let Ok(key) = strkey::decode_public_key(&signer.key) else {
                        continue;
                    };
                    let Ok(vk) = VerifyingKey::from_bytes(&key) else {
                        continue;
                    };
                    resolved.push((vk, signer.weight));
                }
                Ok((resolved, thresholds.medium))
            }
            Err(e) if e.is_code(ErrorCode::AccountNotFound) => Ok((master()?, 0)),
            Err(e) => {
                Err(verify_failed("failed to fetch account signers")
                    .with_cause(e)
                    .with_context("account", subject))
            }
        }
    }
}

fn verify_failed(message: &str) -> AnchorError {
    AnchorError::anchor(ErrorCode::ChallengeVerifyFailed, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::jwt::HmacJwt;
    use crate::signer::KeypairSigner;
    use crate::store::memory::MemoryNonceStore;

    fn issuer_with(signer: Arc<KeypairSigner>) -> AuthIssuer {
        let authority = Arc::new(HmacJwt::new(
            b"test-secret-test-secret-test-secret",
            "example.com",
            std::time::Duration::from_secs(3600),
        ));
        let config = AuthConfig::new(
            "example.com",
            "Test SDF Network ; September 2015",
            signer,
            Arc::new(MemoryNonceStore::new()),
            authority.clone(),
            authority,
        );
        AuthIssuer::new(config).unwrap()
    }

    #[test]
    fn test_config_validation() {
        let signer = Arc::new(KeypairSigner::random());
        let authority = Arc::new(HmacJwt::new(b"s", "d", std::time::Duration::from_secs(1)));
        let config = AuthConfig::new(
            "",
            "net",
            signer,
            Arc::new(MemoryNonceStore::new()),
            authority.clone(),
            authority,
        );
        let err = AuthIssuer::new(config).unwrap_err();
        assert!(err.is_code(ErrorCode::ConfigInvalid));
    }

    #[tokio::test]
    async fn test_create_challenge_shape() {
        let signer = Arc::new(KeypairSigner::random());
        let issuer = issuer_with(signer.clone());
        let subject = KeypairSigner::random();

        let xdr = issuer.create_challenge(&subject.public_key()).await.unwrap();
        let envelope = TransactionEnvelope::from_base64(&xdr).unwrap();

        assert_eq!(envelope.tx.seq_num, 0);
        assert_eq!(envelope.tx.fee, CHALLENGE_BASE_FEE);
        assert_eq!(envelope.tx.operations.len(), 2);
        assert_eq!(envelope.tx.operations[0].body.name, "example.com auth");
        assert_eq!(
            envelope.tx.operations[1].body.name,
            WEB_AUTH_DOMAIN_KEY
        );
        assert_eq!(
            envelope.tx.operations[1].body.value.as_deref(),
            Some(b"example.com".as_ref())
        );
        // Server-signed exactly once at issuance
        assert_eq!(envelope.signatures.len(), 1);

        match envelope.tx.cond {
            Preconditions::Time(tb) => {
                assert_eq!(tb.max_time - tb.min_time, CHALLENGE_TTL_SECS as u64)
            }
            other => panic!("expected timebounds, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_challenge_rejects_bad_address() {
        let issuer = issuer_with(Arc::new(KeypairSigner::random()));
        let err = issuer.create_challenge("not-an-address").await.unwrap_err();
        assert!(err.is_code(ErrorCode::ChallengeBuildFailed));
        let err = issuer.create_challenge("  ").await.unwrap_err();
        assert!(err.is_code(ErrorCode::ChallengeBuildFailed));
    }

    #[tokio::test]
    async fn test_verify_rejects_garbage() {
        let issuer = issuer_with(Arc::new(KeypairSigner::random()));
        let err = issuer.verify_challenge("").await.unwrap_err();
        assert!(err.is_code(ErrorCode::ChallengeVerifyFailed));
        let err = issuer.verify_challenge("@@@not-base64@@@").await.unwrap_err();
        assert!(err.is_code(ErrorCode::ChallengeVerifyFailed));
    }
}
