//! Signing capability abstraction.
//!
//! The core never holds key material: it is handed a [`TransactionSigner`]
//! and calls it. [`KeypairSigner`] is the local ed25519 implementation;
//! [`CallbackSigner`] delegates to an arbitrary async function for HSMs and
//! custodial signing services.

use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use futures_util::future::BoxFuture;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::errors::{AnchorError, ErrorCode, Result};
use crate::strkey;
use crate::xdr::{DecoratedSignature, TransactionEnvelope};

/// Opaque signing capability over base64 transaction envelopes.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// The `G...` address identifying this signer.
    fn public_key(&self) -> String;

    /// Sign a base64 envelope against the given network passphrase and
    /// return the signed envelope, again as base64.
    async fn sign_transaction(&self, envelope_xdr: &str, network_passphrase: &str)
        -> Result<String>;
}

/// Signature hint: the trailing four bytes of the signer's public key.
pub fn signature_hint(verifying_key: &VerifyingKey) -> [u8; 4] {
    let bytes = verifying_key.to_bytes();
    let mut hint = [0u8; 4];
    hint.copy_from_slice(&bytes[28..32]);
    hint
}

/// Local ed25519 signer.
#[derive(Debug)]
pub struct KeypairSigner {
    signing_key: SigningKey,
    public_key: String,
}

impl KeypairSigner {
    /// Build from an `S...` strkey secret seed.
    pub fn from_secret_seed(secret: &str) -> Result<Self> {
        let seed = strkey::decode_secret_seed(secret).map_err(|e| {
            AnchorError::anchor(ErrorCode::ConfigInvalid, "invalid secret seed").with_cause(e)
        })?;
        Ok(Self::from_seed_bytes(seed))
    }

    pub fn from_seed_bytes(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let public_key = strkey::encode_public_key(&signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            public_key,
        }
    }

    /// Fresh keypair from OS randomness.
    pub fn random() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed_bytes(seed)
    }

    pub fn secret_seed(&self) -> String {
        strkey::encode_secret_seed(&self.signing_key.to_bytes())
    }

    /// Sign an arbitrary message (the transaction hash).
    pub fn sign_raw(&self, message: &[u8]) -> DecoratedSignature {
        let signature = self.signing_key.sign(message);
        DecoratedSignature {
            hint: signature_hint(&self.signing_key.verifying_key()),
            signature: signature.to_bytes().to_vec(),
        }
    }
}

#[async_trait]
impl TransactionSigner for KeypairSigner {
    fn public_key(&self) -> String {
        self.public_key.clone()
    }

    async fn sign_transaction(
        &self,
        envelope_xdr: &str,
        network_passphrase: &str,
    ) -> Result<String> {
        let mut envelope = TransactionEnvelope::from_base64(envelope_xdr).map_err(|e| {
            AnchorError::anchor(ErrorCode::ChallengeBuildFailed, "failed to parse envelope")
                .with_cause(e)
        })?;
        let hash = envelope.tx.hash(network_passphrase);
        envelope.signatures.push(self.sign_raw(&hash));
        Ok(envelope.to_base64())
    }
}

type SignCallback =
    Box<dyn Fn(String, String) -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Signer that delegates to a caller-supplied async function.
///
/// Intended for wrapping external signing services; the callback receives
/// the base64 envelope and the network passphrase and must return the
/// signed envelope.
pub struct CallbackSigner {
    public_key: String,
    callback: SignCallback,
}

impl CallbackSigner {
    pub fn new<F>(public_key: impl Into<String>, callback: F) -> Self
    where
        F: Fn(String, String) -> BoxFuture<'static, Result<String>> + Send + Sync + 'static,
    {
        Self {
            public_key: public_key.into(),
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl TransactionSigner for CallbackSigner {
    fn public_key(&self) -> String {
        self.public_key.clone()
    }

    async fn sign_transaction(
        &self,
        envelope_xdr: &str,
        network_passphrase: &str,
    ) -> Result<String> {
        (self.callback)(envelope_xdr.to_string(), network_passphrase.to_string()).await
    }
}
