//! Interactive session-token registry.
//!
//! A session token is a one-shot capability binding a browser session to a
//! pending transfer: minted when an interactive transfer is created, peeked
//! while the user works through the flow, consumed exactly once when the
//! flow finishes. Bindings carry no TTL; the manager purges them when the
//! transfer completes.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::crypto;
use crate::errors::Result;

const DEFAULT_TOKEN_LENGTH: usize = 32;

pub struct SessionTokenRegistry {
    tokens: Mutex<HashMap<String, String>>,
    token_length: usize,
}

impl SessionTokenRegistry {
    pub fn new() -> Self {
        Self::with_token_length(DEFAULT_TOKEN_LENGTH)
    }

    pub fn with_token_length(token_length: usize) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            token_length,
        }
    }

    /// Mint a fresh token bound to the transfer id.
    pub fn mint(&self, transfer_id: &str) -> Result<String> {
        let token = crypto::generate_url_token(self.token_length)?;
        let mut tokens = self.tokens.lock().unwrap();
        tokens.insert(token.clone(), transfer_id.to_string());
        Ok(token)
    }

    /// Resolve a token without consuming it. Any number of peeks are
    /// allowed between mint and consume.
    pub fn peek(&self, token: &str) -> Option<String> {
        let tokens = self.tokens.lock().unwrap();
        tokens.get(token).cloned()
    }

    /// Atomically resolve and delete a token. Only the first consume
    /// succeeds.
    pub fn consume(&self, token: &str) -> Option<String> {
        let mut tokens = self.tokens.lock().unwrap();
        tokens.remove(token)
    }

    /// Drop any binding for the transfer, e.g. once it completes.
    pub fn purge_transfer(&self, transfer_id: &str) {
        let mut tokens = self.tokens.lock().unwrap();
        tokens.retain(|_, id| id != transfer_id);
    }
}

impl Default for SessionTokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}
