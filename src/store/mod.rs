//! Persistence seams.
//!
//! The core never talks to a database: it calls these traits, and the
//! operator implements them against whatever storage they run. `memory`
//! holds the reference implementations used by tests and the demo server.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::models::{Transfer, TransferFilters, TransferUpdate};

/// Tracks challenge nonces for replay protection.
///
/// Nonces are added when a challenge is issued and consumed exactly once at
/// verification.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Record a nonce as issued. Adding an existing nonce is an error.
    async fn add(&self, nonce: &str, expires_at: DateTime<Utc>) -> Result<()>;

    /// Mark a nonce as used. Returns false if the nonce is unknown, already
    /// consumed, or expired.
    async fn consume(&self, nonce: &str) -> Result<bool>;
}

/// Persistence interface for transfer records.
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Persist a new transfer record.
    async fn save(&self, transfer: &Transfer) -> Result<()>;

    /// Retrieve a transfer by id.
    async fn find_by_id(&self, id: &str) -> Result<Transfer>;

    /// All transfers for a ledger account, newest first.
    async fn find_by_account(&self, account: &str) -> Result<Vec<Transfer>>;

    /// Apply a partial update; only `Some` fields are written.
    async fn update(&self, id: &str, update: &TransferUpdate) -> Result<()>;

    /// Transfers matching the given filters.
    async fn list(&self, filters: &TransferFilters) -> Result<Vec<Transfer>>;
}
