//! In-memory reference stores.
//!
//! Map-backed implementations of the persistence seams, suitable for tests,
//! examples, and small anchors that do not need durable storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use crate::errors::{AnchorError, ErrorCode, Result};
use crate::models::{Transfer, TransferFilters, TransferUpdate};
use crate::store::{NonceStore, TransferStore};

#[derive(Debug, Clone, Copy)]
struct NonceEntry {
    expires_at: DateTime<Utc>,
    consumed: bool,
}

/// Why a nonce consumption was rejected, and how many expired entries the
/// lazy sweep reaped along the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceConsume {
    Consumed { reaped: usize },
    Unknown,
    AlreadyConsumed,
    Expired,
}

/// Single-use challenge nonce registry.
///
/// No background reaper: expired entries are swept lazily on every consume,
/// so memory stays bounded by issuance rate times TTL.
pub struct MemoryNonceStore {
    nonces: Mutex<HashMap<String, NonceEntry>>,
}

impl MemoryNonceStore {
    pub fn new() -> Self {
        Self {
            nonces: Mutex::new(HashMap::new()),
        }
    }

    /// Consume with the full outcome. The trait's boolean view is derived
    /// from this.
    pub fn consume_entry(&self, nonce: &str) -> NonceConsume {
        let mut nonces = self.nonces.lock().unwrap();
        let now = Utc::now();
        let requested_expired = nonces
            .get(nonce)
            .map(|entry| now > entry.expires_at)
            .unwrap_or(false);

        // Lazy sweep: drop every expired entry, the requested one included.
        // The expiry boundary is strict: an entry is dead once now > expires_at.
        let before = nonces.len();
        nonces.retain(|_, entry| now <= entry.expires_at);
        let reaped = before - nonces.len();

        let entry = match nonces.get_mut(nonce) {
            Some(entry) => entry,
            None if requested_expired => return NonceConsume::Expired,
            None => return NonceConsume::Unknown,
        };
        if entry.consumed {
            return NonceConsume::AlreadyConsumed;
        }
        entry.consumed = true;
        NonceConsume::Consumed { reaped }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.nonces.lock().unwrap().len()
    }
}

impl Default for MemoryNonceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NonceStore for MemoryNonceStore {
    async fn add(&self, nonce: &str, expires_at: DateTime<Utc>) -> Result<()> {
        let mut nonces = self.nonces.lock().unwrap();
        if nonces.contains_key(nonce) {
            return Err(AnchorError::anchor(
                ErrorCode::StoreError,
                "nonce already exists",
            ));
        }
        nonces.insert(
            nonce.to_string(),
            NonceEntry {
                expires_at,
                consumed: false,
            },
        );
        Ok(())
    }

    async fn consume(&self, nonce: &str) -> Result<bool> {
        match self.consume_entry(nonce) {
            NonceConsume::Consumed { reaped } => {
                if reaped > 0 {
                    log::debug!("nonce sweep reaped {} expired entries", reaped);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// In-memory transfer store.
pub struct MemoryTransferStore {
    transfers: RwLock<HashMap<String, Transfer>>,
}

impl MemoryTransferStore {
    pub fn new() -> Self {
        Self {
            transfers: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryTransferStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransferStore for MemoryTransferStore {
    async fn save(&self, transfer: &Transfer) -> Result<()> {
        let mut transfers = self.transfers.write().unwrap();
        if transfers.contains_key(&transfer.id) {
            return Err(AnchorError::anchor(
                ErrorCode::StoreError,
                format!("transfer {} already exists", transfer.id),
            ));
        }
        transfers.insert(transfer.id.clone(), transfer.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Transfer> {
        let transfers = self.transfers.read().unwrap();
        transfers.get(id).cloned().ok_or_else(|| {
            AnchorError::anchor(ErrorCode::StoreError, format!("transfer {} not found", id))
        })
    }

    async fn find_by_account(&self, account: &str) -> Result<Vec<Transfer>> {
        let transfers = self.transfers.read().unwrap();
        let mut result: Vec<Transfer> = transfers
            .values()
            .filter(|t| t.account == account)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    async fn update(&self, id: &str, update: &TransferUpdate) -> Result<()> {
        let mut transfers = self.transfers.write().unwrap();
        let transfer = transfers.get_mut(id).ok_or_else(|| {
            AnchorError::anchor(ErrorCode::StoreError, format!("transfer {} not found", id))
        })?;

        if let Some(status) = update.status {
            transfer.status = status;
        }
        if let Some(amount) = &update.amount {
            transfer.amount = amount.clone();
        }
        if let Some(external_ref) = &update.external_ref {
            transfer.external_ref = external_ref.clone();
        }
        if let Some(tx_hash) = &update.stellar_tx_hash {
            transfer.stellar_tx_hash = tx_hash.clone();
        }
        if let Some(token) = &update.interactive_token {
            transfer.interactive_token = token.clone();
        }
        if let Some(url) = &update.interactive_url {
            transfer.interactive_url = url.clone();
        }
        if let Some(message) = &update.message {
            transfer.message = message.clone();
        }
        if let Some(metadata) = &update.metadata {
            transfer.metadata.extend(metadata.clone());
        }
        if let Some(completed_at) = update.completed_at {
            transfer.completed_at = Some(completed_at);
        }
        transfer.updated_at = Utc::now();
        Ok(())
    }

    async fn list(&self, filters: &TransferFilters) -> Result<Vec<Transfer>> {
        let transfers = self.transfers.read().unwrap();
        let mut result: Vec<Transfer> = transfers
            .values()
            .filter(|t| {
                if let Some(account) = &filters.account {
                    if &t.account != account {
                        return false;
                    }
                }
                if let Some(asset_code) = &filters.asset_code {
                    if &t.asset_code != asset_code {
                        return false;
                    }
                }
                if let Some(status) = filters.status {
                    if t.status != status {
                        return false;
                    }
                }
                if let Some(kind) = filters.kind {
                    if t.kind != kind {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let page: Vec<Transfer> = result
            .into_iter()
            .skip(filters.offset)
            .take(filters.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TransferKind, TransferMode, TransferStatus};
    use chrono::Duration;

    fn sample_transfer(id: &str, account: &str) -> Transfer {
        let now = Utc::now();
        Transfer {
            id: id.to_string(),
            kind: TransferKind::Deposit,
            mode: TransferMode::Api,
            status: TransferStatus::Initiating,
            asset_code: "USDC".to_string(),
            asset_issuer: String::new(),
            account: account.to_string(),
            amount: "10".to_string(),
            interactive_token: String::new(),
            interactive_url: String::new(),
            external_ref: String::new(),
            stellar_tx_hash: String::new(),
            message: String::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_nonce_single_use() {
        let store = MemoryNonceStore::new();
        let expires = Utc::now() + Duration::minutes(5);
        store.add("n1", expires).await.unwrap();

        assert!(store.consume("n1").await.unwrap());
        assert!(!store.consume("n1").await.unwrap());
        assert_eq!(store.consume_entry("n1"), NonceConsume::AlreadyConsumed);
    }

    #[tokio::test]
    async fn test_nonce_duplicate_add_rejected() {
        let store = MemoryNonceStore::new();
        let expires = Utc::now() + Duration::minutes(5);
        store.add("n1", expires).await.unwrap();
        let err = store.add("n1", expires).await.unwrap_err();
        assert!(err.is_code(ErrorCode::StoreError));
    }

    #[tokio::test]
    async fn test_nonce_unknown() {
        let store = MemoryNonceStore::new();
        assert_eq!(store.consume_entry("missing"), NonceConsume::Unknown);
        assert!(!store.consume("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_nonce_expiry_boundary() {
        let store = MemoryNonceStore::new();
        // Already strictly past its expiry
        store
            .add("expired", Utc::now() - Duration::milliseconds(5))
            .await
            .unwrap();
        assert_eq!(store.consume_entry("expired"), NonceConsume::Expired);

        // Expiry comfortably in the future is still valid
        store
            .add("fresh", Utc::now() + Duration::seconds(30))
            .await
            .unwrap();
        assert!(store.consume("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn test_nonce_lazy_sweep_drops_expired() {
        let store = MemoryNonceStore::new();
        for i in 0..3 {
            store
                .add(&format!("old{}", i), Utc::now() - Duration::seconds(1))
                .await
                .unwrap();
        }
        store
            .add("live", Utc::now() + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(store.len(), 4);

        match store.consume_entry("live") {
            NonceConsume::Consumed { reaped } => assert_eq!(reaped, 3),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_transfer_save_and_find() {
        let store = MemoryTransferStore::new();
        let transfer = sample_transfer("t1", "GACC");
        store.save(&transfer).await.unwrap();

        let found = store.find_by_id("t1").await.unwrap();
        assert_eq!(found.account, "GACC");

        let err = store.save(&transfer).await.unwrap_err();
        assert!(err.is_code(ErrorCode::StoreError));

        let err = store.find_by_id("nope").await.unwrap_err();
        assert!(err.is_code(ErrorCode::StoreError));
    }

    #[tokio::test]
    async fn test_partial_update_only_touches_set_fields() {
        let store = MemoryTransferStore::new();
        store.save(&sample_transfer("t1", "GACC")).await.unwrap();

        let update = TransferUpdate {
            status: Some(TransferStatus::PendingExternal),
            external_ref: Some("R1".to_string()),
            ..Default::default()
        };
        store.update("t1", &update).await.unwrap();

        let found = store.find_by_id("t1").await.unwrap();
        assert_eq!(found.status, TransferStatus::PendingExternal);
        assert_eq!(found.external_ref, "R1");
        // Untouched fields survive
        assert_eq!(found.amount, "10");
        assert_eq!(found.asset_code, "USDC");
        assert!(found.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_find_by_account_newest_first() {
        let store = MemoryTransferStore::new();
        let mut first = sample_transfer("t1", "GACC");
        first.created_at = Utc::now() - Duration::seconds(10);
        let second = sample_transfer("t2", "GACC");
        let other = sample_transfer("t3", "GOTHER");
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();
        store.save(&other).await.unwrap();

        let found = store.find_by_account("GACC").await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, "t2");
        assert_eq!(found[1].id, "t1");
    }

    #[tokio::test]
    async fn test_list_with_filters_and_paging() {
        let store = MemoryTransferStore::new();
        for i in 0..5 {
            let mut t = sample_transfer(&format!("t{}", i), "GACC");
            t.created_at = Utc::now() - Duration::seconds(i);
            if i == 4 {
                t.kind = TransferKind::Withdrawal;
            }
            store.save(&t).await.unwrap();
        }

        let filters = TransferFilters {
            kind: Some(TransferKind::Deposit),
            limit: Some(2),
            offset: 1,
            ..Default::default()
        };
        let page = store.list(&filters).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "t1");
        assert_eq!(page[1].id, "t2");
    }
}
