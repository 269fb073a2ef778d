//! Transfer lifecycle orchestration.
//!
//! The manager owns every write path to a transfer record. Each mutation
//! acquires a per-transfer mutex, reloads the record, validates the FSM
//! transition, writes through the store, reloads once more, and fires the
//! lifecycle hooks — all before releasing the lock. Operations on distinct
//! transfers never contend.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::anchor::fsm::validate_transition;
use crate::anchor::hooks::{HookEvent, HookRegistry};
use crate::anchor::session::SessionTokenRegistry;
use crate::crypto;
use crate::errors::{AnchorError, ErrorCode, Result};
use crate::models::{
    Transfer, TransferKind, TransferMode, TransferStatus, TransferUpdate,
};
use crate::store::TransferStore;

const TRANSFER_ID_LENGTH: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    pub domain: String,
    /// Base of the interactive KYC flow; the session token is appended as
    /// `?token=...`. Falls back to `{base_url}/interactive` when empty.
    pub interactive_base_url: String,
    /// On-chain account users pay withdrawals into.
    pub distribution_account: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct DepositRequest {
    pub account: String,
    pub asset_code: String,
    pub amount: String,
    pub mode: TransferMode,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct DepositResult {
    pub id: String,
    pub interactive_url: String,
    pub instructions: String,
    pub eta: i64,
}

#[derive(Debug, Clone, Default)]
pub struct WithdrawalRequest {
    pub account: String,
    pub asset_code: String,
    pub amount: String,
    pub mode: TransferMode,
    pub dest: String,
    pub dest_extra: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct WithdrawalResult {
    pub id: String,
    pub interactive_url: String,
    pub stellar_account: String,
    pub stellar_memo: String,
    pub stellar_memo_type: String,
    pub eta: i64,
}

#[derive(Debug, Clone, Default)]
pub struct FundsReceivedDetails {
    pub external_ref: String,
    pub amount: String,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentSentDetails {
    pub stellar_tx_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentReceivedDetails {
    pub stellar_tx_hash: String,
    pub amount: String,
    pub asset_code: String,
}

#[derive(Debug, Clone, Default)]
pub struct DisbursementDetails {
    pub external_ref: String,
}

/// External projection of a transfer record.
#[derive(Debug, Clone, Serialize)]
pub struct TransferStatusView {
    pub id: String,
    pub kind: String,
    pub status: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub status_eta: i64,
    pub more_info_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub amount_in: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub amount_out: String,
    pub started_at: chrono::DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<Utc>>,
    #[serde(rename = "stellar_transaction_id", skip_serializing_if = "String::is_empty")]
    pub tx_hash: String,
    #[serde(rename = "external_transaction_id", skip_serializing_if = "String::is_empty")]
    pub external_tx_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

pub struct TransferManager {
    store: Arc<dyn TransferStore>,
    config: ManagerConfig,
    hooks: Arc<HookRegistry>,
    sessions: SessionTokenRegistry,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TransferManager {
    pub fn new(store: Arc<dyn TransferStore>, config: ManagerConfig) -> Self {
        Self::with_hooks(store, config, Arc::new(HookRegistry::new()))
    }

    pub fn with_hooks(
        store: Arc<dyn TransferStore>,
        config: ManagerConfig,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        Self {
            store,
            config,
            hooks,
            sessions: SessionTokenRegistry::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn hooks(&self) -> Arc<HookRegistry> {
        self.hooks.clone()
    }

    /// Per-transfer mutex, created on first use. The registry lock is held
    /// only for the map lookup, never across the store round-trip.
    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub async fn initiate_deposit(&self, req: DepositRequest) -> Result<DepositResult> {
        validate_initiation(&req.account, &req.asset_code, &req.amount)?;

        let id = crypto::generate_url_token(TRANSFER_ID_LENGTH)?;
        let now = Utc::now();
        let mut transfer = Transfer {
            id: id.clone(),
            kind: TransferKind::Deposit,
            mode: req.mode,
            status: TransferStatus::Initiating,
            asset_code: req.asset_code,
            asset_issuer: String::new(),
            account: req.account,
            amount: req.amount,
            interactive_token: String::new(),
            interactive_url: String::new(),
            external_ref: String::new(),
            stellar_tx_hash: String::new(),
            message: String::new(),
            metadata: req.metadata,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        if transfer.mode == TransferMode::Interactive {
            let (token, url) = self.mint_interactive_url(&id)?;
            transfer.interactive_token = token;
            transfer.interactive_url = url;
            transfer.status = TransferStatus::Interactive;
        }

        self.store.save(&transfer).await.map_err(save_failed)?;

        if transfer.mode == TransferMode::Interactive {
            self.hooks.trigger(HookEvent::DepositInitiated, &transfer);
            return Ok(DepositResult {
                id: transfer.id,
                interactive_url: transfer.interactive_url,
                instructions: String::new(),
                eta: 0,
            });
        }

        // API mode goes straight to the off-chain leg.
        self.apply(&id, TransferUpdate::default(), TransferStatus::PendingExternal, &[])
            .await?;
        let updated = self.load(&id).await?;
        self.hooks.trigger(HookEvent::DepositInitiated, &updated);
        Ok(DepositResult {
            id,
            interactive_url: String::new(),
            instructions: "deposit initiated".to_string(),
            eta: 0,
        })
    }

    pub async fn initiate_withdrawal(&self, req: WithdrawalRequest) -> Result<WithdrawalResult> {
        validate_initiation(&req.account, &req.asset_code, &req.amount)?;

        let id = crypto::generate_url_token(TRANSFER_ID_LENGTH)?;
        let now = Utc::now();
        let mut transfer = Transfer {
            id: id.clone(),
            kind: TransferKind::Withdrawal,
            mode: req.mode,
            status: TransferStatus::Initiating,
            asset_code: req.asset_code,
            asset_issuer: String::new(),
            account: req.account,
            amount: req.amount,
            interactive_token: String::new(),
            interactive_url: String::new(),
            external_ref: String::new(),
            stellar_tx_hash: String::new(),
            message: String::new(),
            metadata: req.metadata,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        if transfer.mode == TransferMode::Interactive {
            let (token, url) = self.mint_interactive_url(&id)?;
            transfer.interactive_token = token;
            transfer.interactive_url = url;
            transfer.status = TransferStatus::Interactive;
        } else {
            // The user owes an on-chain payment before anything else happens.
            transfer.status = TransferStatus::PaymentRequired;
        }

        self.store.save(&transfer).await.map_err(save_failed)?;
        self.hooks.trigger(HookEvent::WithdrawalInitiated, &transfer);

        Ok(WithdrawalResult {
            id: transfer.id.clone(),
            interactive_url: transfer.interactive_url,
            stellar_account: self.config.distribution_account.clone(),
            stellar_memo: transfer.id,
            stellar_memo_type: "text".to_string(),
            eta: 0,
        })
    }

    /// Finish the interactive flow: merge collected KYC data into the
    /// transfer metadata and advance past the interactive state.
    pub async fn complete_interactive(
        &self,
        transfer_id: &str,
        kyc_data: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let transfer = self.load(transfer_id).await?;
        if transfer.mode != TransferMode::Interactive {
            return Err(AnchorError::anchor(
                ErrorCode::TransitionInvalid,
                "transfer not in interactive mode",
            ));
        }

        let next = match transfer.kind {
            TransferKind::Deposit => TransferStatus::PendingUserTransferStart,
            TransferKind::Withdrawal => TransferStatus::PendingExternal,
        };
        let update = TransferUpdate {
            metadata: (!kyc_data.is_empty()).then_some(kyc_data),
            ..Default::default()
        };
        let extra_hooks: &[HookEvent] = match transfer.kind {
            TransferKind::Deposit => &[HookEvent::DepositKycComplete],
            TransferKind::Withdrawal => &[],
        };
        self.apply(transfer_id, update, next, extra_hooks).await
    }

    /// Resolve an interactive token without consuming it (GET of the form).
    pub async fn peek_interactive_token(&self, token: &str) -> Result<Transfer> {
        let transfer_id = self
            .sessions
            .peek(token)
            .ok_or_else(invalid_interactive_token)?;
        self.load(&transfer_id).await
    }

    /// Resolve and burn an interactive token (POST finalizing the flow).
    pub async fn consume_interactive_token(&self, token: &str) -> Result<Transfer> {
        let transfer_id = self
            .sessions
            .consume(token)
            .ok_or_else(invalid_interactive_token)?;
        self.load(&transfer_id).await
    }

    /// Off-chain funds arrived for a deposit.
    pub async fn notify_funds_received(
        &self,
        transfer_id: &str,
        details: FundsReceivedDetails,
    ) -> Result<()> {
        let update = TransferUpdate {
            external_ref: Some(details.external_ref),
            amount: (!details.amount.trim().is_empty()).then_some(details.amount),
            ..Default::default()
        };
        self.apply(
            transfer_id,
            update,
            TransferStatus::PendingStellar,
            &[HookEvent::DepositFundsReceived],
        )
        .await
    }

    /// The anchor's on-chain payment for a deposit went out.
    pub async fn notify_payment_sent(
        &self,
        transfer_id: &str,
        details: PaymentSentDetails,
    ) -> Result<()> {
        let update = TransferUpdate {
            stellar_tx_hash: Some(details.stellar_tx_hash),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };
        self.apply(transfer_id, update, TransferStatus::Completed, &[])
            .await
    }

    /// A user's on-chain payment for a withdrawal landed.
    ///
    /// The declared asset code is recorded by the caller but not validated
    /// against the transfer here; amount reconciliation happens downstream.
    pub async fn notify_payment_received(
        &self,
        transfer_id: &str,
        details: PaymentReceivedDetails,
    ) -> Result<()> {
        let update = TransferUpdate {
            stellar_tx_hash: Some(details.stellar_tx_hash),
            ..Default::default()
        };
        self.apply(
            transfer_id,
            update,
            TransferStatus::PendingStellar,
            &[HookEvent::WithdrawalStellarPaymentSent],
        )
        .await
    }

    /// The off-chain disbursement for a withdrawal completed.
    pub async fn notify_disbursement_sent(
        &self,
        transfer_id: &str,
        details: DisbursementDetails,
    ) -> Result<()> {
        let update = TransferUpdate {
            external_ref: Some(details.external_ref),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };
        self.apply(transfer_id, update, TransferStatus::Completed, &[])
            .await
    }

    pub async fn deny(&self, transfer_id: &str, reason: &str) -> Result<()> {
        self.apply(
            transfer_id,
            message_update(reason),
            TransferStatus::Denied,
            &[],
        )
        .await
    }

    pub async fn cancel(&self, transfer_id: &str, reason: &str) -> Result<()> {
        self.apply(
            transfer_id,
            message_update(reason),
            TransferStatus::Cancelled,
            &[],
        )
        .await
    }

    pub async fn get_status(&self, transfer_id: &str) -> Result<TransferStatusView> {
        let transfer = self.load(transfer_id).await?;
        let base_url = if self.config.base_url.is_empty() {
            "http://localhost:8000"
        } else {
            &self.config.base_url
        };
        let more_info_url = format!(
            "{}/transaction/{}",
            base_url.trim_end_matches('/'),
            transfer.id
        );
        Ok(TransferStatusView {
            id: transfer.id,
            kind: transfer.kind.as_str().to_string(),
            status: transfer.status.as_str().to_string(),
            status_eta: 0,
            more_info_url,
            amount_in: transfer.amount.clone(),
            amount_out: transfer.amount,
            started_at: transfer.created_at,
            completed_at: transfer.completed_at,
            tx_hash: transfer.stellar_tx_hash,
            external_tx_id: transfer.external_ref,
            message: transfer.message,
        })
    }

    /// The serialized read-modify-write every status mutation goes through.
    ///
    /// Holds the per-transfer mutex across the store round-trips so the
    /// transition check and the write are atomic with respect to other
    /// notifications for the same transfer.
    async fn apply(
        &self,
        transfer_id: &str,
        mut update: TransferUpdate,
        next: TransferStatus,
        extra_hooks: &[HookEvent],
    ) -> Result<()> {
        let lock = self.lock_for(transfer_id);
        let _guard = lock.lock().await;

        let transfer = self.load(transfer_id).await?;
        validate_transition(transfer.status, next)?;

        update.status = Some(next);
        if next == TransferStatus::Completed && update.completed_at.is_none() {
            update.completed_at = Some(Utc::now());
        }
        self.store
            .update(transfer_id, &update)
            .await
            .map_err(|e| {
                AnchorError::anchor(ErrorCode::StoreError, "failed to update transfer")
                    .with_cause(e)
            })?;

        if next == TransferStatus::Completed {
            self.sessions.purge_transfer(transfer_id);
        }

        // Hook delivery wants the fresh record; a failed reload only costs
        // the notifications, the write already happened.
        match self.load(transfer_id).await {
            Ok(updated) => {
                for hook in extra_hooks {
                    self.hooks.trigger(*hook, &updated);
                }
                self.hooks.trigger(HookEvent::TransferStatusChanged, &updated);
            }
            Err(e) => log::warn!(
                "transfer {} updated but reload for hooks failed: {}",
                transfer_id,
                e
            ),
        }
        Ok(())
    }

    async fn load(&self, transfer_id: &str) -> Result<Transfer> {
        self.store.find_by_id(transfer_id).await.map_err(|e| {
            if e.is_code(ErrorCode::StoreError) {
                e
            } else {
                AnchorError::anchor(ErrorCode::StoreError, "failed to load transfer").with_cause(e)
            }
        })
    }

    fn mint_interactive_url(&self, transfer_id: &str) -> Result<(String, String)> {
        let token = self.sessions.mint(transfer_id).map_err(|e| {
            AnchorError::anchor(
                ErrorCode::InteractiveTokenInvalid,
                "failed to generate interactive token",
            )
            .with_cause(e)
        })?;
        let base = self.config.interactive_base_url.trim_end_matches('/');
        let base = if base.is_empty() {
            let base_url = if self.config.base_url.is_empty() {
                "http://localhost:8000"
            } else {
                &self.config.base_url
            };
            format!("{}/interactive", base_url.trim_end_matches('/'))
        } else {
            base.to_string()
        };
        let url = format!("{}?token={}", base, token);
        Ok((token, url))
    }
}

fn validate_initiation(account: &str, asset_code: &str, amount: &str) -> Result<()> {
    if account.trim().is_empty() || asset_code.trim().is_empty() || amount.trim().is_empty() {
        return Err(AnchorError::anchor(
            ErrorCode::InvalidAsset,
            "account, asset_code, and amount are required",
        ));
    }
    let parsed = Decimal::from_str(amount.trim()).map_err(|e| {
        AnchorError::anchor(
            ErrorCode::InvalidAsset,
            format!("amount {:?} is not a decimal", amount),
        )
        .with_cause(e)
    })?;
    if parsed <= Decimal::ZERO {
        return Err(AnchorError::anchor(
            ErrorCode::InvalidAsset,
            format!("amount must be positive, got {}", amount),
        ));
    }
    Ok(())
}

fn message_update(reason: &str) -> TransferUpdate {
    TransferUpdate {
        message: (!reason.trim().is_empty()).then(|| reason.to_string()),
        ..Default::default()
    }
}

fn save_failed(e: AnchorError) -> AnchorError {
    AnchorError::anchor(ErrorCode::StoreError, "failed to save transfer").with_cause(e)
}

fn invalid_interactive_token() -> AnchorError {
    AnchorError::anchor(
        ErrorCode::InteractiveTokenInvalid,
        "interactive token invalid",
    )
}
