use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Deposit (off-chain in, on-chain out) or withdrawal (the reverse).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Deposit,
    Withdrawal,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
        }
    }
}

/// Interactive transfers route the user through a browser KYC flow;
/// API transfers are fully programmatic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    Interactive,
    Api,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Api => "api",
        }
    }
}

impl Default for TransferMode {
    fn default() -> Self {
        TransferMode::Api
    }
}

/// States of the transfer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Initiating,
    Interactive,
    PendingUserTransferStart,
    PendingExternal,
    PendingStellar,
    PaymentRequired,
    Completed,
    Failed,
    Denied,
    Cancelled,
    Expired,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiating => "initiating",
            Self::Interactive => "interactive",
            Self::PendingUserTransferStart => "pending_user_transfer_start",
            Self::PendingExternal => "pending_external",
            Self::PendingStellar => "pending_stellar",
            Self::PaymentRequired => "payment_required",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Denied => "denied",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "initiating" => Some(Self::Initiating),
            "interactive" => Some(Self::Interactive),
            "pending_user_transfer_start" => Some(Self::PendingUserTransferStart),
            "pending_external" => Some(Self::PendingExternal),
            "pending_stellar" => Some(Self::PendingStellar),
            "payment_required" => Some(Self::PaymentRequired),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "denied" => Some(Self::Denied),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Check if terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Denied | Self::Cancelled | Self::Expired
        )
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The canonical transfer record.
///
/// `status` is mutated only by the transfer manager through a validated
/// transition; the id never changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub kind: TransferKind,
    pub mode: TransferMode,
    pub status: TransferStatus,
    pub asset_code: String,
    #[serde(default)]
    pub asset_issuer: String,
    /// Subject ledger account (G...)
    pub account: String,
    /// Decimal-string amount
    pub amount: String,
    #[serde(default)]
    pub interactive_token: String,
    #[serde(default)]
    pub interactive_url: String,
    /// Banking/payment reference on the off-chain leg
    #[serde(default)]
    pub external_ref: String,
    /// On-chain transaction hash
    #[serde(default)]
    pub stellar_tx_hash: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Partial update for a transfer.
///
/// Only fields that are `Some` are applied; the store never interprets an
/// absent field as "clear".
#[derive(Debug, Clone, Default)]
pub struct TransferUpdate {
    pub status: Option<TransferStatus>,
    pub amount: Option<String>,
    pub external_ref: Option<String>,
    pub stellar_tx_hash: Option<String>,
    pub interactive_token: Option<String>,
    pub interactive_url: Option<String>,
    pub message: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Filters for listing transfers.
#[derive(Debug, Clone, Default)]
pub struct TransferFilters {
    pub account: Option<String>,
    pub asset_code: Option<String>,
    pub status: Option<TransferStatus>,
    pub kind: Option<TransferKind>,
    pub limit: Option<usize>,
    pub offset: usize,
}
