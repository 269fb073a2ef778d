//! Lifecycle event hooks.
//!
//! Anchors register callbacks for transfer lifecycle events; the manager
//! triggers them synchronously, in registration order, while it still holds
//! the per-transfer lock. Handlers must be quick and non-blocking; a
//! panicking handler aborts the rest of the batch.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use crate::models::Transfer;

/// Named lifecycle events anchors can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    DepositInitiated,
    DepositKycComplete,
    DepositFundsReceived,
    WithdrawalInitiated,
    WithdrawalStellarPaymentSent,
    TransferStatusChanged,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DepositInitiated => "deposit:initiated",
            Self::DepositKycComplete => "deposit:kyc_complete",
            Self::DepositFundsReceived => "deposit:funds_received",
            Self::WithdrawalInitiated => "withdrawal:initiated",
            Self::WithdrawalStellarPaymentSent => "withdrawal:stellar_payment_sent",
            Self::TransferStatusChanged => "transfer:status_changed",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

type HookHandler = Box<dyn Fn(HookEvent, &Transfer) + Send + Sync>;

/// Registry of lifecycle event handlers.
///
/// Registration is rare, triggering is frequent; an RwLock keeps triggers
/// from contending with each other.
pub struct HookRegistry {
    handlers: RwLock<HashMap<HookEvent, Vec<HookHandler>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for an event. Handlers for the same event run
    /// sequentially in registration order.
    pub fn on<F>(&self, event: HookEvent, handler: F)
    where
        F: Fn(HookEvent, &Transfer) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap();
        handlers.entry(event).or_default().push(Box::new(handler));
    }

    /// Run every handler registered for the event.
    pub fn trigger(&self, event: HookEvent, transfer: &Transfer) {
        let handlers = self.handlers.read().unwrap();
        if let Some(list) = handlers.get(&event) {
            for handler in list {
                handler(event, transfer);
            }
        }
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TransferKind, TransferMode, TransferStatus};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn dummy_transfer() -> Transfer {
        let now = Utc::now();
        Transfer {
            id: "t1".to_string(),
            kind: TransferKind::Deposit,
            mode: TransferMode::Api,
            status: TransferStatus::Initiating,
            asset_code: "USDC".to_string(),
            asset_issuer: String::new(),
            account: "GACC".to_string(),
            amount: "1".to_string(),
            interactive_token: String::new(),
            interactive_url: String::new(),
            external_ref: String::new(),
            stellar_tx_hash: String::new(),
            message: String::new(),
            metadata: Default::default(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn test_handlers_fire_in_registration_order() {
        let registry = HookRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            registry.on(HookEvent::TransferStatusChanged, move |event, _| {
                assert_eq!(event, HookEvent::TransferStatusChanged);
                order.lock().unwrap().push(i);
            });
        }
        registry.trigger(HookEvent::TransferStatusChanged, &dummy_transfer());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_events_are_isolated() {
        let registry = HookRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        registry.on(HookEvent::DepositInitiated, move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.trigger(HookEvent::WithdrawalInitiated, &dummy_transfer());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        registry.trigger(HookEvent::DepositInitiated, &dummy_transfer());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_trigger_without_handlers_is_noop() {
        let registry = HookRegistry::new();
        registry.trigger(HookEvent::TransferStatusChanged, &dummy_transfer());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(HookEvent::DepositFundsReceived.as_str(), "deposit:funds_received");
        assert_eq!(
            HookEvent::WithdrawalStellarPaymentSent.as_str(),
            "withdrawal:stellar_payment_sent"
        );
    }
}
