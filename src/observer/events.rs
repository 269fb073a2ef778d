//! Payment events and filter predicates.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::errors::Result;

/// A payment-like operation streamed from the ledger, normalized for
/// handler consumption.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentEvent {
    /// Unique operation id
    pub id: String,
    /// Sending account (G...)
    pub from: String,
    /// Receiving account (G...)
    pub to: String,
    /// "native" for lumens, "CODE:ISSUER" for issued assets
    pub asset: String,
    /// Decimal-string amount
    pub amount: String,
    /// Transaction memo, empty when absent
    pub memo: String,
    /// Paging token for resumption
    pub cursor: String,
    pub transaction_hash: String,
}

/// Processes matching payment events.
///
/// Handlers run sequentially per event; an error is logged and streaming
/// continues.
#[async_trait]
pub trait PaymentHandler: Send + Sync {
    async fn handle(&self, event: PaymentEvent) -> Result<()>;
}

/// Adapter turning a plain closure into a [`PaymentHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> PaymentHandler for FnHandler<F>
where
    F: Fn(PaymentEvent) -> Result<()> + Send + Sync,
{
    async fn handle(&self, event: PaymentEvent) -> Result<()> {
        (self.0)(event)
    }
}

/// Predicate deciding whether a handler sees an event. Filters on one
/// handler registration are ANDed.
pub type PaymentFilter = Box<dyn Fn(&PaymentEvent) -> bool + Send + Sync>;

/// Match payments of a specific asset: "native", or "CODE:ISSUER".
pub fn with_asset(asset: impl Into<String>) -> PaymentFilter {
    let asset = asset.into();
    Box::new(move |evt| evt.asset == asset)
}

/// Match payments of at least the given decimal amount. Events whose
/// amount fails to parse are skipped.
pub fn with_min_amount(min_amount: impl Into<String>) -> PaymentFilter {
    let min = Decimal::from_str(&min_amount.into()).ok();
    Box::new(move |evt| match (min, Decimal::from_str(&evt.amount)) {
        (Some(min), Ok(amount)) => amount >= min,
        _ => false,
    })
}

/// Match payments sent to or from the account.
pub fn with_account(account: impl Into<String>) -> PaymentFilter {
    let account = account.into();
    Box::new(move |evt| evt.from == account || evt.to == account)
}

/// Match payments sent to the account.
pub fn with_destination(account: impl Into<String>) -> PaymentFilter {
    let account = account.into();
    Box::new(move |evt| evt.to == account)
}

/// Match payments sent from the account.
pub fn with_source(account: impl Into<String>) -> PaymentFilter {
    let account = account.into();
    Box::new(move |evt| evt.from == account)
}
