//! On-chain payment observation: a resumable Horizon payment stream with
//! typed events, composable filters, and automatic withdrawal matching.

pub mod automatch;
pub mod events;
pub mod horizon;

// Re-export commonly used types
pub use automatch::auto_match_payments;
pub use events::{
    with_account, with_asset, with_destination, with_min_amount, with_source, FnHandler,
    PaymentEvent, PaymentFilter, PaymentHandler,
};
pub use horizon::HorizonObserver;
