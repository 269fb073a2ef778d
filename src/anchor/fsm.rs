//! Transfer lifecycle state machine.
//!
//! Every status mutation goes through [`validate_transition`]; the manager
//! never writes a status the relation does not allow.

use crate::errors::{AnchorError, ErrorCode, Result};
use crate::models::TransferStatus;

/// Check that a requested transition is legal.
///
/// Terminal states (completed, failed, denied, cancelled, expired) have no
/// outgoing transitions. Returns `TRANSITION_INVALID` for any pair outside
/// the relation.
pub fn validate_transition(from: TransferStatus, to: TransferStatus) -> Result<()> {
    use TransferStatus::*;

    let allowed = match from {
        Initiating => matches!(
            to,
            Interactive | PendingUserTransferStart | PendingExternal | Failed | Denied
        ),
        Interactive => matches!(
            to,
            PendingUserTransferStart | PendingExternal | Failed | Expired
        ),
        PendingUserTransferStart => {
            matches!(to, PendingExternal | PendingStellar | Failed | Cancelled)
        }
        PendingExternal => matches!(to, PendingStellar | Failed | Cancelled),
        PendingStellar => matches!(to, Completed | Failed),
        PaymentRequired => matches!(to, PendingStellar | Failed),
        // Terminal states
        Completed | Failed | Denied | Cancelled | Expired => false,
    };

    if !allowed {
        return Err(AnchorError::anchor(
            ErrorCode::TransitionInvalid,
            format!("illegal transition from {} to {}", from, to),
        ));
    }
    Ok(())
}
