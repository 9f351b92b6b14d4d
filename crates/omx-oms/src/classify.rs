//! Complete-vs-partial fill disambiguation.
//!
//! Venue signals about a trade are mutually inconsistent surprisingly
//! often: the reported quantity, the reported leaves-quantity and the
//! "order filled" flag may disagree with each other and with our own
//! bookkeeping. Each available signal votes Complete or Partial;
//! protocol-sourced signals count double, our computed remainder counts
//! once, and the majority decides. The weighting is a pinned behavioral
//! contract, not a verified algorithm.

use omx_core::{Qty, ReqId};
use tracing::warn;

/// Outcome of classifying one reported trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillDecision {
    /// The trade completes the request. `qty` is corrected to the
    /// previously remaining quantity, so the sum of recorded trade
    /// quantities never exceeds the order quantity.
    Complete { qty: Qty },
    /// The trade is partial; `leaves` is the remainder after it.
    Partial { qty: Qty, leaves: Qty },
}

impl FillDecision {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    pub fn qty(&self) -> Qty {
        match self {
            Self::Complete { qty } => *qty,
            Self::Partial { qty, .. } => *qty,
        }
    }
}

/// Decide whether a reported trade is a complete or partial fill.
///
/// * `req` - the traded request, for log context only
/// * `prev_leaves` - our remaining quantity before this trade
/// * `last_qty` - the trade quantity as reported (> 0)
/// * `proto_leaves` - venue-reported remaining quantity, if any
/// * `proto_filled` - venue-reported "order is filled" flag, if any
pub fn classify(
    req: ReqId,
    prev_leaves: Qty,
    last_qty: Qty,
    proto_leaves: Option<Qty>,
    proto_filled: Option<bool>,
) -> FillDecision {
    debug_assert!(last_qty.is_positive());

    // Our own view of the remainder, assuming the reported quantity is
    // itself trustworthy (it might not be).
    let our_leaves = prev_leaves.saturating_sub(last_qty);

    let mut votes_complete = u32::from(our_leaves.is_zero());
    let mut votes_partial = u32::from(our_leaves.is_positive());

    if let Some(leaves) = proto_leaves {
        votes_complete += 2 * u32::from(leaves.is_zero());
        votes_partial += 2 * u32::from(leaves.is_positive());
    }
    if let Some(filled) = proto_filled {
        votes_complete += 2 * u32::from(filled);
        votes_partial += 2 * u32::from(!filled);
    }

    // Case analysis shows a tie is impossible: the computed signal is
    // always present and breaks parity.
    debug_assert_ne!(votes_complete, votes_partial);
    let mut complete = votes_complete > votes_partial;

    if votes_complete != 0 && votes_partial != 0 {
        warn!(
            req = %req,
            votes_complete,
            votes_partial,
            our_leaves = %our_leaves,
            proto_leaves = ?proto_leaves,
            proto_filled = ?proto_filled,
            decided_complete = complete,
            "Conflicting fill votes"
        );
    }

    // A Partial verdict with nothing left to fill cannot stand: zero
    // remaining cannot coexist with "more to fill".
    if !complete && our_leaves.is_zero() {
        warn!(
            req = %req,
            "Partial verdict with zero computed remainder, correcting to Complete"
        );
        complete = true;
    }

    if complete {
        FillDecision::Complete { qty: prev_leaves }
    } else {
        FillDecision::Partial {
            qty: last_qty,
            leaves: our_leaves,
        }
    }
}
