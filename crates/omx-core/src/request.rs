//! Request-level types: one discrete attempt to act on an order.
//!
//! A `Request` is one New / Cancel / Modify message (or one leg of the
//! cancel/new tandem emulating an atomic modify) identified by a
//! strictly increasing id. Requests are created as drafts; a draft is
//! finalized into an arena slot when allocated, and a still-unsent
//! (Indicated) request may be overwritten in place by a later draft.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::ids::{OrderId, ReqId, SeqNum};
use crate::time::{EventTimes, TimeStamp};
use crate::{Price, Qty};

/// Kind of request within an order's chain.
///
/// `CancelLeg` and `NewLeg` are the two legs of the cancel/new tandem
/// emulating an atomic modify on venues that lack one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReqKind {
    New,
    Modify,
    Cancel,
    CancelLeg,
    NewLeg,
}

impl ReqKind {
    /// Cancel-type requests carry no price and sentinel (zero) quantities.
    pub fn is_cancel_kind(&self) -> bool {
        matches!(self, Self::Cancel | Self::CancelLeg)
    }

    /// New-type requests have no target.
    pub fn is_new_kind(&self) -> bool {
        matches!(self, Self::New | Self::NewLeg)
    }
}

impl fmt::Display for ReqKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Modify => write!(f, "modify"),
            Self::Cancel => write!(f, "cancel"),
            Self::CancelLeg => write!(f, "cancel_leg"),
            Self::NewLeg => write!(f, "new_leg"),
        }
    }
}

/// Status of a request.
///
/// The declaration order is significant: status priority comparisons
/// (`<`, `>=`) and `is_terminal` rely on it, so active states must stay
/// before `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReqStatus {
    /// Exists on the client side but has not been transmitted yet.
    Indicated,
    /// Put on the wire.
    Sent,
    /// Acknowledged by the venue session.
    Acked,
    /// Confirmed by the venue. For a cancel request this means the
    /// target was indeed cancelled.
    Confirmed,
    /// Confirmed and partially filled.
    PartFilled,
    /// End-of-life for the whole order.
    Cancelled,
    /// End-of-life for this request only: superseded by a later one.
    Replaced,
    /// End-of-life for this request (e.g. rejected); the whole order
    /// may or may not have failed as well.
    Failed,
    /// End-of-life for the whole order.
    Filled,
}

impl ReqStatus {
    /// Terminal (inactive) statuses. Once terminal, the only legal
    /// further transition is `Cancelled` -> `Replaced`, used by the
    /// tandem modify emulation.
    pub fn is_terminal(&self) -> bool {
        *self >= Self::Cancelled
    }
}

impl fmt::Display for ReqStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Indicated => "indicated",
            Self::Sent => "sent",
            Self::Acked => "acked",
            Self::Confirmed => "confirmed",
            Self::PartFilled => "part_filled",
            Self::Cancelled => "cancelled",
            Self::Replaced => "replaced",
            Self::Failed => "failed",
            Self::Filled => "filled",
        };
        write!(f, "{s}")
    }
}

/// The mutable intent of a request before it occupies an arena slot.
///
/// Overwriting an Indicated request is "discard draft, build a new
/// draft in the same slot" rather than mutation of finalized fields.
#[derive(Debug, Clone)]
pub struct RequestDraft {
    pub kind: ReqKind,
    /// The request being acted on; absent for New/NewLeg.
    pub target: Option<ReqId>,
    /// Absent for cancel-type requests and market orders.
    pub price: Option<Price>,
    pub qty: Qty,
    pub qty_show: Qty,
    pub qty_min: Qty,
    /// Whether the request is intended to trade aggressively. Used for
    /// fee estimation when the venue does not report the aggressor.
    pub is_aggressive: bool,
    pub event_times: EventTimes,
    pub created_at: TimeStamp,
}

impl RequestDraft {
    /// Draft for a New or NewLeg request.
    #[allow(clippy::too_many_arguments)]
    pub fn new_order(
        kind: ReqKind,
        price: Option<Price>,
        qty: Qty,
        qty_show: Qty,
        qty_min: Qty,
        is_aggressive: bool,
        event_times: EventTimes,
        created_at: TimeStamp,
    ) -> Self {
        debug_assert!(kind.is_new_kind());
        Self {
            kind,
            target: None,
            price,
            qty,
            qty_show,
            qty_min,
            is_aggressive,
            event_times,
            created_at,
        }
    }

    /// Draft for a Cancel or CancelLeg request against `target`.
    pub fn cancel(
        kind: ReqKind,
        target: ReqId,
        event_times: EventTimes,
        created_at: TimeStamp,
    ) -> Self {
        debug_assert!(kind.is_cancel_kind());
        Self {
            kind,
            target: Some(target),
            price: None,
            qty: Qty::ZERO,
            qty_show: Qty::ZERO,
            qty_min: Qty::ZERO,
            is_aggressive: false,
            event_times,
            created_at,
        }
    }

    /// Draft for an atomic Modify against `target`.
    #[allow(clippy::too_many_arguments)]
    pub fn modify(
        target: ReqId,
        price: Option<Price>,
        qty: Qty,
        qty_show: Qty,
        qty_min: Qty,
        is_aggressive: bool,
        event_times: EventTimes,
        created_at: TimeStamp,
    ) -> Self {
        Self {
            kind: ReqKind::Modify,
            target: Some(target),
            price,
            qty,
            qty_show,
            qty_min,
            is_aggressive,
            event_times,
            created_at,
        }
    }

    fn validate(&self, id: ReqId) -> Result<(), CoreError> {
        if let Some(target) = self.target {
            if target >= id {
                return Err(CoreError::InvalidArgument(format!(
                    "request {id}: target {target} must precede it"
                )));
            }
        }
        if self.target.is_some() == self.kind.is_new_kind() {
            return Err(CoreError::InvalidArgument(format!(
                "request {id}: kind {} and target presence disagree",
                self.kind
            )));
        }
        if self.kind.is_cancel_kind() {
            if self.price.is_some() || !self.qty.is_zero() {
                return Err(CoreError::InvalidQty(format!(
                    "request {id}: cancel requests carry sentinel price and qty"
                )));
            }
        } else {
            if !self.qty.is_positive() {
                return Err(CoreError::InvalidQty(format!(
                    "request {id}: qty {} must be positive",
                    self.qty
                )));
            }
            if self.qty_show.is_negative()
                || self.qty_min.is_negative()
                || self.qty_show > self.qty
                || self.qty_min > self.qty
            {
                return Err(CoreError::InvalidQty(format!(
                    "request {id}: inconsistent qtys: qty={} show={} min={}",
                    self.qty, self.qty_show, self.qty_min
                )));
            }
        }
        Ok(())
    }
}

/// One discrete request against an order, as stored in the arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Arena id, strictly increasing with submission order.
    pub id: ReqId,
    /// The order this request belongs to.
    pub order: OrderId,
    pub kind: ReqKind,
    pub status: ReqStatus,
    /// The request being acted on; absent for New/NewLeg.
    pub target: Option<ReqId>,
    pub price: Option<Price>,
    pub qty: Qty,
    pub qty_show: Qty,
    pub qty_min: Qty,
    /// Yet-unfilled quantity; always <= `qty`.
    pub leaves_qty: Qty,
    pub is_aggressive: bool,
    /// Venue-assigned order id, installed on confirmation.
    pub venue_id: Option<String>,
    /// Market-data entry id cross-linking this request to book events.
    pub md_entry_id: Option<String>,
    /// Transport sequence number, unknown before transmission.
    pub seq_num: Option<SeqNum>,
    /// Forward-looking annotation: not failed yet, but surely will.
    pub will_fail: bool,
    /// A fill has been inferred (or recorded) for this request; blocks
    /// repeated inferred-fill signals.
    pub probably_filled: bool,
    /// Previous (more ancient) request of the same order.
    pub prev: Option<ReqId>,
    /// Next (more recent) request of the same order.
    pub next: Option<ReqId>,
    pub event_times: EventTimes,
    pub created_at: TimeStamp,
    pub sent_at: Option<TimeStamp>,
    pub confirmed_exch_at: Option<TimeStamp>,
    pub confirmed_conn_at: Option<TimeStamp>,
    pub ended_exch_at: Option<TimeStamp>,
    pub ended_conn_at: Option<TimeStamp>,
}

impl Request {
    /// Finalize a draft into a fresh request record.
    pub fn from_draft(id: ReqId, order: OrderId, draft: RequestDraft) -> Result<Self, CoreError> {
        draft.validate(id)?;
        let leaves = draft.qty;
        Ok(Self {
            id,
            order,
            kind: draft.kind,
            status: ReqStatus::Indicated,
            target: draft.target,
            price: draft.price,
            qty: draft.qty,
            qty_show: draft.qty_show,
            qty_min: draft.qty_min,
            leaves_qty: leaves,
            is_aggressive: draft.is_aggressive,
            venue_id: None,
            md_entry_id: None,
            seq_num: None,
            will_fail: false,
            probably_filled: false,
            prev: None,
            next: None,
            event_times: draft.event_times,
            created_at: draft.created_at,
            sent_at: None,
            confirmed_exch_at: None,
            confirmed_conn_at: None,
            ended_exch_at: None,
            ended_conn_at: None,
        })
    }

    /// Overwrite a still-Indicated request in place with a new draft.
    ///
    /// Identity and chain links are preserved; intent fields are
    /// replaced wholesale and the status returns to `Indicated`.
    pub fn overwrite_with(&mut self, draft: RequestDraft) -> Result<(), CoreError> {
        debug_assert_eq!(self.status, ReqStatus::Indicated);
        draft.validate(self.id)?;
        self.kind = draft.kind;
        self.status = ReqStatus::Indicated;
        self.target = draft.target;
        self.price = draft.price;
        self.qty = draft.qty;
        self.qty_show = draft.qty_show;
        self.qty_min = draft.qty_min;
        self.leaves_qty = draft.qty;
        self.is_aggressive = draft.is_aggressive;
        self.event_times = draft.event_times;
        self.created_at = draft.created_at;
        Ok(())
    }

    /// Whether this request has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn new_draft(qty: Qty, show: Qty, min: Qty) -> RequestDraft {
        RequestDraft::new_order(
            ReqKind::New,
            Some(Price::new(dec!(100))),
            qty,
            show,
            min,
            false,
            EventTimes::none(),
            Utc::now(),
        )
    }

    #[test]
    fn test_status_priority_order() {
        assert!(ReqStatus::Indicated < ReqStatus::Sent);
        assert!(ReqStatus::Sent < ReqStatus::Acked);
        assert!(ReqStatus::Acked < ReqStatus::Confirmed);
        assert!(ReqStatus::Confirmed < ReqStatus::PartFilled);
        assert!(ReqStatus::PartFilled < ReqStatus::Cancelled);
        assert!(ReqStatus::Cancelled < ReqStatus::Replaced);

        assert!(!ReqStatus::PartFilled.is_terminal());
        assert!(ReqStatus::Cancelled.is_terminal());
        assert!(ReqStatus::Replaced.is_terminal());
        assert!(ReqStatus::Failed.is_terminal());
        assert!(ReqStatus::Filled.is_terminal());
    }

    #[test]
    fn test_draft_finalize_sets_leaves() {
        let req = Request::from_draft(
            ReqId(5),
            OrderId(1),
            new_draft(Qty::new(dec!(100)), Qty::new(dec!(100)), Qty::ZERO),
        )
        .unwrap();
        assert_eq!(req.status, ReqStatus::Indicated);
        assert_eq!(req.leaves_qty, req.qty);
        assert!(req.target.is_none());
    }

    #[test]
    fn test_draft_rejects_bad_qtys() {
        assert!(Request::from_draft(
            ReqId(5),
            OrderId(1),
            new_draft(Qty::ZERO, Qty::ZERO, Qty::ZERO),
        )
        .is_err());
        assert!(Request::from_draft(
            ReqId(5),
            OrderId(1),
            new_draft(Qty::new(dec!(10)), Qty::new(dec!(20)), Qty::ZERO),
        )
        .is_err());
    }

    #[test]
    fn test_cancel_draft_targets_earlier_request() {
        let draft = RequestDraft::cancel(ReqKind::Cancel, ReqId(9), EventTimes::none(), Utc::now());
        assert!(Request::from_draft(ReqId(5), OrderId(1), draft.clone()).is_err());
        let req = Request::from_draft(ReqId(10), OrderId(1), draft).unwrap();
        assert_eq!(req.target, Some(ReqId(9)));
        assert!(req.price.is_none());
        assert!(req.qty.is_zero());
    }

    #[test]
    fn test_overwrite_modify_into_cancel() {
        let mut req = Request::from_draft(
            ReqId(7),
            OrderId(1),
            RequestDraft::modify(
                ReqId(3),
                Some(Price::new(dec!(101))),
                Qty::new(dec!(50)),
                Qty::new(dec!(50)),
                Qty::ZERO,
                false,
                EventTimes::none(),
                Utc::now(),
            ),
        )
        .unwrap();

        req.overwrite_with(RequestDraft::cancel(
            ReqKind::Cancel,
            ReqId(3),
            EventTimes::none(),
            Utc::now(),
        ))
        .unwrap();

        assert_eq!(req.kind, ReqKind::Cancel);
        assert_eq!(req.id, ReqId(7));
        assert!(req.price.is_none());
        assert!(req.leaves_qty.is_zero());
        assert_eq!(req.status, ReqStatus::Indicated);
    }
}
