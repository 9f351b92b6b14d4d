//! Execution records: one venue-reported trade.

use serde::{Deserialize, Serialize};

use crate::ids::{ExecId, OrderId, ReqId};
use crate::order::Side;
use crate::time::TimeStamp;
use crate::{Price, Qty};

/// One venue-reported trade, tied to exactly one request and its order.
///
/// Venue execution ids are unique per order; at most one execution with
/// an absent id may be recorded per order (used when a complete fill is
/// inferred rather than explicitly reported).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecId,
    pub order: OrderId,
    pub request: ReqId,
    /// Exchange-assigned execution id, used for de-duplication. Absent
    /// only for inferred complete fills.
    pub venue_exec_id: Option<String>,
    pub price: Price,
    pub qty: Qty,
    /// Commission or fee; absent when neither reported nor computable.
    pub fee: Option<Qty>,
    /// Side of the aggressor in the trade, if known.
    pub aggressor: Option<Side>,
    pub exch_time: Option<TimeStamp>,
    pub recv_time: TimeStamp,
    /// Previous (more ancient) execution of the same order.
    pub prev: Option<ExecId>,
}
