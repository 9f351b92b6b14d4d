//! Fixed-capacity, append-only storage for orders, requests and
//! executions.
//!
//! Records are addressed by monotonically increasing ids; a record's
//! slot index is `id - base`, where the bases come from the persisted
//! counters, so ids keep increasing across process restarts while the
//! venue session lives on. Lookup is O(1); allocation is strictly
//! sequential and nothing is ever recycled, so an id's ordinal position
//! also orders it in time.
//!
//! Capacity violations panic: running out of arena space is a sizing
//! misconfiguration, not a recoverable condition.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use omx_core::{
    CoreError, ExecId, Execution, Instrument, Order, OrderId, OrderType, Price, Qty, ReqId,
    ReqKind, ReqStatus, Request, RequestDraft, SeqNum, Side, StrategyId, TimeInForce, TimeStamp,
};

/// Persisted allocation counters.
///
/// These must survive process restarts whenever the venue session
/// itself is not reset; the caller loads them at start and checkpoints
/// them externally. Id 0 is reserved, so fresh state starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaState {
    pub next_order_id: u64,
    pub next_req_id: u64,
    pub next_exec_id: u64,
}

impl Default for ArenaState {
    fn default() -> Self {
        Self {
            next_order_id: 1,
            next_req_id: 1,
            next_exec_id: 1,
        }
    }
}

/// Append-only tables for the order state, plus the auxiliary lookup
/// maps maintained for inbound-event resolution.
#[derive(Debug)]
pub struct Arena {
    orders: Vec<Order>,
    requests: Vec<Request>,
    executions: Vec<Execution>,
    order_base: u64,
    req_base: u64,
    exec_base: u64,
    max_orders: usize,
    max_requests: usize,
    max_executions: usize,
    /// Venue-assigned id -> request, maintained only when configured.
    by_venue_id: HashMap<String, ReqId>,
    use_venue_id_map: bool,
    has_exec_ids: bool,
}

impl Arena {
    pub fn new(
        max_orders: usize,
        max_requests: usize,
        max_executions: usize,
        use_venue_id_map: bool,
        has_exec_ids: bool,
        state: ArenaState,
    ) -> Self {
        assert!(
            state.next_order_id >= 1 && state.next_req_id >= 1 && state.next_exec_id >= 1,
            "arena counters must start at 1"
        );
        Self {
            orders: Vec::with_capacity(max_orders.min(4096)),
            requests: Vec::with_capacity(max_requests.min(4096)),
            executions: Vec::with_capacity(max_executions.min(4096)),
            order_base: state.next_order_id,
            req_base: state.next_req_id,
            exec_base: state.next_exec_id,
            max_orders,
            max_requests,
            max_executions,
            by_venue_id: HashMap::new(),
            use_venue_id_map,
            has_exec_ids,
        }
    }

    /// Snapshot of the allocation counters, for external checkpointing.
    pub fn state(&self) -> ArenaState {
        ArenaState {
            next_order_id: self.order_base + self.orders.len() as u64,
            next_req_id: self.req_base + self.requests.len() as u64,
            next_exec_id: self.exec_base + self.executions.len() as u64,
        }
    }

    //-----------------------------------------------------------------
    // Allocation
    //-----------------------------------------------------------------

    /// Allocate a new order record. Panics when the arena is full.
    #[allow(clippy::too_many_arguments)]
    pub fn alloc_order(
        &mut self,
        instrument: Instrument,
        side: Side,
        order_type: OrderType,
        time_in_force: Option<TimeInForce>,
        expire_date: u32,
        owner: StrategyId,
        is_iceberg: bool,
    ) -> Result<OrderId, CoreError> {
        assert!(
            self.orders.len() < self.max_orders,
            "order arena exhausted at {} records: sizing misconfiguration",
            self.max_orders
        );
        let id = OrderId(self.order_base + self.orders.len() as u64);
        let order = Order::new(
            id,
            instrument,
            side,
            order_type,
            time_in_force,
            expire_date,
            owner,
            is_iceberg,
        )?;
        self.orders.push(order);
        Ok(id)
    }

    /// Allocate a new request from a draft.
    ///
    /// With `attach` the request is linked onto the tail of the order's
    /// chronological chain; an unattached request (used to cancel a
    /// stray new-leg) still records its owning order but never appears
    /// as the order's latest request. Panics when the arena is full.
    pub fn alloc_request(
        &mut self,
        order_id: OrderId,
        draft: RequestDraft,
        attach: bool,
    ) -> Result<ReqId, CoreError> {
        assert!(
            self.requests.len() < self.max_requests,
            "request arena exhausted at {} records: sizing misconfiguration",
            self.max_requests
        );
        let id = ReqId(self.req_base + self.requests.len() as u64);
        let mut req = Request::from_draft(id, order_id, draft)?;

        let order = self.order_mut(order_id);
        if attach {
            if order.first_req.is_none() && !req.qty.is_positive() {
                return Err(CoreError::InvalidQty(format!(
                    "order {order_id}: first request must have positive qty"
                )));
            }
            req.prev = order.last_req;
            if order.first_req.is_none() {
                order.first_req = Some(id);
            }
            order.last_req = Some(id);
        }
        let prev = req.prev;
        self.requests.push(req);
        if let Some(prev) = prev {
            self.request_mut(prev).next = Some(id);
        }
        Ok(id)
    }

    //-----------------------------------------------------------------
    // O(1) lookup
    //-----------------------------------------------------------------

    fn order_index(&self, id: OrderId) -> usize {
        let idx = id
            .0
            .checked_sub(self.order_base)
            .unwrap_or_else(|| panic!("order id {id} precedes arena base {}", self.order_base));
        assert!(
            (idx as usize) < self.orders.len(),
            "order id {id} out of range (next is {})",
            self.order_base + self.orders.len() as u64
        );
        idx as usize
    }

    fn req_index(&self, id: ReqId) -> usize {
        let idx = id
            .0
            .checked_sub(self.req_base)
            .unwrap_or_else(|| panic!("request id {id} precedes arena base {}", self.req_base));
        assert!(
            (idx as usize) < self.requests.len(),
            "request id {id} out of range (next is {})",
            self.req_base + self.requests.len() as u64
        );
        idx as usize
    }

    pub fn order(&self, id: OrderId) -> &Order {
        &self.orders[self.order_index(id)]
    }

    pub fn order_mut(&mut self, id: OrderId) -> &mut Order {
        let idx = self.order_index(id);
        &mut self.orders[idx]
    }

    pub fn request(&self, id: ReqId) -> &Request {
        &self.requests[self.req_index(id)]
    }

    pub fn request_mut(&mut self, id: ReqId) -> &mut Request {
        let idx = self.req_index(id);
        &mut self.requests[idx]
    }

    pub fn execution(&self, id: ExecId) -> &Execution {
        let idx = id
            .0
            .checked_sub(self.exec_base)
            .unwrap_or_else(|| panic!("execution id {id} precedes arena base {}", self.exec_base));
        &self.executions[idx as usize]
    }

    /// Whether `id` refers to an allocated request.
    pub fn contains_request(&self, id: ReqId) -> bool {
        id.0 >= self.req_base && id.0 < self.req_base + self.requests.len() as u64
    }

    pub fn contains_order(&self, id: OrderId) -> bool {
        id.0 >= self.order_base && id.0 < self.order_base + self.orders.len() as u64
    }

    /// Id of the most recently allocated request, if any.
    pub fn last_allocated_req(&self) -> Option<ReqId> {
        if self.requests.is_empty() {
            None
        } else {
            Some(ReqId(self.req_base + self.requests.len() as u64 - 1))
        }
    }

    /// Order ids in reverse allocation order (mass-cancel scans newest
    /// first, to shed the most recent exposure with the lowest latency).
    pub fn order_ids_rev(&self) -> impl Iterator<Item = OrderId> + '_ {
        let base = self.order_base;
        (0..self.orders.len() as u64).rev().map(move |i| OrderId(base + i))
    }

    //-----------------------------------------------------------------
    // Auxiliary lookups
    //-----------------------------------------------------------------

    /// Record a venue-id mapping for a confirmed request.
    pub fn map_venue_id(&mut self, venue_id: &str, req: ReqId) {
        if !self.use_venue_id_map || venue_id.is_empty() {
            return;
        }
        match self.by_venue_id.get(venue_id) {
            None => {
                self.by_venue_id.insert(venue_id.to_owned(), req);
            }
            Some(stored) if *stored != req => {
                // First confirmation wins; a different request under the
                // same venue id indicates venue-side id reuse.
                warn!(venue_id, stored = %stored, new = %req, "Venue id maps to a different request");
            }
            Some(_) => {}
        }
    }

    /// Resolve a request by venue-assigned id. Last-resort lookup for
    /// protocols that omit client ids on some events.
    pub fn request_by_venue_id(&self, venue_id: &str) -> Option<ReqId> {
        if !self.use_venue_id_map || venue_id.is_empty() {
            return None;
        }
        self.by_venue_id.get(venue_id).copied()
    }

    /// Resolve a request by transport sequence number. Linear scan;
    /// only used on failed-order paths.
    pub fn request_by_seq(&self, seq: SeqNum) -> Option<ReqId> {
        self.requests
            .iter()
            .find(|r| r.seq_num == Some(seq))
            .map(|r| r.id)
    }

    //-----------------------------------------------------------------
    // Order-level derived queries (chain traversals)
    //-----------------------------------------------------------------

    /// The unfilled remainder of the order: the leaves quantity of the
    /// latest non-cancel request.
    pub fn order_leaves_qty(&self, id: OrderId) -> Qty {
        let mut cursor = self.order(id).last_req;
        while let Some(rid) = cursor {
            let req = self.request(rid);
            if !req.kind.is_cancel_kind() {
                return req.leaves_qty;
            }
            cursor = req.prev;
        }
        Qty::ZERO
    }

    /// Whether the order's ultimate fate was a complete fill.
    pub fn order_is_filled(&self, id: OrderId) -> bool {
        if !self.order(id).inactive {
            return false;
        }
        let mut cursor = self.order(id).last_req;
        while let Some(rid) = cursor {
            let req = self.request(rid);
            if !req.kind.is_cancel_kind() {
                match req.status {
                    ReqStatus::Filled => return true,
                    ReqStatus::Cancelled => return false,
                    _ => {}
                }
            }
            cursor = req.prev;
        }
        false
    }

    /// Whether the order's ultimate fate was cancellation.
    pub fn order_is_cancelled(&self, id: OrderId) -> bool {
        if !self.order(id).inactive {
            return false;
        }
        let mut cursor = self.order(id).last_req;
        while let Some(rid) = cursor {
            let req = self.request(rid);
            if req.kind == ReqKind::Cancel && req.status == ReqStatus::Confirmed {
                return true;
            }
            match req.status {
                ReqStatus::Cancelled => return true,
                ReqStatus::Filled => return false,
                _ => {}
            }
            cursor = req.prev;
        }
        false
    }

    /// Whether the order failed outright: only a failure of its very
    /// first request can fail the whole order.
    pub fn order_has_failed(&self, id: OrderId) -> bool {
        let order = self.order(id);
        if !order.inactive {
            return false;
        }
        order
            .first_req
            .is_some_and(|rid| self.request(rid).status == ReqStatus::Failed)
    }

    //-----------------------------------------------------------------
    // Executions
    //-----------------------------------------------------------------

    /// Whether an execution with this venue id (or a second empty-id
    /// execution) is already recorded for the order.
    pub fn execution_recorded(&self, order_id: OrderId, venue_exec_id: Option<&str>) -> bool {
        let mut cursor = self.order(order_id).last_exec;
        while let Some(eid) = cursor {
            let ex = self.execution(eid);
            if ex.venue_exec_id.as_deref() == venue_exec_id {
                return true;
            }
            cursor = ex.prev;
        }
        false
    }

    /// Record a venue-reported trade against `req`, de-duplicating by
    /// venue execution id within the owning order.
    ///
    /// Returns `None` when the execution was already recorded (same
    /// non-empty id seen before, or a second empty-id execution).
    #[allow(clippy::too_many_arguments)]
    pub fn record_execution(
        &mut self,
        req_id: ReqId,
        venue_exec_id: Option<String>,
        price: Price,
        qty: Qty,
        fee: Option<Qty>,
        aggressor: Option<Side>,
        exch_time: Option<TimeStamp>,
        recv_time: TimeStamp,
    ) -> Option<ExecId> {
        debug_assert!(qty.is_positive());
        let order_id = self.request(req_id).order;

        if self.has_exec_ids && self.execution_recorded(order_id, venue_exec_id.as_deref()) {
            info!(
                req = %req_id,
                venue_exec_id = ?venue_exec_id,
                "Execution already recorded"
            );
            return None;
        }

        assert!(
            self.executions.len() < self.max_executions,
            "execution arena exhausted at {} records: sizing misconfiguration",
            self.max_executions
        );
        let id = ExecId(self.exec_base + self.executions.len() as u64);
        let prev = self.order(order_id).last_exec;
        self.executions.push(Execution {
            id,
            order: order_id,
            request: req_id,
            venue_exec_id,
            price,
            qty,
            fee,
            aggressor,
            exch_time,
            recv_time,
            prev,
        });
        self.order_mut(order_id).last_exec = Some(id);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use omx_core::EventTimes;
    use rust_decimal_macros::dec;

    fn arena() -> Arena {
        Arena::new(64, 64, 64, false, true, ArenaState::default())
    }

    fn instr() -> Instrument {
        Instrument::new("EUR/USD", dec!(0.00001))
    }

    fn place(arena: &mut Arena) -> (OrderId, ReqId) {
        let oid = arena
            .alloc_order(
                instr(),
                Side::Buy,
                OrderType::Limit,
                None,
                0,
                StrategyId::from_name("t"),
                false,
            )
            .unwrap();
        let rid = arena
            .alloc_request(
                oid,
                RequestDraft::new_order(
                    ReqKind::New,
                    Some(Price::new(dec!(1.1))),
                    Qty::new(dec!(100)),
                    Qty::new(dec!(100)),
                    Qty::ZERO,
                    false,
                    EventTimes::none(),
                    Utc::now(),
                ),
                true,
            )
            .unwrap();
        (oid, rid)
    }

    #[test]
    fn test_sequential_ids_and_chain() {
        let mut a = arena();
        let (oid, r1) = place(&mut a);
        assert_eq!(oid, OrderId(1));
        assert_eq!(r1, ReqId(1));

        let r2 = a
            .alloc_request(
                oid,
                RequestDraft::cancel(ReqKind::Cancel, r1, EventTimes::none(), Utc::now()),
                true,
            )
            .unwrap();
        assert_eq!(r2, ReqId(2));
        assert_eq!(a.order(oid).first_req, Some(r1));
        assert_eq!(a.order(oid).last_req, Some(r2));
        assert_eq!(a.request(r1).next, Some(r2));
        assert_eq!(a.request(r2).prev, Some(r1));
    }

    #[test]
    fn test_state_serde_round_trip() {
        let state = ArenaState {
            next_order_id: 5,
            next_req_id: 9,
            next_exec_id: 2,
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: ArenaState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }

    #[test]
    fn test_state_carries_bases() {
        let state = ArenaState {
            next_order_id: 100,
            next_req_id: 500,
            next_exec_id: 7,
        };
        let mut a = Arena::new(8, 8, 8, false, true, state);
        let (oid, rid) = place(&mut a);
        assert_eq!(oid, OrderId(100));
        assert_eq!(rid, ReqId(500));
        assert_eq!(a.state().next_order_id, 101);
        assert_eq!(a.state().next_req_id, 501);
    }

    #[test]
    fn test_unattached_request_not_on_chain() {
        let mut a = arena();
        let (oid, r1) = place(&mut a);
        let r2 = a
            .alloc_request(
                oid,
                RequestDraft::cancel(ReqKind::CancelLeg, r1, EventTimes::none(), Utc::now()),
                false,
            )
            .unwrap();
        assert_eq!(a.order(oid).last_req, Some(r1));
        assert_eq!(a.request(r2).order, oid);
        assert!(a.request(r2).prev.is_none());
    }

    #[test]
    fn test_execution_dedup_by_venue_id() {
        let mut a = arena();
        let (_, r1) = place(&mut a);
        let now = Utc::now();
        let e1 = a.record_execution(
            r1,
            Some("X1".into()),
            Price::new(dec!(1.1)),
            Qty::new(dec!(40)),
            None,
            None,
            None,
            now,
        );
        assert!(e1.is_some());
        let dup = a.record_execution(
            r1,
            Some("X1".into()),
            Price::new(dec!(1.1)),
            Qty::new(dec!(40)),
            None,
            None,
            None,
            now,
        );
        assert!(dup.is_none());
        let e2 = a.record_execution(
            r1,
            Some("X2".into()),
            Price::new(dec!(1.1)),
            Qty::new(dec!(60)),
            None,
            None,
            None,
            now,
        );
        assert!(e2.is_some());
    }

    #[test]
    fn test_single_empty_exec_id() {
        let mut a = arena();
        let (_, r1) = place(&mut a);
        let now = Utc::now();
        assert!(a
            .record_execution(
                r1,
                None,
                Price::new(dec!(1.1)),
                Qty::new(dec!(100)),
                None,
                None,
                None,
                now,
            )
            .is_some());
        assert!(a
            .record_execution(
                r1,
                None,
                Price::new(dec!(1.1)),
                Qty::new(dec!(100)),
                None,
                None,
                None,
                now,
            )
            .is_none());
    }

    #[test]
    fn test_order_leaves_qty_skips_cancels() {
        let mut a = arena();
        let (oid, r1) = place(&mut a);
        a.alloc_request(
            oid,
            RequestDraft::cancel(ReqKind::Cancel, r1, EventTimes::none(), Utc::now()),
            true,
        )
        .unwrap();
        assert_eq!(a.order_leaves_qty(oid), Qty::new(dec!(100)));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_lookup_panics_out_of_range() {
        let a = arena();
        let _ = a.request(ReqId(1));
    }
}
