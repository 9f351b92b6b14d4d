//! The order manager: shared state and internal helpers.
//!
//! `OrderManager` owns the arena, throttler and indication queue, and
//! carries the strategy registry and risk manager. The public
//! submission operations live in `submit`, the inbound-event handlers
//! in `reconcile`; both are `impl OrderManager` blocks.
//!
//! The whole engine runs on one logical thread driven by an external
//! event loop; methods take `&mut self` and never block.

use std::collections::HashMap;

use tracing::{error, warn};

use crate::arena::{Arena, ArenaState};
use crate::config::OmsConfig;
use crate::error::{OmsError, Result};
use crate::indications::IndicationQueue;
use crate::protocol::ProtocolEngine;
use crate::risk::{RiskManager, RiskOrderUpdate};
use crate::strategy::Strategy;
use crate::throttle::Throttler;
use omx_core::{
    OrderId, Price, Qty, ReqId, ReqKind, ReqStatus, SeqNum, StrategyId, TimeStamp,
};

/// Request-kind sets used when resolving inbound events.
pub(crate) const ANY_KIND: &[ReqKind] = &[
    ReqKind::New,
    ReqKind::Modify,
    ReqKind::Cancel,
    ReqKind::CancelLeg,
    ReqKind::NewLeg,
];
pub(crate) const NEW_KINDS: &[ReqKind] = &[ReqKind::New, ReqKind::NewLeg];
pub(crate) const CANCEL_KINDS: &[ReqKind] = &[ReqKind::Cancel, ReqKind::CancelLeg];
pub(crate) const FILLABLE_KINDS: &[ReqKind] = &[ReqKind::New, ReqKind::Modify, ReqKind::NewLeg];
pub(crate) const REPLACE_KINDS: &[ReqKind] = &[ReqKind::New, ReqKind::Modify];
pub(crate) const CXL_REJ_KINDS: &[ReqKind] =
    &[ReqKind::Cancel, ReqKind::Modify, ReqKind::CancelLeg];

/// Protocol-facing order-management engine.
pub struct OrderManager {
    pub(crate) config: OmsConfig,
    pub(crate) arena: Arena,
    pub(crate) throttler: Throttler,
    pub(crate) indications: IndicationQueue,
    pub(crate) strategies: HashMap<StrategyId, Box<dyn Strategy>>,
    pub(crate) risk: Option<Box<dyn RiskManager>>,
    /// Requests buffered (batch mode) since the last flush; bounds the
    /// depth of send-timestamp back-propagation.
    pub(crate) buffered_sends: u32,
}

impl OrderManager {
    /// Create an engine with fresh counters.
    pub fn new(config: OmsConfig) -> Result<Self> {
        Self::with_state(config, ArenaState::default())
    }

    /// Create an engine resuming from persisted counters.
    pub fn with_state(config: OmsConfig, state: ArenaState) -> Result<Self> {
        config.validate()?;
        let arena = Arena::new(
            config.max_orders,
            config.max_requests,
            config.max_executions,
            config.use_venue_id_map,
            config.has_exec_ids,
            state,
        );
        let throttler = Throttler::new(config.max_reqs_per_window, config.throttle_window_secs);
        let indications = IndicationQueue::new(config.max_indications);
        Ok(Self {
            config,
            arena,
            throttler,
            indications,
            strategies: HashMap::new(),
            risk: None,
            buffered_sends: 0,
        })
    }

    pub fn config(&self) -> &OmsConfig {
        &self.config
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Counters for external checkpointing.
    pub fn state(&self) -> ArenaState {
        self.arena.state()
    }

    /// Number of queued (unsent) indications.
    pub fn pending_indications(&self) -> usize {
        self.indications.len()
    }

    /// Register the strategy that will receive callbacks for orders it
    /// owns. A later registration under the same id replaces the
    /// earlier one.
    pub fn subscribe(&mut self, id: StrategyId, strategy: Box<dyn Strategy>) {
        self.strategies.insert(id, strategy);
    }

    pub fn set_risk_manager(&mut self, risk: Box<dyn RiskManager>) {
        self.risk = Some(risk);
    }

    //-----------------------------------------------------------------
    // Request resolution
    //-----------------------------------------------------------------

    /// Resolve an inbound event's request reference.
    ///
    /// Returns `Ok(None)` when no acceptable request was found; in
    /// strict (non-relaxed) mode hard inconsistencies are errors.
    /// When only the order is known and a cancel is sought, falls back
    /// to the order's latest non-indicated Cancel (mass-cancel and
    /// similar unsolicited cancellations).
    pub(crate) fn resolve_request(
        &self,
        id: Option<ReqId>,
        order_hint: Option<OrderId>,
        kinds: &[ReqKind],
        price: Option<Price>,
        leaves: Option<Qty>,
        where_: &str,
    ) -> Result<Option<ReqId>> {
        if let Some(id) = id {
            if !self.arena.contains_request(id) {
                return self.desync_or_none(where_, format_args!("unknown request id {id}"));
            }
            let req = self.arena.request(id);
            if let Some(oid) = order_hint {
                if req.order != oid {
                    return self.desync_or_none(
                        where_,
                        format_args!(
                            "request {id} belongs to order {} not {oid}",
                            req.order
                        ),
                    );
                }
            }
            if !kinds.contains(&req.kind) {
                warn!(
                    where_,
                    req = %id,
                    kind = %req.kind,
                    "Request kind does not match the event, rejecting"
                );
                return Ok(None);
            }
            if let Some(px) = price {
                if req.price.is_some() && req.price != Some(px) {
                    warn!(
                        where_,
                        req = %id,
                        proto_px = %px,
                        req_px = ?req.price,
                        "Price mismatch, rejecting this request"
                    );
                    return Ok(None);
                }
            }
            if let Some(lv) = leaves {
                if req.leaves_qty != lv {
                    // Protocol-supplied leaves can be stale; accept anyway.
                    warn!(
                        where_,
                        req = %id,
                        proto_leaves = %lv,
                        req_leaves = %req.leaves_qty,
                        "Leaves-qty mismatch, still accepting"
                    );
                }
            }
            return Ok(Some(id));
        }

        // No request id: a cancel may be resolvable through the order's
        // pending-cancel state, but only where Cancel requests are
        // unique per order (atomic-modify venues).
        if kinds.contains(&ReqKind::Cancel) && self.config.has_atomic_modify {
            if let Some(oid) = order_hint.filter(|o| self.arena.contains_order(*o)) {
                let order = self.arena.order(oid);
                if order.pending_cancel.is_some() {
                    let mut cursor = order.last_req;
                    while let Some(rid) = cursor {
                        let req = self.arena.request(rid);
                        if req.kind == ReqKind::Cancel && req.status != ReqStatus::Indicated {
                            return Ok(Some(rid));
                        }
                        cursor = req.prev;
                    }
                }
            }
        }
        Ok(None)
    }

    /// Hard-inconsistency escape hatch: error in strict mode, warn and
    /// continue with "not found" in relaxed mode.
    pub(crate) fn desync_or_none(
        &self,
        where_: &str,
        what: std::fmt::Arguments<'_>,
    ) -> Result<Option<ReqId>> {
        if self.config.relaxed {
            warn!(where_, "{what} (relaxed mode, continuing)");
            Ok(None)
        } else {
            Err(OmsError::desync(where_, what))
        }
    }

    /// Like `desync_or_none` but for paths that must have a request.
    pub(crate) fn require(
        &self,
        found: Option<ReqId>,
        where_: &str,
        what: &str,
    ) -> Result<Option<ReqId>> {
        match found {
            Some(id) => Ok(Some(id)),
            None => self.desync_or_none(where_, format_args!("{what}")),
        }
    }

    /// Both requests must belong to the same order.
    pub(crate) fn same_order(&self, a: ReqId, b: ReqId, where_: &str) -> Result<OrderId> {
        let oa = self.arena.request(a).order;
        let ob = self.arena.request(b).order;
        if oa != ob {
            return Err(OmsError::desync(
                where_,
                format_args!("request {a} (order {oa}) and {b} (order {ob}) disagree"),
            ));
        }
        Ok(oa)
    }

    //-----------------------------------------------------------------
    // Venue-assigned ids
    //-----------------------------------------------------------------

    /// Install or verify the venue-assigned ids on a request.
    ///
    /// A conflicting already-installed id means the event refers to a
    /// different order than we think: without this check, bogus
    /// cancellations and fills could corrupt the book.
    pub(crate) fn apply_venue_ids(
        &mut self,
        req_id: ReqId,
        venue_id: Option<&str>,
        md_entry_id: Option<&str>,
        where_: &str,
    ) -> Result<()> {
        if let Some(vid) = venue_id.filter(|v| !v.is_empty()) {
            let req = self.arena.request_mut(req_id);
            match &req.venue_id {
                None => req.venue_id = Some(vid.to_owned()),
                Some(stored) if stored != vid => {
                    let stored = stored.clone();
                    if self.config.relaxed {
                        warn!(where_, req = %req_id, %stored, new = vid, "Venue id mismatch");
                    } else {
                        return Err(OmsError::desync(
                            where_,
                            format_args!(
                                "request {req_id}: inconsistent venue ids: old={stored} new={vid}"
                            ),
                        ));
                    }
                }
                Some(_) => {}
            }
            self.arena.map_venue_id(vid, req_id);
        }
        if let Some(mid) = md_entry_id.filter(|m| !m.is_empty()) {
            let req = self.arena.request_mut(req_id);
            match &req.md_entry_id {
                None => req.md_entry_id = Some(mid.to_owned()),
                Some(stored) if stored != mid => {
                    let stored = stored.clone();
                    if self.config.relaxed {
                        warn!(where_, req = %req_id, %stored, new = mid, "MD entry id mismatch");
                    } else {
                        return Err(OmsError::desync(
                            where_,
                            format_args!(
                                "request {req_id}: inconsistent md entry ids: old={stored} new={mid}"
                            ),
                        ));
                    }
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Cross-check the recorded target id against the one reported by
    /// the protocol. Mismatch is logged, not raised.
    pub(crate) fn check_target_id(&self, req_id: ReqId, reported: Option<ReqId>, where_: &str) {
        let recorded = self.arena.request(req_id).target;
        if reported.is_some() && recorded != reported {
            error!(
                where_,
                req = %req_id,
                recorded = ?recorded,
                reported = ?reported,
                "Target-id mismatch between our record and the protocol"
            );
        }
    }

    //-----------------------------------------------------------------
    // Target selection for Cancel / Modify
    //-----------------------------------------------------------------

    /// Latest request that can serve as the subject of a Cancel or
    /// Modify: skips failed/failing and cancel-type requests; a request
    /// at `Cancelled` or later (other than `Replaced`) means the order
    /// is done and there is nothing to act on.
    ///
    /// `Ok(None)` when no further action is possible (inactive,
    /// cancel-pending, or unmodifiable part-fill); not an error.
    pub(crate) fn find_target(&self, order_id: OrderId, is_modify: bool) -> Result<Option<ReqId>> {
        let order = self.arena.order(order_id);
        let part_fill_ok =
            !is_modify || order.last_exec.is_none() || self.config.has_part_filled_modify;
        if order.inactive || order.pending_cancel.is_some() || !part_fill_ok {
            warn!(
                order = %order_id,
                inactive = order.inactive,
                cancel_pending = order.pending_cancel.is_some(),
                "No target: order cannot be acted on"
            );
            return Ok(None);
        }

        let mut cursor = order.last_req;
        while let Some(rid) = cursor {
            let req = self.arena.request(rid);
            if req.status == ReqStatus::Failed || req.will_fail || req.kind.is_cancel_kind() {
                cursor = req.prev;
                continue;
            }
            if req.status >= ReqStatus::Cancelled {
                if req.status != ReqStatus::Replaced {
                    error!(
                        order = %order_id,
                        req = %rid,
                        status = %req.status,
                        "Unexpected terminal request while the order is active"
                    );
                }
                break;
            }
            return Ok(Some(rid));
        }
        Err(OmsError::desync(
            "find_target",
            format_args!("order {order_id}: active but no actionable request found"),
        ))
    }

    //-----------------------------------------------------------------
    // Order-level failure propagation
    //-----------------------------------------------------------------

    /// Mark the whole order inactive (write-once) and propagate failure
    /// to its still-pending requests.
    pub(crate) fn make_order_inactive<P: ProtocolEngine>(
        &mut self,
        engine: &mut P,
        order_id: OrderId,
        from: Option<ReqId>,
        exch_time: Option<TimeStamp>,
        recv_time: TimeStamp,
    ) {
        let order = self.arena.order_mut(order_id);
        if order.inactive {
            warn!(order = %order_id, "Order is already inactive");
        }
        order.inactive = true;
        order.pending_cancel = None;
        self.mark_pending_failing(engine, order_id, from, false, exch_time, recv_time);
    }

    /// After `from` failed (or was part-filled on a venue that cannot
    /// modify part-fills), mark its pending successors:
    /// - unsent indications are failed in place (no callbacks: the
    ///   primary event carries the news);
    /// - live new-legs are actively cancelled, since nothing else will
    ///   kill them before they trade;
    /// - everything else is annotated `will_fail`, and a failing
    ///   tracked Cancel clears the order's pending-cancel marker.
    pub(crate) fn mark_pending_failing<P: ProtocolEngine>(
        &mut self,
        engine: &mut P,
        order_id: OrderId,
        from: Option<ReqId>,
        is_part_fill: bool,
        exch_time: Option<TimeStamp>,
        recv_time: TimeStamp,
    ) {
        enum Action {
            FailInPlace(ReqId),
            CancelLiveLeg(ReqId),
            WillFail(ReqId),
        }

        let forward = from.is_some();
        let mut actions = Vec::new();
        let mut cursor = match from {
            Some(rid) => self.arena.request(rid).next,
            None => self.arena.order(order_id).last_req,
        };
        while let Some(rid) = cursor {
            let req = self.arena.request(rid);
            // Walking backwards, stop at the first already-terminal
            // request: everything before it was settled earlier.
            if !forward && req.status >= ReqStatus::Cancelled {
                break;
            }
            if req.status == ReqStatus::Indicated {
                actions.push(Action::FailInPlace(rid));
            } else {
                if req.kind == ReqKind::NewLeg {
                    actions.push(Action::CancelLiveLeg(rid));
                }
                let spared = req.kind == ReqKind::NewLeg
                    || (is_part_fill
                        && (self.config.has_part_filled_modify
                            || (req.kind == ReqKind::Cancel && req.target == from)));
                if !spared {
                    actions.push(Action::WillFail(rid));
                }
            }
            cursor = if forward { req.next } else { req.prev };
        }

        let mut did_cancel = false;
        for action in actions {
            match action {
                Action::FailInPlace(rid) => {
                    self.arena.request_mut(rid).status = ReqStatus::Failed;
                }
                Action::CancelLiveLeg(rid) => {
                    if let Err(e) = self.cancel_new_leg(engine, rid, exch_time, recv_time) {
                        warn!(req = %rid, error = %e, "Failed to cancel a live new-leg");
                    } else {
                        did_cancel = true;
                    }
                }
                Action::WillFail(rid) => {
                    let kind = {
                        let req = self.arena.request_mut(rid);
                        req.will_fail = true;
                        req.kind
                    };
                    if kind == ReqKind::Cancel
                        && self.arena.order(order_id).pending_cancel == Some(rid)
                    {
                        self.arena.order_mut(order_id).pending_cancel = None;
                    }
                }
            }
        }

        if did_cancel && engine.has_batch_send() {
            if let Err(e) = self.flush_orders(engine) {
                warn!(order = %order_id, error = %e, "Flush after leg-cancel failed");
            }
        }
    }

    //-----------------------------------------------------------------
    // Send stamping
    //-----------------------------------------------------------------

    /// Promote requests to Sent and apply the wire stamp. A tandem pair
    /// occupies consecutive sequence numbers.
    pub(crate) fn apply_send_stamp(
        &mut self,
        ids: &[ReqId],
        stamp: crate::protocol::SendStamp,
        batch: bool,
    ) {
        for (i, rid) in ids.iter().enumerate() {
            let req = self.arena.request_mut(*rid);
            req.status = ReqStatus::Sent;
            req.sent_at = stamp.sent_at;
            req.seq_num = Some(SeqNum(stamp.first_seq.0 + i as u64));
        }
        if batch {
            self.buffered_sends += stamp.msgs;
        } else {
            self.buffered_sends = 0;
        }
    }

    /// Propagate a flush-time send timestamp backwards onto requests
    /// that were batch-buffered without one.
    pub(crate) fn back_propagate_send_ts(&mut self, sent_at: TimeStamp) {
        let Some(last) = self.arena.last_allocated_req() else {
            return;
        };
        let mut walked = 0u32;
        let mut id = last.0;
        while id >= 1 && walked < self.buffered_sends {
            let rid = ReqId(id);
            if !self.arena.contains_request(rid) {
                break;
            }
            let req = self.arena.request_mut(rid);
            if req.sent_at.is_none() {
                if req.status >= ReqStatus::Sent {
                    req.sent_at = Some(sent_at);
                }
            } else {
                // A stamped request bounds the buffered run.
                break;
            }
            walked += 1;
            id -= 1;
        }
    }

    //-----------------------------------------------------------------
    // Collaborator dispatch
    //-----------------------------------------------------------------

    pub(crate) fn notify_confirm(&mut self, req_id: ReqId) {
        let owner = self.arena.order(self.arena.request(req_id).order).owner;
        if let Some(strat) = self.strategies.get_mut(&owner) {
            let req = self.arena.request(req_id);
            if let Err(e) = strat.on_confirm(req) {
                warn!(req = %req_id, error = %e, "Strategy on_confirm failed");
            }
        }
    }

    pub(crate) fn notify_cancel(
        &mut self,
        order_id: OrderId,
        exch_time: Option<TimeStamp>,
        recv_time: TimeStamp,
    ) {
        let owner = self.arena.order(order_id).owner;
        if let Some(strat) = self.strategies.get_mut(&owner) {
            let order = self.arena.order(order_id);
            if let Err(e) = strat.on_cancel(order, exch_time, recv_time) {
                warn!(order = %order_id, error = %e, "Strategy on_cancel failed");
            }
        }
    }

    pub(crate) fn notify_trade(&mut self, exec_id: omx_core::ExecId) {
        let exec = self.arena.execution(exec_id);
        let owner = self.arena.order(exec.order).owner;
        if let Some(strat) = self.strategies.get_mut(&owner) {
            let exec = self.arena.execution(exec_id);
            if let Err(e) = strat.on_own_trade(exec) {
                warn!(exec = %exec_id, error = %e, "Strategy on_own_trade failed");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn notify_error(
        &mut self,
        req_id: ReqId,
        code: i32,
        text: &str,
        probably_filled: bool,
        exch_time: Option<TimeStamp>,
        recv_time: TimeStamp,
    ) {
        let owner = self.arena.order(self.arena.request(req_id).order).owner;
        if let Some(strat) = self.strategies.get_mut(&owner) {
            let req = self.arena.request(req_id);
            if let Err(e) =
                strat.on_order_error(req, code, text, probably_filled, exch_time, recv_time)
            {
                warn!(req = %req_id, error = %e, "Strategy on_order_error failed");
            }
        }
    }

    /// Book real exposure; an error aborts the caller's operation.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn risk_book(
        &mut self,
        instrument: &omx_core::Instrument,
        is_buy: bool,
        new_px: Option<Price>,
        new_qty: Qty,
        old_px: Option<Price>,
        old_qty: Qty,
        ts: Option<TimeStamp>,
    ) -> Result<()> {
        if let Some(risk) = self.risk.as_mut() {
            risk.on_order(&RiskOrderUpdate {
                is_real: true,
                instrument,
                is_buy,
                new_px,
                new_qty,
                old_px,
                old_qty,
                ts,
            })?;
        }
        Ok(())
    }

    /// Unwind exposure; errors are logged, never propagated.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn risk_unwind(
        &mut self,
        order_id: OrderId,
        new_px: Option<Price>,
        new_qty: Qty,
        old_px: Option<Price>,
        old_qty: Qty,
    ) {
        let Some(risk) = self.risk.as_mut() else {
            return;
        };
        let order = self.arena.order(order_id);
        let update = RiskOrderUpdate {
            is_real: false,
            instrument: &order.instrument,
            is_buy: order.side == omx_core::Side::Buy,
            new_px,
            new_qty,
            old_px,
            old_qty,
            ts: None,
        };
        if let Err(e) = risk.on_order(&update) {
            warn!(order = %order_id, error = %e, "Risk unwind failed");
        }
    }
}
