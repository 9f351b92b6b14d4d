//! The submission pipeline: the public client-side operations.
//!
//! Place, cancel, modify, mass-cancel and flush create or overwrite
//! requests and drive them through the readiness gate. Requests that
//! cannot be sent now become indications; nothing here ever blocks.

use chrono::Utc;
use tracing::{error, info, warn};

use crate::error::{OmsError, Result};
use crate::manager::OrderManager;
use crate::protocol::{MassCancelFilter, ProtocolEngine};
use omx_core::{
    EventTimes, Instrument, OrderId, OrderType, Price, Qty, ReqId, ReqKind, ReqStatus,
    RequestDraft, Side, StrategyId, TimeInForce, TimeStamp,
};

/// Arguments for placing a new order.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub owner: StrategyId,
    pub instrument: Instrument,
    pub side: Side,
    pub order_type: OrderType,
    /// Required for Limit/Stop, forbidden for Market. Rounded to the
    /// instrument tick; callers need not pre-round.
    pub price: Option<Price>,
    pub qty: Qty,
    /// Displayed quantity; defaults to fully visible. An order placed
    /// with show < qty is an iceberg for its whole lifetime.
    pub qty_show: Option<Qty>,
    /// Minimum fill quantity; defaults to none.
    pub qty_min: Option<Qty>,
    pub is_aggressive: bool,
    pub time_in_force: Option<TimeInForce>,
    /// YYYYMMDD, required for GoodTillDate.
    pub expire_date: u32,
    pub event_times: EventTimes,
    /// Ask the protocol engine to buffer rather than send immediately.
    /// A recommendation only: ignored by engines without batch support.
    pub batch: bool,
}

/// Requested amendments for a modify; `None` fields keep the target's
/// current values.
#[derive(Debug, Clone, Default)]
pub struct Amendment {
    pub price: Option<Price>,
    pub qty: Option<Qty>,
    pub qty_show: Option<Qty>,
    pub qty_min: Option<Qty>,
}

impl OrderManager {
    //-----------------------------------------------------------------
    // Place
    //-----------------------------------------------------------------

    /// Place a new order.
    ///
    /// Validates and normalizes the arguments, books risk (a risk
    /// rejection aborts placement with nothing allocated), allocates
    /// the order and its first request, and attempts transmission.
    pub fn place_order<P: ProtocolEngine>(
        &mut self,
        engine: &mut P,
        args: PlaceOrder,
    ) -> Result<OrderId> {
        let created_at = Utc::now();

        // Price presence must be consistent with the order type.
        let price = match (args.order_type, args.price) {
            (OrderType::Market, Some(_)) => {
                return Err(OmsError::InvalidArgument(
                    "market order must not carry a price".into(),
                ))
            }
            (OrderType::Market, None) => {
                if !self.config.has_market_orders {
                    return Err(OmsError::InvalidArgument(
                        "venue does not support market orders".into(),
                    ));
                }
                None
            }
            (_, None) => {
                return Err(OmsError::InvalidArgument(format!(
                    "{} order requires a price",
                    args.order_type
                )))
            }
            (_, Some(px)) => Some(px.round_to_tick(args.instrument.price_step)),
        };

        if !args.qty.is_positive() {
            return Err(OmsError::InvalidArgument(format!(
                "qty {} must be positive",
                args.qty
            )));
        }
        let mut qty_show = args.qty_show.unwrap_or(args.qty);
        let mut qty_min = args.qty_min.unwrap_or(Qty::ZERO);
        if qty_show.is_negative() || qty_min.is_negative() {
            return Err(OmsError::InvalidArgument(format!(
                "show {qty_show} / min {qty_min} must not be negative"
            )));
        }
        qty_show.min_with(args.qty);
        qty_min.min_with(args.qty);
        let is_iceberg = qty_show < args.qty;

        // Risk first: a declined booking aborts before any allocation.
        let is_buy = args.side == Side::Buy;
        self.risk_book(
            &args.instrument,
            is_buy,
            price,
            args.qty,
            None,
            Qty::ZERO,
            args.event_times.strat,
        )?;

        let order_id = self.arena.alloc_order(
            args.instrument,
            args.side,
            args.order_type,
            args.time_in_force,
            args.expire_date,
            args.owner,
            is_iceberg,
        )?;
        let req_id = self.arena.alloc_request(
            order_id,
            RequestDraft::new_order(
                ReqKind::New,
                price,
                args.qty,
                qty_show,
                qty_min,
                args.is_aggressive,
                args.event_times,
                created_at,
            ),
            true,
        )?;

        self.try_send(engine, None, req_id, None, true, args.batch, created_at)?;
        Ok(order_id)
    }

    //-----------------------------------------------------------------
    // Cancel
    //-----------------------------------------------------------------

    /// Request cancellation of an order.
    ///
    /// Returns `Ok(false)`, with no state mutated, when the order is
    /// already inactive or already has a cancel outstanding, unless the
    /// outstanding work is an unconfirmed emulated new-leg, which may
    /// still need cancelling. A still-unsent (Indicated) latest request
    /// is overwritten in place instead of creating wire traffic.
    pub fn cancel_order<P: ProtocolEngine>(
        &mut self,
        engine: &mut P,
        order_id: OrderId,
        event_times: EventTimes,
        batch: bool,
    ) -> Result<bool> {
        let created_at = Utc::now();

        // The one exception to the inactive/cancel-pending refusal: a
        // live unconfirmed new-leg is not covered by the outstanding
        // cancel and may still need to die.
        let exempt_leg = self.unconfirmed_new_leg(order_id);
        {
            let order = self.arena.order(order_id);
            if (order.inactive || order.pending_cancel.is_some()) && exempt_leg.is_none() {
                return Ok(false);
            }
        }

        let last = self
            .arena
            .order(order_id)
            .last_req
            .expect("order always has at least one request");

        let (clx, target, is_new) = if self.arena.request(last).status == ReqStatus::Indicated {
            let prev = self.arena.request(last).prev;
            let prev_indicated =
                prev.is_some_and(|p| self.arena.request(p).status == ReqStatus::Indicated);
            if let (Some(prev), true) = (prev, prev_indicated) {
                // Two indications can only be an unsent tandem pair.
                // The new-leg is failed in place (its own cancel is
                // redundant: the parent cancel supersedes it) and the
                // cancel-leg is promoted to a full Cancel.
                debug_assert_eq!(self.arena.request(last).kind, ReqKind::NewLeg);
                debug_assert_eq!(self.arena.request(prev).kind, ReqKind::CancelLeg);
                self.arena.request_mut(last).status = ReqStatus::Failed;
                let target = self.arena.request(prev).target.ok_or_else(|| {
                    OmsError::desync("cancel_order", format_args!("cancel-leg {prev} lacks a target"))
                })?;
                self.arena.request_mut(prev).overwrite_with(RequestDraft::cancel(
                    ReqKind::Cancel,
                    target,
                    event_times,
                    created_at,
                ))?;
                (prev, target, false)
            } else {
                let kind = self.arena.request(last).kind;
                match kind {
                    ReqKind::New | ReqKind::NewLeg => {
                        // Never sent: cancelled synchronously in place,
                        // without any wire message.
                        self.cancelled_in_place(engine, order_id, last, created_at);
                        return Ok(true);
                    }
                    ReqKind::Modify => {
                        let target = self.arena.request(last).target.ok_or_else(|| {
                            OmsError::desync(
                                "cancel_order",
                                format_args!("modify {last} lacks a target"),
                            )
                        })?;
                        self.arena.request_mut(last).overwrite_with(RequestDraft::cancel(
                            ReqKind::Cancel,
                            target,
                            event_times,
                            created_at,
                        ))?;
                        (last, target, false)
                    }
                    other => {
                        return Err(OmsError::desync(
                            "cancel_order",
                            format_args!("unexpected indicated {other} at the chain tail"),
                        ))
                    }
                }
            }
        } else {
            let target = if let Some(t) = self.find_target(order_id, false)? {
                t
            } else if let Some(leg) = exempt_leg {
                leg
            } else {
                return Ok(false);
            };
            let clx = self.arena.alloc_request(
                order_id,
                RequestDraft::cancel(ReqKind::Cancel, target, event_times, created_at),
                true,
            )?;
            (clx, target, true)
        };

        self.check_target(order_id, Some(target), false)?;

        self.try_send(engine, Some(target), clx, None, is_new, batch, created_at)?;
        self.arena.order_mut(order_id).pending_cancel = Some(clx);
        Ok(true)
    }

    /// The order's latest live request, if it is an emulated new-leg
    /// that has been sent but not confirmed yet.
    fn unconfirmed_new_leg(&self, order_id: OrderId) -> Option<ReqId> {
        let mut cursor = self.arena.order(order_id).last_req;
        while let Some(rid) = cursor {
            let req = self.arena.request(rid);
            if !req.kind.is_cancel_kind() && req.status != ReqStatus::Failed {
                if req.kind == ReqKind::NewLeg
                    && req.status >= ReqStatus::Sent
                    && req.status < ReqStatus::Confirmed
                {
                    return Some(rid);
                }
                return None;
            }
            cursor = req.prev;
        }
        None
    }

    /// Synchronous cancellation of a request that was never sent. Not
    /// venue-originated, so there is no exchange timestamp.
    fn cancelled_in_place<P: ProtocolEngine>(
        &mut self,
        engine: &mut P,
        order_id: OrderId,
        req_id: ReqId,
        now: TimeStamp,
    ) {
        self.cancelled_impl(engine, order_id, None, req_id, false, None, now);
    }

    /// Cancel a stray live new-leg with an unattached cancel-leg.
    ///
    /// The cancel-leg points at the order but never appears as its
    /// latest request, and its kind keeps the order from being marked
    /// cancel-pending: this kills one leg, not the whole order.
    pub(crate) fn cancel_new_leg<P: ProtocolEngine>(
        &mut self,
        engine: &mut P,
        orig: ReqId,
        exch_time: Option<TimeStamp>,
        recv_time: TimeStamp,
    ) -> Result<()> {
        debug_assert_eq!(self.arena.request(orig).kind, ReqKind::NewLeg);
        let order_id = self.arena.request(orig).order;
        let created_at = Utc::now();
        let clx = self.arena.alloc_request(
            order_id,
            RequestDraft::cancel(
                ReqKind::CancelLeg,
                orig,
                EventTimes::new(exch_time, Some(recv_time), None),
                created_at,
            ),
            false,
        )?;
        self.try_send(
            engine,
            Some(orig),
            clx,
            None,
            true,
            engine.has_batch_send(),
            created_at,
        )?;
        Ok(())
    }

    //-----------------------------------------------------------------
    // Modify
    //-----------------------------------------------------------------

    /// Request modification of an order's price and/or quantities.
    ///
    /// Returns `Ok(false)` when the order cannot be modified (inactive,
    /// cancel-pending, unmodifiable part-fill) or when the validated
    /// parameters equal the current ones. Silent, since a no-op
    /// modify is an expected negative, not an error.
    #[allow(clippy::too_many_arguments)]
    pub fn modify_order<P: ProtocolEngine>(
        &mut self,
        engine: &mut P,
        order_id: OrderId,
        amend: Amendment,
        is_aggressive: bool,
        event_times: EventTimes,
        batch: bool,
    ) -> Result<bool> {
        let created_at = Utc::now();

        {
            let order = self.arena.order(order_id);
            if order.inactive || order.pending_cancel.is_some() {
                return Ok(false);
            }
        }
        if amend.price.is_none() && amend.qty.is_none() {
            return Err(OmsError::InvalidArgument(
                "modify with neither price nor qty".into(),
            ));
        }

        let tandem = !self.config.has_atomic_modify;
        debug_assert_eq!(engine.has_atomic_modify(), !tandem);

        let last = self
            .arena
            .order(order_id)
            .last_req
            .expect("order always has at least one request");

        // Overwrite existing indications, or create fresh request(s).
        let (req0, req1, target, is_new) =
            if self.arena.request(last).status == ReqStatus::Indicated {
                let prev = self.arena.request(last).prev;
                let prev_indicated =
                    prev.is_some_and(|p| self.arena.request(p).status == ReqStatus::Indicated);
                let (req0, req1, target) = if let (Some(prev), true) = (prev, prev_indicated) {
                    // Unsent tandem pair: stays a pair, target that of
                    // the cancel-leg.
                    debug_assert!(tandem);
                    let target = self.arena.request(prev).target.ok_or_else(|| {
                        OmsError::desync(
                            "modify_order",
                            format_args!("cancel-leg {prev} lacks a target"),
                        )
                    })?;
                    (Some(prev), last, Some(target))
                } else {
                    (None, last, self.arena.request(last).target)
                };

                let resolved = match target {
                    Some(t) => {
                        let Some(r) = self.check_modify_params(order_id, t, &amend)? else {
                            return Ok(false);
                        };
                        r
                    }
                    None => {
                        // Modifying a still-unsent New: amendments fall
                        // back to the request's own current values.
                        self.resolve_against(order_id, req1, &amend)?
                    }
                };

                // A modified New stays a New with new parameters; only
                // price, quantities and timestamps are rewritten.
                {
                    let req = self.arena.request_mut(req1);
                    req.price = Some(resolved.0);
                    req.qty = resolved.1;
                    req.leaves_qty = resolved.1; // yet unfilled
                    req.qty_show = resolved.2;
                    req.qty_min = resolved.3;
                    req.is_aggressive = is_aggressive;
                    req.event_times = event_times;
                    req.created_at = created_at;
                }
                if let Some(req0) = req0 {
                    let req = self.arena.request_mut(req0);
                    req.event_times = event_times;
                    req.created_at = created_at;
                }
                (req0, req1, target, false)
            } else {
                let Some(target) = self.find_target(order_id, true)? else {
                    return Ok(false);
                };
                let Some(resolved) = self.check_modify_params(order_id, target, &amend)? else {
                    return Ok(false);
                };
                let (px, qty, show, min) = resolved;
                if tandem {
                    let req0 = self.arena.alloc_request(
                        order_id,
                        RequestDraft::cancel(ReqKind::CancelLeg, target, event_times, created_at),
                        true,
                    )?;
                    let req1 = self.arena.alloc_request(
                        order_id,
                        RequestDraft::new_order(
                            ReqKind::NewLeg,
                            Some(px),
                            qty,
                            show,
                            min,
                            is_aggressive,
                            event_times,
                            created_at,
                        ),
                        true,
                    )?;
                    (Some(req0), req1, Some(target), true)
                } else {
                    let req1 = self.arena.alloc_request(
                        order_id,
                        RequestDraft::modify(
                            target,
                            Some(px),
                            qty,
                            show,
                            min,
                            is_aggressive,
                            event_times,
                            created_at,
                        ),
                        true,
                    )?;
                    (None, req1, Some(target), true)
                }
            };

        self.check_target(order_id, target, true)?;

        // Book the intended exposure change. The old terms come from
        // the target, or from the request's pre-overwrite values when
        // an unsent New was amended in place.
        let (old_px, old_qty) = match target {
            Some(t) => {
                let t = self.arena.request(t);
                (t.price, t.qty)
            }
            None => {
                let r = self.arena.request(req1);
                (r.price, r.qty)
            }
        };
        let (new_px, new_qty, is_buy, instrument) = {
            let r = self.arena.request(req1);
            let o = self.arena.order(order_id);
            (r.price, r.qty, o.side == Side::Buy, o.instrument.clone())
        };
        self.risk_book(
            &instrument,
            is_buy,
            new_px,
            new_qty,
            old_px,
            old_qty,
            event_times.strat,
        )?;

        match req0 {
            Some(req0) => {
                self.try_send(engine, target, req0, Some(req1), is_new, batch, created_at)?
            }
            None => self.try_send(engine, target, req1, None, is_new, batch, created_at)?,
        };
        Ok(true)
    }

    /// Fill in unspecified amendment fields from the original request,
    /// normalize, and drop the no-op case.
    ///
    /// Returns `Ok(None)` when nothing would actually change.
    fn check_modify_params(
        &self,
        order_id: OrderId,
        target: ReqId,
        amend: &Amendment,
    ) -> Result<Option<(Price, Qty, Qty, Qty)>> {
        let order_type = self.arena.order(order_id).order_type;
        if !matches!(order_type, OrderType::Limit | OrderType::Stop) {
            return Err(OmsError::InvalidArgument(format!(
                "only limit and stop orders can be modified, not {order_type}"
            )));
        }
        let t = self.arena.request(target);
        let (Some(orig_px), true) = (t.price, t.qty.is_positive()) else {
            return Err(OmsError::desync(
                "modify_order",
                format_args!("target {target} has invalid price/qty"),
            ));
        };

        let tick = self.arena.order(order_id).instrument.price_step;
        let px = amend
            .price
            .map(|p| p.round_to_tick(tick))
            .unwrap_or(orig_px);
        let qty = amend.qty.filter(|q| q.is_positive()).unwrap_or(t.qty);
        let mut show = amend
            .qty_show
            .filter(|q| !q.is_negative())
            .unwrap_or(t.qty_show);
        let mut min = amend
            .qty_min
            .filter(|q| !q.is_negative())
            .unwrap_or(t.qty_min);
        show.min_with(qty);
        min.min_with(qty);

        if px == orig_px && qty == t.qty && show == t.qty_show && min == t.qty_min {
            info!(order = %order_id, "Modify skipped: price and quantities unchanged");
            return Ok(None);
        }
        Ok(Some((px, qty, show, min)))
    }

    /// Variant of `check_modify_params` for an unsent New amended in
    /// place: the request itself provides the fallback values.
    fn resolve_against(
        &self,
        order_id: OrderId,
        req: ReqId,
        amend: &Amendment,
    ) -> Result<(Price, Qty, Qty, Qty)> {
        let r = self.arena.request(req);
        let orig_px = r.price.ok_or_else(|| {
            OmsError::desync("modify_order", format_args!("request {req} lacks a price"))
        })?;
        let tick = self.arena.order(order_id).instrument.price_step;
        let px = amend
            .price
            .map(|p| p.round_to_tick(tick))
            .unwrap_or(orig_px);
        let qty = amend.qty.filter(|q| q.is_positive()).unwrap_or(r.qty);
        let mut show = amend
            .qty_show
            .filter(|q| !q.is_negative())
            .unwrap_or(r.qty_show);
        let mut min = amend
            .qty_min
            .filter(|q| !q.is_negative())
            .unwrap_or(r.qty_min);
        show.min_with(qty);
        min.min_with(qty);
        Ok((px, qty, show, min))
    }

    /// Qualify the target of a cancel or modify. Market, IOC and FOK
    /// orders are presumed to fill or die instantly and cannot be
    /// acted on.
    fn check_target(&self, order_id: OrderId, target: Option<ReqId>, is_modify: bool) -> Result<()> {
        let Some(target) = target else {
            debug_assert!(is_modify);
            return Ok(());
        };
        let order = self.arena.order(order_id);
        if order.order_type == OrderType::Market
            || matches!(
                order.time_in_force,
                TimeInForce::ImmediateOrCancel | TimeInForce::FillOrKill
            )
        {
            return Err(OmsError::InvalidArgument(
                "market, IOC and FOK orders cannot be cancelled or modified".into(),
            ));
        }
        let t = self.arena.request(target);
        if t.kind.is_cancel_kind() || t.status > ReqStatus::PartFilled || t.will_fail {
            return Err(OmsError::desync(
                "check_target",
                format_args!(
                    "target {target} not actionable: kind={} status={} will_fail={}",
                    t.kind, t.status, t.will_fail
                ),
            ));
        }
        Ok(())
    }

    //-----------------------------------------------------------------
    // Mass cancel
    //-----------------------------------------------------------------

    /// Cancel all orders matching the filter.
    ///
    /// Delegates to the venue's native mass-cancel when available;
    /// otherwise scans the arena in reverse allocation order and issues
    /// individual cancels. Mass-cancel is usually urgent, so an
    /// inactive transport is logged as an error rather than queued.
    pub fn cancel_all_orders<P: ProtocolEngine>(
        &mut self,
        engine: &mut P,
        filter: &MassCancelFilter,
    ) -> Result<()> {
        if !engine.is_active() {
            error!("cancel_all_orders: protocol engine is not active");
            return Ok(());
        }
        if engine.has_native_mass_cancel() {
            // Native path: the venue does the sweeping; no cancel
            // requests are installed locally, and the one-off message
            // is not throttled.
            engine.mass_cancel(filter)?;
            return Ok(());
        }

        let now = Utc::now();
        let times = EventTimes::new(None, Some(now), Some(now));
        let mut any = false;
        let ids: Vec<OrderId> = self.arena.order_ids_rev().collect();
        for order_id in ids {
            let skip = {
                let order = self.arena.order(order_id);
                order.inactive
                    || order.pending_cancel.is_some()
                    || !filter.matches(order.owner, &order.instrument, order.side)
            };
            if skip {
                continue;
            }
            // Individual sends: never batch-buffered, the sweep may be
            // larger than any send buffer.
            if self.cancel_order(engine, order_id, times, false)? {
                any = true;
            }
        }
        if !any {
            warn!(?filter, "cancel_all_orders: no applicable orders");
        }
        Ok(())
    }

    //-----------------------------------------------------------------
    // Flush
    //-----------------------------------------------------------------

    /// Force transmission of batch-buffered requests and back-propagate
    /// the resulting send timestamp onto them.
    pub fn flush_orders<P: ProtocolEngine>(&mut self, engine: &mut P) -> Result<Option<TimeStamp>> {
        if !engine.is_active() {
            error!("flush_orders: protocol engine is not active");
            return Ok(None);
        }
        let sent_at = engine.flush()?;
        if let Some(ts) = sent_at {
            self.back_propagate_send_ts(ts);
        }
        self.buffered_sends = 0;
        Ok(sent_at)
    }
}
