//! The reconciliation engine: handlers for inbound protocol events.
//!
//! These are invoked by the protocol layer when the venue reports
//! acknowledgement, confirmation, replacement, cancellation, rejection
//! or execution. Each handler resolves the referenced requests
//! (falling back to venue-id lookup where the dialect omits client
//! ids), verifies venue-assigned ids against our records, mutates the
//! arena, may release queued indications, and finally notifies the
//! risk manager and the owning strategy.
//!
//! All handlers are idempotent with respect to already-terminal state:
//! redelivery of a stale event is logged and otherwise ignored. Within
//! one order, events are applied strictly in arrival order; no handler
//! ever blocks or re-enters.

use tracing::{error, info, warn};

use crate::classify::{classify, FillDecision};
use crate::error::Result;
use crate::manager::{
    OrderManager, ANY_KIND, CANCEL_KINDS, CXL_REJ_KINDS, FILLABLE_KINDS, NEW_KINDS, REPLACE_KINDS,
};
use crate::protocol::ProtocolEngine;
use omx_core::{
    ExecId, OrderId, Price, Qty, ReqId, ReqKind, ReqStatus, SeqNum, Side, TimeStamp,
};

/// Confirmation of a New (or emulated new-leg) request.
#[derive(Debug, Clone)]
pub struct ConfirmReport {
    pub req: ReqId,
    pub order: Option<OrderId>,
    pub venue_id: Option<String>,
    pub md_entry_id: Option<String>,
    /// Hint only; mismatch rejects the candidate request.
    pub price: Option<Price>,
    /// Hint only; mismatch is warned, not fatal.
    pub leaves_qty: Option<Qty>,
    pub exch_time: Option<TimeStamp>,
    pub recv_time: TimeStamp,
}

/// Confirmation of an atomic replace: `req` supersedes `orig`.
#[derive(Debug, Clone)]
pub struct ReplaceReport {
    pub req: ReqId,
    /// Absent in dialects that do not echo it; recovered from our own
    /// target record.
    pub orig: Option<ReqId>,
    pub order: Option<OrderId>,
    pub venue_id: Option<String>,
    pub orig_venue_id: Option<String>,
    pub md_entry_id: Option<String>,
    pub price: Option<Price>,
    pub leaves_qty: Option<Qty>,
    pub exch_time: Option<TimeStamp>,
    pub recv_time: TimeStamp,
}

/// Venue-reported cancellation of `orig`.
#[derive(Debug, Clone)]
pub struct CancelReport {
    /// The cancelling request; absent for venue-side mass-cancel or
    /// cancel-on-disconnect.
    pub cancel_req: Option<ReqId>,
    pub orig: Option<ReqId>,
    pub order: Option<OrderId>,
    /// Venue id of the cancelled order (not of the cancel itself).
    pub venue_id: Option<String>,
    pub md_entry_id: Option<String>,
    pub orig_price: Option<Price>,
    pub orig_leaves_qty: Option<Qty>,
    pub exch_time: Option<TimeStamp>,
    pub recv_time: TimeStamp,
}

/// Venue rejection of a request (application level).
#[derive(Debug, Clone)]
pub struct RejectReport {
    pub req: Option<ReqId>,
    /// Fallback lookup key when the dialect reports only sequence
    /// numbers.
    pub seq: Option<SeqNum>,
    pub order: Option<OrderId>,
    /// Protocol hint that the referenced order no longer exists.
    pub non_existent: Option<bool>,
    pub code: i32,
    pub text: String,
    pub exch_time: Option<TimeStamp>,
    pub recv_time: TimeStamp,
}

/// Venue rejection of a Cancel or Modify.
#[derive(Debug, Clone)]
pub struct CancelRejectReport {
    pub req: ReqId,
    pub orig: Option<ReqId>,
    pub order: Option<OrderId>,
    pub venue_id: Option<String>,
    /// Protocol hint that the target was actually filled.
    pub filled: Option<bool>,
    /// Protocol hint that the target no longer exists (it did exist,
    /// but does not any more; not "never heard of it").
    pub non_existent: Option<bool>,
    pub code: i32,
    pub text: String,
    pub exch_time: Option<TimeStamp>,
    pub recv_time: TimeStamp,
}

/// Venue-reported execution.
#[derive(Debug, Clone)]
pub struct TradeReport {
    pub req: Option<ReqId>,
    pub order: Option<OrderId>,
    pub venue_id: Option<String>,
    pub md_entry_id: Option<String>,
    /// Exchange execution id, used for de-duplication. Normally
    /// present.
    pub exec_id: Option<String>,
    /// Our side as reported; checked against the order.
    pub our_side: Option<Side>,
    pub aggressor: Option<Side>,
    /// Price of the order (hint for request resolution).
    pub orig_price: Option<Price>,
    /// Trade price. Required.
    pub price: Price,
    /// Trade quantity. Required, positive.
    pub qty: Qty,
    /// Venue-reported remaining quantity after this trade.
    pub leaves_qty: Option<Qty>,
    /// Venue-reported "order completely filled" flag.
    pub filled: Option<bool>,
    pub fee: Option<Qty>,
    /// Settlement date as YYYYMMDD; 0 if not reported.
    pub settl_date: u32,
    pub exch_time: Option<TimeStamp>,
    pub recv_time: TimeStamp,
}

/// Transport-level (session) rejection reference.
#[derive(Debug, Clone, Copy)]
pub enum SessionRef {
    Seq(SeqNum),
    Req(ReqId),
}

/// Transport-level rejection: the request never reached the matching
/// engine.
#[derive(Debug, Clone)]
pub struct SessionRejectReport {
    pub req: SessionRef,
    pub order: Option<OrderId>,
    pub reason: String,
    pub exch_time: Option<TimeStamp>,
    pub recv_time: TimeStamp,
}

impl OrderManager {
    //-----------------------------------------------------------------
    // Acknowledged
    //-----------------------------------------------------------------

    /// Session-level acknowledgement: the request reached the venue
    /// but is not confirmed yet. No timestamps or callbacks.
    pub fn on_acknowledged(
        &mut self,
        req: ReqId,
        order: Option<OrderId>,
        price: Option<Price>,
        leaves_qty: Option<Qty>,
    ) -> Result<()> {
        let found =
            self.resolve_request(Some(req), order, ANY_KIND, price, leaves_qty, "on_acknowledged")?;
        let Some(rid) = self.require(found, "on_acknowledged", "acknowledged request not found")?
        else {
            return Ok(());
        };
        let r = self.arena.request_mut(rid);
        if r.status < ReqStatus::Acked {
            r.status = ReqStatus::Acked;
        }
        Ok(())
    }

    //-----------------------------------------------------------------
    // Confirmed / Replaced
    //-----------------------------------------------------------------

    /// Venue confirmation of a New or emulated new-leg request.
    pub fn on_confirmed<P: ProtocolEngine>(
        &mut self,
        engine: &mut P,
        report: ConfirmReport,
    ) -> Result<Option<ReqId>> {
        self.throttler.refresh(report.recv_time);
        let Some((rid, prev_status)) = self.confirm_impl(
            Some(report.req),
            report.order,
            report.venue_id.as_deref(),
            report.md_entry_id.as_deref(),
            report.price,
            report.leaves_qty,
            report.exch_time,
            report.recv_time,
            NEW_KINDS,
            true,
            "on_confirmed",
        )?
        else {
            return Ok(None);
        };

        // Dependents parked behind this request can go out now.
        let order_id = self.arena.request(rid).order;
        self.send_indications_on_event(engine, order_id, report.recv_time);

        if prev_status < ReqStatus::Confirmed {
            self.notify_confirm(rid);
        }
        Ok(Some(rid))
    }

    /// Venue confirmation of an atomic replace (Modify only; the
    /// tandem emulation reports through `on_cancelled` instead).
    pub fn on_replaced<P: ProtocolEngine>(
        &mut self,
        engine: &mut P,
        report: ReplaceReport,
    ) -> Result<Option<ReqId>> {
        self.throttler.refresh(report.recv_time);
        let Some((curr, prev_status)) = self.confirm_impl(
            Some(report.req),
            report.order,
            report.venue_id.as_deref(),
            report.md_entry_id.as_deref(),
            report.price,
            report.leaves_qty,
            report.exch_time,
            report.recv_time,
            &[ReqKind::Modify],
            true,
            "on_replaced",
        )?
        else {
            return Ok(None);
        };

        let orig_id = report.orig.or(self.arena.request(curr).target);
        let mut orig =
            self.resolve_request(orig_id, report.order, REPLACE_KINDS, None, None, "on_replaced")?;
        if orig.is_none() {
            if let Some(vid) = report.orig_venue_id.as_deref() {
                orig = self.arena.request_by_venue_id(vid);
            }
        }
        let Some(orig) = self.require(orig, "on_replaced", "replaced request not found")? else {
            return Ok(None);
        };

        self.check_target_id(curr, orig_id, "on_replaced");
        let order_id = self.same_order(curr, orig, "on_replaced")?;

        // Release indications waiting on the replacement's
        // confirmation. The replaced predecessor cannot be a
        // dependency: its dependent was the replacement itself.
        self.send_indications_on_event(engine, order_id, report.recv_time);

        // The predecessor ends here; no strategy callback and no risk
        // update for it (the modification was booked at submission).
        {
            let o = self.arena.request_mut(orig);
            if !o.status.is_terminal() {
                o.status = ReqStatus::Replaced;
                o.ended_exch_at = report.exch_time;
                o.ended_conn_at = Some(report.recv_time);
            }
        }

        if prev_status < ReqStatus::Confirmed {
            self.notify_confirm(curr);
        }
        Ok(Some(curr))
    }

    /// Shared confirmation back-end: resolve, verify venue ids, and
    /// promote to Confirmed (unless already further advanced). Returns
    /// the request and its previous status.
    #[allow(clippy::too_many_arguments)]
    fn confirm_impl(
        &mut self,
        req: Option<ReqId>,
        order: Option<OrderId>,
        venue_id: Option<&str>,
        md_entry_id: Option<&str>,
        price: Option<Price>,
        leaves_qty: Option<Qty>,
        exch_time: Option<TimeStamp>,
        recv_time: TimeStamp,
        kinds: &[ReqKind],
        strict: bool,
        where_: &str,
    ) -> Result<Option<(ReqId, ReqStatus)>> {
        let found = self.resolve_request(req, order, kinds, price, leaves_qty, where_)?;
        let found = if strict {
            self.require(found, where_, "confirmed request not found")?
        } else {
            found
        };
        let Some(rid) = found else {
            return Ok(None);
        };

        if self.arena.request(rid).status == ReqStatus::Indicated {
            // A confirmation for something we never sent.
            return self
                .desync_or_none(where_, format_args!("request {rid} is still an indication"))
                .map(|o| o.map(|r| (r, ReqStatus::Indicated)));
        }

        self.apply_venue_ids(rid, venue_id, md_entry_id, where_)?;

        let prev_status = self.arena.request(rid).status;
        if prev_status < ReqStatus::Confirmed {
            let r = self.arena.request_mut(rid);
            r.status = ReqStatus::Confirmed;
            r.confirmed_exch_at = exch_time;
            r.confirmed_conn_at = Some(recv_time);
        }
        Ok(Some((rid, prev_status)))
    }

    //-----------------------------------------------------------------
    // Cancelled
    //-----------------------------------------------------------------

    /// Venue-reported cancellation.
    ///
    /// When the confirmed cancelling request is a tandem cancel-leg,
    /// the cancelled target becomes Replaced and the order stays
    /// active; otherwise the whole order goes inactive.
    pub fn on_cancelled<P: ProtocolEngine>(
        &mut self,
        engine: &mut P,
        report: CancelReport,
    ) -> Result<Option<OrderId>> {
        self.throttler.refresh(report.recv_time);

        // The cancelling request may legitimately be absent (venue-side
        // mass-cancel, cancel-on-disconnect).
        let clx = self
            .confirm_impl(
                report.cancel_req,
                report.order,
                None,
                None,
                None,
                None,
                report.exch_time,
                report.recv_time,
                CANCEL_KINDS,
                false,
                "on_cancelled",
            )?
            .map(|(rid, _)| rid);

        let orig_id = report
            .orig
            .or_else(|| clx.and_then(|c| self.arena.request(c).target));
        let mut orig = self.resolve_request(
            orig_id,
            report.order,
            FILLABLE_KINDS,
            report.orig_price,
            report.orig_leaves_qty,
            "on_cancelled",
        )?;
        if orig.is_none() {
            if let Some(vid) = report.venue_id.as_deref() {
                orig = self.arena.request_by_venue_id(vid);
            }
        }
        let Some(orig) = self.require(orig, "on_cancelled", "cancelled request not found")? else {
            return Ok(None);
        };

        self.apply_venue_ids(
            orig,
            report.venue_id.as_deref(),
            report.md_entry_id.as_deref(),
            "on_cancelled",
        )?;

        let mut is_tandem = false;
        if let Some(clx) = clx {
            if clx == orig {
                return Err(crate::error::OmsError::desync(
                    "on_cancelled",
                    format_args!("cancelling request {clx} equals its target"),
                ));
            }
            self.check_target_id(clx, Some(orig), "on_cancelled");
            self.same_order(clx, orig, "on_cancelled")?;
            is_tandem = self.arena.request(clx).kind == ReqKind::CancelLeg;
        }
        debug_assert!(!(is_tandem && self.config.has_atomic_modify));

        let order_id = self.arena.request(orig).order;
        self.cancelled_impl(
            engine,
            order_id,
            clx,
            orig,
            is_tandem,
            report.exch_time,
            report.recv_time,
        );
        Ok(Some(order_id))
    }

    /// Back-end shared by venue-reported cancellation and the
    /// synchronous in-place cancellation of a never-sent request.
    pub(crate) fn cancelled_impl<P: ProtocolEngine>(
        &mut self,
        engine: &mut P,
        order_id: OrderId,
        clx: Option<ReqId>,
        orig: ReqId,
        is_tandem: bool,
        exch_time: Option<TimeStamp>,
        recv_time: TimeStamp,
    ) {
        // The cancelled remainder leaves the exposure book.
        let (orig_px, orig_leaves) = {
            let o = self.arena.request(orig);
            (o.price, o.leaves_qty)
        };
        self.risk_unwind(order_id, None, Qty::ZERO, orig_px, orig_leaves);

        // Transition the target before the pending-walk so a never-sent
        // target ends up Cancelled rather than swept up as Failed.
        let status = self.arena.request(orig).status;
        let mut notify = false;
        if !is_tandem && status < ReqStatus::Cancelled {
            let o = self.arena.request_mut(orig);
            o.status = ReqStatus::Cancelled;
            o.ended_exch_at = exch_time;
            o.ended_conn_at = Some(recv_time);
            notify = true;
        } else if is_tandem && status < ReqStatus::Replaced {
            // Cancelled but (about to be) replaced by the new-leg: no
            // callback until the replacement goes live.
            let o = self.arena.request_mut(orig);
            o.status = ReqStatus::Replaced;
            o.ended_exch_at = exch_time;
            o.ended_conn_at = Some(recv_time);
        } else {
            info!(
                order = %order_id,
                req = %orig,
                status = %status,
                "Stale cancellation event, state unchanged"
            );
        }

        if !is_tandem {
            self.make_order_inactive(
                engine,
                order_id,
                clx.or(Some(orig)),
                exch_time,
                recv_time,
            );
        }
        if notify {
            self.notify_cancel(order_id, exch_time, recv_time);
        }
    }

    //-----------------------------------------------------------------
    // Rejected
    //-----------------------------------------------------------------

    /// Venue rejection. Primarily for New orders; a rejection that
    /// turns out to be of a Cancel/Modify is rerouted to
    /// [`on_cancel_replace_rejected`](Self::on_cancel_replace_rejected).
    pub fn on_rejected<P: ProtocolEngine>(
        &mut self,
        engine: &mut P,
        report: RejectReport,
    ) -> Result<Option<ReqId>> {
        self.throttler.refresh(report.recv_time);

        let mut found =
            self.resolve_request(report.req, report.order, ANY_KIND, None, None, "on_rejected")?;
        if found.is_none() {
            if let Some(seq) = report.seq {
                found = self.arena.request_by_seq(seq);
            }
        }
        let Some(rid) = self.require(found, "on_rejected", "rejected request not found")? else {
            return Ok(None);
        };

        let kind = self.arena.request(rid).kind;
        if CXL_REJ_KINDS.contains(&kind) {
            // Rare but possible: some dialects report every rejection
            // through one message type.
            let order = Some(self.arena.request(rid).order);
            let orig = self.arena.request(rid).target;
            return self.on_cancel_replace_rejected(
                engine,
                CancelRejectReport {
                    req: rid,
                    orig,
                    order,
                    venue_id: None,
                    filled: None,
                    non_existent: report.non_existent,
                    code: report.code,
                    text: report.text,
                    exch_time: report.exch_time,
                    recv_time: report.recv_time,
                },
            );
        }

        debug_assert!(NEW_KINDS.contains(&kind));
        let order_id = self.arena.request(rid).order;

        {
            let r = self.arena.request_mut(rid);
            if r.status >= ReqStatus::Cancelled {
                warn!(req = %rid, status = %r.status, "Rejection of an already-terminal request");
            }
            r.status = ReqStatus::Failed;
            r.ended_exch_at = report.exch_time;
            r.ended_conn_at = Some(report.recv_time);
        }
        self.arena.order_mut(order_id).fail_count += 1;

        self.make_order_inactive(engine, order_id, Some(rid), report.exch_time, report.recv_time);

        // Unwind the full rejected quantity.
        let (px, qty) = {
            let r = self.arena.request(rid);
            (r.price, r.qty)
        };
        self.risk_unwind(order_id, None, Qty::ZERO, px, qty);

        warn!(
            order = %order_id,
            req = %rid,
            kind = %kind,
            code = report.code,
            text = %report.text,
            "Order rejected"
        );
        self.notify_error(
            rid,
            report.code,
            &report.text,
            false,
            report.exch_time,
            report.recv_time,
        );
        Ok(Some(rid))
    }

    /// Venue rejection of a Cancel or Modify.
    ///
    /// May infer a *possible* fill: if the venue hints that the target
    /// no longer exists and nothing says otherwise, the target's
    /// `probably_filled` flag is raised (exactly once) and passed to
    /// the strategy instead of an error callback.
    pub fn on_cancel_replace_rejected<P: ProtocolEngine>(
        &mut self,
        engine: &mut P,
        report: CancelRejectReport,
    ) -> Result<Option<ReqId>> {
        self.throttler.refresh(report.recv_time);

        // Normalize the hints: "filled" implies "non-existent". A
        // direct contradiction means neither can be trusted.
        let mut filled = report.filled;
        let mut non_existent = report.non_existent;
        if filled == Some(true) {
            match non_existent {
                None => non_existent = Some(true),
                Some(false) => {
                    error!(
                        req = %report.req,
                        "Inconsistent hints: filled=true, non_existent=false; ignoring both"
                    );
                    filled = None;
                    non_existent = None;
                }
                Some(true) => {}
            }
        }

        let found = self.resolve_request(
            Some(report.req),
            report.order,
            CXL_REJ_KINDS,
            None,
            None,
            "on_cancel_replace_rejected",
        )?;
        let Some(rej) =
            self.require(found, "on_cancel_replace_rejected", "failed request not found")?
        else {
            return Ok(None);
        };

        let orig_id = report.orig.or(self.arena.request(rej).target);
        let orig = self.resolve_request(
            orig_id,
            report.order,
            FILLABLE_KINDS,
            None,
            None,
            "on_cancel_replace_rejected",
        )?;
        self.check_target_id(rej, orig_id, "on_cancel_replace_rejected");

        let order_id = match orig {
            Some(orig) => self.same_order(rej, orig, "on_cancel_replace_rejected")?,
            None => self.arena.request(rej).order,
        };
        if let Some(orig) = orig {
            self.apply_venue_ids(
                orig,
                report.venue_id.as_deref(),
                None,
                "on_cancel_replace_rejected",
            )?;
        }

        {
            let r = self.arena.request_mut(rej);
            r.status = ReqStatus::Failed;
            r.ended_exch_at = report.exch_time;
            r.ended_conn_at = Some(report.recv_time);
        }

        // Infer a possible fill, once only: the edge is blocked by the
        // target's probably_filled flag.
        let infer_fill = match orig {
            Some(orig) => {
                let o = self.arena.request(orig);
                filled != Some(false)
                    && non_existent != Some(false)
                    && !o.probably_filled
                    && o.status < ReqStatus::Cancelled
                    && o.price.is_some()
            }
            None => false,
        };
        if let Some(orig) = orig {
            if infer_fill {
                self.arena.request_mut(orig).probably_filled = true;
            }
        }

        self.arena.order_mut(order_id).fail_count += 1;

        if non_existent == Some(true) && !self.arena.order(order_id).inactive {
            self.make_order_inactive(engine, order_id, Some(rej), report.exch_time, report.recv_time);
        }
        if !self.arena.order(order_id).inactive {
            self.mark_pending_failing(
                engine,
                order_id,
                Some(rej),
                false,
                report.exch_time,
                report.recv_time,
            );
        }

        let rej_kind = self.arena.request(rej).kind;
        match rej_kind {
            ReqKind::Modify => {
                // Restore the target's terms in the exposure book,
                // but only when the target is positively known, or the
                // unwind could be wrong.
                if let Some(orig) = orig {
                    if self.arena.request(rej).target == Some(orig) {
                        let (orig_px, orig_qty, rej_px, rej_qty) = {
                            let o = self.arena.request(orig);
                            let r = self.arena.request(rej);
                            (o.price, o.qty, r.price, r.qty)
                        };
                        self.risk_unwind(order_id, orig_px, orig_qty, rej_px, rej_qty);
                    }
                }
            }
            ReqKind::Cancel | ReqKind::CancelLeg => {
                // A failed cancel does NOT make the order inactive: the
                // target may be alive (e.g. a cancel aimed at a modify
                // that itself failed). Only the tracked marker clears.
                if self.arena.order(order_id).pending_cancel == Some(rej) {
                    debug_assert_eq!(rej_kind, ReqKind::Cancel);
                    self.arena.order_mut(order_id).pending_cancel = None;
                }
            }
            other => {
                error!(req = %rej, kind = %other, "Unexpected kind in cancel/replace rejection");
            }
        }

        warn!(
            order = %order_id,
            req = %rej,
            kind = %rej_kind,
            code = report.code,
            text = %report.text,
            non_existent = ?non_existent,
            inferred_fill = infer_fill,
            "Cancel/replace rejected"
        );
        if !infer_fill {
            self.notify_error(
                rej,
                report.code,
                &report.text,
                false,
                report.exch_time,
                report.recv_time,
            );
        }
        Ok(Some(rej))
    }

    //-----------------------------------------------------------------
    // Traded
    //-----------------------------------------------------------------

    /// Venue-reported execution.
    ///
    /// Returns the id of the newly recorded execution, or `None` when
    /// the event was a duplicate or otherwise skipped.
    pub fn on_traded<P: ProtocolEngine>(
        &mut self,
        engine: &mut P,
        report: TradeReport,
    ) -> Result<Option<ExecId>> {
        self.throttler.refresh(report.recv_time);

        if !report.qty.is_positive() {
            warn!(req = ?report.req, qty = %report.qty, "Trade with non-positive qty, skipping");
            return Ok(None);
        }

        // Resolve and implicitly confirm: a traded request is at least
        // Confirmed. The pre-trade leaves estimate sharpens resolution.
        let est_prev_leaves = report.leaves_qty.map(|l| l + report.qty);
        let Some((rid, _)) = self.confirm_impl(
            report.req,
            report.order,
            report.venue_id.as_deref(),
            report.md_entry_id.as_deref(),
            report.orig_price,
            est_prev_leaves,
            report.exch_time,
            report.recv_time,
            FILLABLE_KINDS,
            true,
            "on_traded",
        )?
        else {
            return Ok(None);
        };

        // A fill may already have been inferred from a cancel/replace
        // failure; re-delivery of the real thing changes nothing.
        {
            let r = self.arena.request(rid);
            let already_filled = r.status == ReqStatus::Filled;
            let leaves_zero = r.leaves_qty.is_zero();
            if already_filled || leaves_zero {
                if already_filled != leaves_zero {
                    warn!(
                        req = %rid,
                        status = %r.status,
                        leaves = %r.leaves_qty,
                        "Status and leaves-qty disagree on a repeated trade"
                    );
                }
                info!(req = %rid, "Trade for an already-filled request, skipping");
                return Ok(None);
            }
        }

        let order_id = self.arena.request(rid).order;
        {
            let order = self.arena.order(order_id);
            let status = self.arena.request(rid).status;
            if order.inactive || status.is_terminal() {
                warn!(
                    order = %order_id,
                    req = %rid,
                    status = %status,
                    "Trade on an inactive order, processing anyway"
                );
            }
            // The protocol's side report is advisory; ours is binding.
            if let Some(side) = report.our_side {
                if side != order.side {
                    error!(
                        order = %order_id,
                        req = %rid,
                        ours = %order.side,
                        reported = %side,
                        "Trade side mismatch, using our record"
                    );
                }
            }
            if report.settl_date != 0
                && order.instrument.settl_date != 0
                && order.instrument.settl_date != report.settl_date
            {
                warn!(
                    order = %order_id,
                    from_protocol = report.settl_date,
                    from_instrument = order.instrument.settl_date,
                    "Settlement-date mismatch, using the instrument's"
                );
            }
        }

        // De-duplicate BEFORE touching any quantities: a redelivered
        // execution must not decrement leaves a second time, or the
        // leaves/recorded-executions accounting would diverge.
        if self.config.has_exec_ids
            && self.arena.execution_recorded(order_id, report.exec_id.as_deref())
        {
            info!(
                req = %rid,
                exec_id = ?report.exec_id,
                "Execution already recorded, ignoring redelivery"
            );
            return Ok(None);
        }

        let prev_leaves = self.arena.request(rid).leaves_qty;
        let decision = classify(rid, prev_leaves, report.qty, report.leaves_qty, report.filled);

        // Apply the decided quantities.
        let trade_qty = decision.qty();
        {
            let r = self.arena.request_mut(rid);
            r.leaves_qty = match decision {
                FillDecision::Complete { .. } => Qty::ZERO,
                FillDecision::Partial { leaves, .. } => leaves,
            };
            r.probably_filled = true; // no more inferred-fill signals
        }
        {
            let order = self.arena.order_mut(order_id);
            order.cum_filled_qty = order.cum_filled_qty + trade_qty;
        }

        match decision {
            FillDecision::Complete { .. } => {
                {
                    let r = self.arena.request_mut(rid);
                    r.status = ReqStatus::Filled;
                    r.ended_exch_at = report.exch_time;
                    r.ended_conn_at = Some(report.recv_time);
                }
                self.make_order_inactive(
                    engine,
                    order_id,
                    Some(rid),
                    report.exch_time,
                    report.recv_time,
                );
            }
            FillDecision::Partial { .. } => {
                self.arena.request_mut(rid).status = ReqStatus::PartFilled;
                if !self.config.has_part_filled_modify {
                    // Pending modifications of a part-filled order are
                    // doomed on this venue.
                    self.mark_pending_failing(
                        engine,
                        order_id,
                        Some(rid),
                        true,
                        report.exch_time,
                        report.recv_time,
                    );
                }
            }
        }

        // Fee: venue-reported, or estimated from the instrument rates.
        let fee = report.fee.or_else(|| {
            let order = self.arena.order(order_id);
            let aggressive = report
                .aggressor
                .map(|a| a == order.side)
                .unwrap_or(self.arena.request(rid).is_aggressive);
            order
                .instrument
                .fee_rate(aggressive)
                .map(|rate| Qty::new(trade_qty.inner() * report.price.inner() * rate))
        });
        if fee.is_none() {
            warn!(req = %rid, "Fee neither reported nor computable");
        }

        let Some(exec_id) = self.arena.record_execution(
            rid,
            report.exec_id.clone(),
            report.price,
            trade_qty,
            fee,
            report.aggressor,
            report.exch_time,
            report.recv_time,
        )
        else {
            // Duplicate execution id: recorded once, notified once.
            return Ok(None);
        };

        // Callbacks and the audit line, for fresh executions only.
        if let Some(risk) = self.risk.as_mut() {
            risk.on_trade(self.arena.execution(exec_id));
        }
        self.notify_trade(exec_id);
        self.log_trade(exec_id);

        Ok(Some(exec_id))
    }

    /// One audit line per recorded execution.
    fn log_trade(&self, exec_id: ExecId) {
        let exec = self.arena.execution(exec_id);
        let order = self.arena.order(exec.order);
        info!(
            target: "omx::trades",
            exec = %exec_id,
            order = %exec.order,
            req = %exec.request,
            venue_exec_id = ?exec.venue_exec_id,
            symbol = %order.instrument.symbol,
            side = %order.side,
            qty = %exec.qty,
            price = %exec.price,
            fee = ?exec.fee,
            settl_date = order.instrument.settl_date,
            owner = %order.owner,
            "trade"
        );
    }

    //-----------------------------------------------------------------
    // Session-level rejection
    //-----------------------------------------------------------------

    /// Transport-level rejection: the request never reached the
    /// matching engine, so state management is simpler than for an
    /// application-level reject.
    pub fn on_session_rejected<P: ProtocolEngine>(
        &mut self,
        engine: &mut P,
        report: SessionRejectReport,
    ) -> Result<Option<ReqId>> {
        self.throttler.refresh(report.recv_time);

        let found = match report.req {
            SessionRef::Seq(seq) => self.arena.request_by_seq(seq),
            SessionRef::Req(rid) => self.resolve_request(
                Some(rid),
                report.order,
                ANY_KIND,
                None,
                None,
                "on_session_rejected",
            )?,
        };
        let Some(rej) =
            self.require(found, "on_session_rejected", "session-rejected request not found")?
        else {
            return Ok(None);
        };

        let order_id = self.arena.request(rej).order;
        {
            let r = self.arena.request_mut(rej);
            if r.status >= ReqStatus::Cancelled {
                warn!(req = %rej, status = %r.status, "Session rejection of a terminal request");
            }
            r.status = ReqStatus::Failed;
            r.ended_exch_at = report.exch_time;
            r.ended_conn_at = Some(report.recv_time);
        }
        self.arena.order_mut(order_id).fail_count += 1;

        let kind = self.arena.request(rej).kind;
        match kind {
            ReqKind::Modify => {
                let target = self.arena.request(rej).target;
                let orig = self.resolve_request(
                    target,
                    Some(order_id),
                    REPLACE_KINDS,
                    None,
                    None,
                    "on_session_rejected",
                )?;
                if let Some(orig) =
                    self.require(orig, "on_session_rejected", "modify target not found")?
                {
                    let (orig_px, orig_qty, rej_px, rej_qty) = {
                        let o = self.arena.request(orig);
                        let r = self.arena.request(rej);
                        (o.price, o.qty, r.price, r.qty)
                    };
                    self.risk_unwind(order_id, orig_px, orig_qty, rej_px, rej_qty);
                }
            }
            ReqKind::New | ReqKind::NewLeg => {
                // A session-rejected New fails the whole order.
                if !self.arena.order(order_id).inactive {
                    self.make_order_inactive(
                        engine,
                        order_id,
                        Some(rej),
                        report.exch_time,
                        report.recv_time,
                    );
                }
                let (px, qty) = {
                    let r = self.arena.request(rej);
                    (r.price, r.qty)
                };
                self.risk_unwind(order_id, None, Qty::ZERO, px, qty);
            }
            ReqKind::Cancel | ReqKind::CancelLeg => {
                if self.arena.order(order_id).pending_cancel == Some(rej) {
                    debug_assert_eq!(kind, ReqKind::Cancel);
                    self.arena.order_mut(order_id).pending_cancel = None;
                }
            }
        }

        if !self.arena.order(order_id).inactive {
            self.mark_pending_failing(
                engine,
                order_id,
                Some(rej),
                false,
                report.exch_time,
                report.recv_time,
            );
        }

        warn!(
            order = %order_id,
            req = %rej,
            kind = %kind,
            reason = %report.reason,
            "Request rejected by session"
        );
        self.notify_error(rej, 0, &report.reason, false, report.exch_time, report.recv_time);
        Ok(Some(rej))
    }
}
