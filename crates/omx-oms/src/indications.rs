//! The indication queue and transmission paths.
//!
//! A request the gate has not yet admitted is an *indication*: it
//! exists in the arena but has not been sent. Indications are parked in
//! a FIFO here and retried on two paths: event-driven, when the status
//! of a request they wait on changes, and timer-driven, on the periodic
//! retry tick supplied by the embedding event loop.

use tracing::{error, warn};

use crate::error::{OmsError, Result};
use crate::manager::OrderManager;
use crate::protocol::ProtocolEngine;
use crate::ready::Readiness;
use omx_core::{OrderId, ReqId, ReqKind, ReqStatus, TimeStamp};

/// FIFO of unsent requests across all orders.
#[derive(Debug)]
pub struct IndicationQueue {
    entries: Vec<ReqId>,
    max: usize,
}

impl IndicationQueue {
    pub fn new(max: usize) -> Self {
        Self {
            entries: Vec::new(),
            max,
        }
    }

    /// Park an indication for later retry.
    ///
    /// A new indication must not be queued yet; a not-new one should
    /// already be present (it can be legitimately missing after a
    /// restart, in which case it is re-inserted with a warning).
    pub fn remember(&mut self, req: ReqId, is_new: bool) {
        let present = self.entries.contains(&req);
        if is_new {
            debug_assert!(!present, "fresh indication already queued");
            assert!(
                self.entries.len() < self.max,
                "indication queue overflow at {} entries: sizing misconfiguration",
                self.max
            );
            self.entries.push(req);
        } else if !present {
            warn!(req = %req, "Indication missing from the queue, re-inserting (restart effect?)");
            self.entries.push(req);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> &[ReqId] {
        &self.entries
    }

    pub(crate) fn retain(&mut self, mut keep: impl FnMut(ReqId) -> bool) {
        self.entries.retain(|id| keep(*id));
    }
}

impl OrderManager {
    /// Attempt to transmit one indication (or a cancel-leg/new-leg
    /// pair). If the gate refuses, the indication is parked for retry.
    ///
    /// Returns `Ok(true)` iff no throttling was encountered, which
    /// tells the timer-driven retry pass whether to continue.
    pub(crate) fn try_send<P: ProtocolEngine>(
        &mut self,
        engine: &mut P,
        target: Option<ReqId>,
        ind: ReqId,
        next_ind: Option<ReqId>,
        is_new: bool,
        batch: bool,
        now: TimeStamp,
    ) -> Result<bool> {
        debug_assert_eq!(self.arena.request(ind).status, ReqStatus::Indicated);

        let kind = self.arena.request(ind).kind;
        let batch = batch && engine.has_batch_send();

        // Resolve the dependency target from the request itself when
        // the caller does not know it (retry paths).
        let target = match target {
            Some(t) => Some(t),
            None if !kind.is_new_kind() => {
                let t = self.arena.request(ind).target;
                if t.is_none() {
                    return Err(OmsError::desync(
                        "try_send",
                        format_args!("request {ind}: {kind} without a target"),
                    ));
                }
                t
            }
            None => None,
        };

        match self.readiness(engine, ind, target, now) {
            Readiness::Ready => {}
            not_ready => {
                self.indications.remember(ind, is_new);
                if let Some(next) = next_ind {
                    self.indications.remember(next, is_new);
                }
                return Ok(not_ready != Readiness::Throttled);
            }
        }

        let free_cancel = engine.has_free_cancel() || self.config.cancels_not_throttled;
        match kind {
            ReqKind::New | ReqKind::NewLeg => {
                debug_assert!(next_ind.is_none());
                let stamp = engine.send_new(self.arena.request(ind), batch)?;
                self.apply_send_stamp(&[ind], stamp, batch);
                self.throttler.record(now);
            }
            ReqKind::Cancel => {
                debug_assert!(next_ind.is_none());
                let target = target.expect("cancel has a target");
                let stamp = engine.send_cancel(self.arena.request(ind), self.arena.request(target), batch)?;
                self.apply_send_stamp(&[ind], stamp, batch);
                if !free_cancel {
                    self.throttler.record(now);
                }
            }
            ReqKind::Modify => {
                debug_assert!(next_ind.is_none());
                let target = target.expect("modify has a target");
                let stamp = engine.send_modify(
                    None,
                    self.arena.request(ind),
                    self.arena.request(target),
                    batch,
                )?;
                self.apply_send_stamp(&[ind], stamp, batch);
                self.throttler.record(now);
            }
            ReqKind::CancelLeg => {
                let target = target.expect("cancel-leg has a target");
                // Send both legs together when the policy allows the
                // new-leg to trail a merely-sent cancel-leg and the
                // window has room for the second message.
                let pair_ok = next_ind.is_some()
                    && self.config.pipeline_policy
                        != crate::config::PipelinePolicy::WaitCancelConfirm
                    && (free_cancel || self.throttler_has_room_for_pair(now));
                if pair_ok {
                    let next = next_ind.expect("checked above");
                    debug_assert_eq!(self.arena.request(next).kind, ReqKind::NewLeg);
                    let stamp = engine.send_modify(
                        Some(self.arena.request(ind)),
                        self.arena.request(next),
                        self.arena.request(target),
                        batch,
                    )?;
                    self.apply_send_stamp(&[ind, next], stamp, batch);
                    self.throttler.record_n(now, if free_cancel { 1 } else { 2 });
                } else {
                    // Only the cancel-leg goes out; the new-leg waits
                    // in the queue for it.
                    let stamp = engine.send_cancel(
                        self.arena.request(ind),
                        self.arena.request(target),
                        batch,
                    )?;
                    self.apply_send_stamp(&[ind], stamp, batch);
                    if !free_cancel {
                        self.throttler.record(now);
                    }
                    if let Some(next) = next_ind {
                        self.indications.remember(next, is_new);
                    }
                }
            }
        }
        Ok(true)
    }

    fn throttler_has_room_for_pair(&mut self, now: TimeStamp) -> bool {
        !self.throttler.enabled() || self.throttler.remaining(now) >= 2
    }

    /// Event-driven retry: when a request of `order` changed status,
    /// try to send the order's unsent indication(s) immediately.
    ///
    /// Send failures are contained here: an indication that cannot go
    /// out now is simply retried later by the timer.
    pub(crate) fn send_indications_on_event<P: ProtocolEngine>(
        &mut self,
        engine: &mut P,
        order_id: OrderId,
        now: TimeStamp,
    ) {
        let Some(last) = self.arena.order(order_id).last_req else {
            return;
        };
        if self.arena.request(last).status != ReqStatus::Indicated {
            return;
        }
        // An unsent tandem pair sits at the chain tail as
        // (cancel-leg, new-leg); anything else is a single indication.
        let (ind, next) = match self.arena.request(last).prev {
            Some(prev) if self.arena.request(prev).status == ReqStatus::Indicated => {
                (prev, Some(last))
            }
            _ => (last, None),
        };

        let batch = engine.has_batch_send();
        if let Err(e) = self.try_send(engine, None, ind, next, false, batch, now) {
            warn!(order = %order_id, error = %e, "Indication send on event failed");
            return;
        }
        if batch {
            if let Err(e) = self.flush_orders(engine) {
                warn!(order = %order_id, error = %e, "Flush after event-driven send failed");
            }
        }
    }

    /// Timer-driven retry: re-evaluate all queued indications in order,
    /// stopping early at the first throttled one, then prune entries
    /// that are no longer indications.
    ///
    /// The embedding event loop calls this at the configured
    /// `indication_retry_ms` period.
    pub fn on_timer<P: ProtocolEngine>(&mut self, engine: &mut P) -> Result<()> {
        if self.indications.is_empty() || !engine.is_active() {
            return Ok(());
        }
        let now = chrono::Utc::now();
        let entries = self.indications.entries().to_vec();
        let batch = engine.has_batch_send();

        let mut i = 0;
        while i < entries.len() {
            let ind = entries[i];
            i += 1;
            if !self.arena.contains_request(ind)
                || self.arena.request(ind).status != ReqStatus::Indicated
            {
                continue;
            }
            // A queued cancel-leg may be followed by its new-leg; valid
            // pairs have consecutive ids.
            let mut next = None;
            if self.arena.request(ind).kind == ReqKind::CancelLeg && i < entries.len() {
                let cand = entries[i];
                if self.arena.contains_request(cand) {
                    let c = self.arena.request(cand);
                    if c.kind == ReqKind::NewLeg
                        && c.status == ReqStatus::Indicated
                        && cand.0 == ind.0 + 1
                    {
                        next = Some(cand);
                        i += 1;
                    }
                }
            }
            match self.try_send(engine, None, ind, next, false, batch, now) {
                Ok(true) => {}
                Ok(false) => break, // throttled, no point continuing
                Err(e) => {
                    error!(req = %ind, error = %e, "Indication send on timer failed");
                    break;
                }
            }
        }

        if batch {
            if let Err(e) = self.flush_orders(engine) {
                warn!(error = %e, "Flush after timer-driven send failed");
            }
        }

        let arena = &self.arena;
        self.indications
            .retain(|id| arena.contains_request(id) && arena.request(id).status == ReqStatus::Indicated);
        Ok(())
    }
}
