//! The readiness gate: may a candidate request be transmitted now?
//!
//! Combines three concerns: request-rate throttling (with free-cancel
//! exemptions), transport liveness, and the dependency condition
//! against the request's target under the configured pipelining
//! policy. An inactive transport degrades to `Throttled` so the
//! request is retried rather than failed.

use crate::config::PipelinePolicy;
use crate::manager::OrderManager;
use crate::protocol::ProtocolEngine;
use omx_core::{ReqId, ReqKind, ReqStatus, TimeStamp};

/// Gate verdict for one candidate request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// May go on the wire now.
    Ready,
    /// Blocked by the rate limit or an inactive transport; retried by
    /// the indication timer.
    Throttled,
    /// The target request's status does not yet allow a dependent to
    /// be sent; retried when the target's status changes.
    BlockedByTarget,
}

impl OrderManager {
    /// Whether the throttler would block this request kind right now.
    pub(crate) fn throttled<P: ProtocolEngine>(
        &mut self,
        engine: &P,
        kind: ReqKind,
        now: TimeStamp,
    ) -> bool {
        let exempt =
            kind.is_cancel_kind() && (engine.has_free_cancel() || self.config.cancels_not_throttled);
        if exempt {
            return false;
        }
        !self.throttler.would_allow(now)
    }

    /// Evaluate the gate for `req_id`, with `target` being the request
    /// it acts on (`None` for New, and for a NewLeg whose dependency is
    /// its preceding cancel-leg).
    pub(crate) fn readiness<P: ProtocolEngine>(
        &mut self,
        engine: &P,
        req_id: ReqId,
        target: Option<ReqId>,
        now: TimeStamp,
    ) -> Readiness {
        let kind = self.arena.request(req_id).kind;
        if self.throttled(engine, kind, now) {
            return Readiness::Throttled;
        }
        // A reconnecting transport is a transient condition, same as a
        // full window.
        if !engine.is_active() {
            return Readiness::Throttled;
        }

        let ok = match target {
            None => match kind {
                // A New has no dependency at all.
                ReqKind::New => true,
                // A NewLeg follows its cancel-leg: under the strictest
                // policy the leg's target must be confirmed cancelled;
                // otherwise the leg only needs to have been sent.
                ReqKind::NewLeg => {
                    let prev = self.arena.request(req_id).prev;
                    match prev.map(|p| self.arena.request(p)) {
                        Some(cleg) if cleg.kind == ReqKind::CancelLeg => {
                            if self.config.pipeline_policy == PipelinePolicy::WaitCancelConfirm {
                                cleg.status == ReqStatus::Confirmed
                            } else {
                                cleg.status >= ReqStatus::Sent
                            }
                        }
                        // Unattached legs (stray-leg cancels) have no
                        // chain predecessor to wait for.
                        _ => true,
                    }
                }
                _ => true,
            },
            Some(target) => {
                let t = self.arena.request(target);
                let confirmed =
                    t.status == ReqStatus::Confirmed || t.status == ReqStatus::PartFilled;
                if confirmed {
                    true
                } else if self.config.pipeline_policy == PipelinePolicy::Full {
                    // Fully pipelined: may run ahead of confirmation
                    // unless the venue needs the server-assigned id.
                    !(self.config.send_venue_ids && t.venue_id.is_none())
                } else {
                    false
                }
            }
        };

        if ok {
            Readiness::Ready
        } else {
            Readiness::BlockedByTarget
        }
    }
}
