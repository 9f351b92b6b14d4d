//! The wire-facing protocol engine interface.
//!
//! The order-management engine is protocol-agnostic: serialization and
//! transmission for a concrete venue dialect live behind this trait.
//! Submission methods hand the engine finalized request records and get
//! back a [`SendStamp`] describing what went on the wire; the manager
//! applies the stamp (status, send time, sequence numbers) to the
//! arena. Network-level reconnection is entirely the engine's business;
//! an inactive engine merely parks submissions in the indication queue.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use omx_core::{Instrument, Request, SeqNum, Side, StrategyId, TimeStamp};

/// Transport/serialization failure reported by the protocol engine.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Transport inactive")]
    Inactive,

    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Send failed: {0}")]
    Send(String),
}

/// What the engine put on the wire for one submission call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendStamp {
    /// Actual send time; `None` when the message was batch-buffered
    /// (the timestamp is back-propagated on flush).
    pub sent_at: Option<TimeStamp>,
    /// Sequence number of the first message sent. A tandem pair
    /// occupies `first_seq` and `first_seq + 1`.
    pub first_seq: SeqNum,
    /// Number of wire messages produced (1, or 2 for a tandem pair).
    pub msgs: u32,
}

/// Filter for mass-cancel: `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassCancelFilter {
    pub owner: Option<StrategyId>,
    pub symbol: Option<String>,
    pub side: Option<Side>,
    /// Venue segment; only meaningful for native mass-cancel.
    pub segment: Option<String>,
}

impl MassCancelFilter {
    /// Whether an order with these attributes passes the filter.
    pub fn matches(&self, owner: StrategyId, instrument: &Instrument, side: Side) -> bool {
        self.owner.map_or(true, |o| o == owner)
            && self.symbol.as_deref().map_or(true, |s| s == instrument.symbol)
            && self.side.map_or(true, |s| s == side)
    }
}

/// Venue protocol engine consumed by the order manager.
///
/// Capability accessors describe the venue dialect; they are consulted
/// by the readiness gate, the throttler and the submission pipeline.
pub trait ProtocolEngine {
    /// Whether the transport is currently able to send.
    fn is_active(&self) -> bool;

    /// Messages may be buffered and flushed in one chunk.
    fn has_batch_send(&self) -> bool {
        false
    }

    /// The venue supports native atomic cancel-replace.
    fn has_atomic_modify(&self) -> bool {
        true
    }

    /// Cancels do not count against the venue request-rate limit.
    fn has_free_cancel(&self) -> bool {
        false
    }

    /// The venue supports a native mass-cancel message.
    fn has_native_mass_cancel(&self) -> bool {
        false
    }

    /// Serialize and transmit a New (or new-leg) request.
    fn send_new(&mut self, req: &Request, batch: bool) -> Result<SendStamp, ProtocolError>;

    /// Serialize and transmit a Cancel (or lone cancel-leg) of `target`.
    fn send_cancel(
        &mut self,
        req: &Request,
        target: &Request,
        batch: bool,
    ) -> Result<SendStamp, ProtocolError>;

    /// Serialize and transmit a modification of `target`.
    ///
    /// With native atomic modify, `cancel_leg` is `None` and `new_leg`
    /// is the Modify request (one wire message). Otherwise both legs of
    /// the tandem go out back-to-back in this single call (two wire
    /// messages, consecutive sequence numbers).
    fn send_modify(
        &mut self,
        cancel_leg: Option<&Request>,
        new_leg: &Request,
        target: &Request,
        batch: bool,
    ) -> Result<SendStamp, ProtocolError>;

    /// Flush buffered messages; returns the send time, or `None` when
    /// nothing was buffered (or batching is unsupported).
    fn flush(&mut self) -> Result<Option<TimeStamp>, ProtocolError>;

    /// Native mass-cancel. Only invoked when
    /// [`has_native_mass_cancel`](Self::has_native_mass_cancel) is true.
    fn mass_cancel(&mut self, filter: &MassCancelFilter) -> Result<(), ProtocolError>;
}

/// In-memory protocol engine double used by tests and examples.
///
/// Records every submission, assigns sequence numbers, and can be
/// driven through inactive/throttled scenarios.
#[derive(Debug)]
pub struct RecordingEngine {
    pub active: bool,
    pub batch_send: bool,
    pub atomic_modify: bool,
    pub free_cancel: bool,
    pub native_mass_cancel: bool,
    /// When buffering, send stamps carry no timestamp until flush.
    next_seq: u64,
    buffered: u32,
    pub sent: Vec<SentRecord>,
    pub mass_cancels: Vec<MassCancelFilter>,
    pub flushes: u32,
    clock: fn() -> TimeStamp,
}

/// One recorded wire submission.
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub kind: SentKind,
    pub req: omx_core::ReqId,
    pub target: Option<omx_core::ReqId>,
    pub seq: SeqNum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentKind {
    New,
    Cancel,
    Modify,
    TandemPair,
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self {
            active: true,
            batch_send: false,
            atomic_modify: true,
            free_cancel: false,
            native_mass_cancel: false,
            next_seq: 1,
            buffered: 0,
            sent: Vec::new(),
            mass_cancels: Vec::new(),
            flushes: 0,
            clock: chrono::Utc::now,
        }
    }

    /// Tandem-venue engine (no atomic modify).
    pub fn tandem() -> Self {
        Self {
            atomic_modify: false,
            ..Self::new()
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn with_batch_send(mut self) -> Self {
        self.batch_send = true;
        self
    }

    pub fn with_free_cancel(mut self) -> Self {
        self.free_cancel = true;
        self
    }

    pub fn with_native_mass_cancel(mut self) -> Self {
        self.native_mass_cancel = true;
        self
    }

    fn stamp(&mut self, msgs: u32, batch: bool) -> SendStamp {
        let first_seq = SeqNum(self.next_seq);
        self.next_seq += u64::from(msgs);
        let sent_at = if batch && self.batch_send {
            self.buffered += msgs;
            None
        } else {
            Some((self.clock)())
        };
        SendStamp {
            sent_at,
            first_seq,
            msgs,
        }
    }

    fn ensure_active(&self) -> Result<(), ProtocolError> {
        if self.active {
            Ok(())
        } else {
            Err(ProtocolError::Inactive)
        }
    }

    pub fn sent_reqs(&self) -> Vec<omx_core::ReqId> {
        self.sent.iter().map(|s| s.req).collect()
    }
}

impl ProtocolEngine for RecordingEngine {
    fn is_active(&self) -> bool {
        self.active
    }

    fn has_batch_send(&self) -> bool {
        self.batch_send
    }

    fn has_atomic_modify(&self) -> bool {
        self.atomic_modify
    }

    fn has_free_cancel(&self) -> bool {
        self.free_cancel
    }

    fn has_native_mass_cancel(&self) -> bool {
        self.native_mass_cancel
    }

    fn send_new(&mut self, req: &Request, batch: bool) -> Result<SendStamp, ProtocolError> {
        self.ensure_active()?;
        let stamp = self.stamp(1, batch);
        self.sent.push(SentRecord {
            kind: SentKind::New,
            req: req.id,
            target: None,
            seq: stamp.first_seq,
        });
        Ok(stamp)
    }

    fn send_cancel(
        &mut self,
        req: &Request,
        target: &Request,
        batch: bool,
    ) -> Result<SendStamp, ProtocolError> {
        self.ensure_active()?;
        let stamp = self.stamp(1, batch);
        self.sent.push(SentRecord {
            kind: SentKind::Cancel,
            req: req.id,
            target: Some(target.id),
            seq: stamp.first_seq,
        });
        Ok(stamp)
    }

    fn send_modify(
        &mut self,
        cancel_leg: Option<&Request>,
        new_leg: &Request,
        target: &Request,
        batch: bool,
    ) -> Result<SendStamp, ProtocolError> {
        self.ensure_active()?;
        match cancel_leg {
            None => {
                let stamp = self.stamp(1, batch);
                self.sent.push(SentRecord {
                    kind: SentKind::Modify,
                    req: new_leg.id,
                    target: Some(target.id),
                    seq: stamp.first_seq,
                });
                Ok(stamp)
            }
            Some(cleg) => {
                let stamp = self.stamp(2, batch);
                self.sent.push(SentRecord {
                    kind: SentKind::TandemPair,
                    req: cleg.id,
                    target: Some(target.id),
                    seq: stamp.first_seq,
                });
                Ok(stamp)
            }
        }
    }

    fn flush(&mut self) -> Result<Option<TimeStamp>, ProtocolError> {
        self.ensure_active()?;
        self.flushes += 1;
        if self.buffered == 0 {
            return Ok(None);
        }
        self.buffered = 0;
        Ok(Some((self.clock)()))
    }

    fn mass_cancel(&mut self, filter: &MassCancelFilter) -> Result<(), ProtocolError> {
        self.ensure_active()?;
        self.mass_cancels.push(filter.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_filter_matches() {
        let instr = Instrument::new("EUR/USD", dec!(0.00001));
        let owner = StrategyId::from_name("s1");
        let all = MassCancelFilter::default();
        assert!(all.matches(owner, &instr, Side::Buy));

        let by_side = MassCancelFilter {
            side: Some(Side::Sell),
            ..Default::default()
        };
        assert!(!by_side.matches(owner, &instr, Side::Buy));
        assert!(by_side.matches(owner, &instr, Side::Sell));

        let by_symbol = MassCancelFilter {
            symbol: Some("USD/JPY".into()),
            ..Default::default()
        };
        assert!(!by_symbol.matches(owner, &instr, Side::Buy));
    }

    #[test]
    fn test_recording_engine_seq_numbers() {
        let mut eng = RecordingEngine::new();
        let s1 = eng.stamp(1, false);
        let s2 = eng.stamp(2, false);
        let s3 = eng.stamp(1, false);
        assert_eq!(s1.first_seq, SeqNum(1));
        assert_eq!(s2.first_seq, SeqNum(2));
        assert_eq!(s3.first_seq, SeqNum(4));
    }

    #[test]
    fn test_recording_engine_batching() {
        let mut eng = RecordingEngine::new().with_batch_send();
        let s = eng.stamp(1, true);
        assert!(s.sent_at.is_none());
        let flushed = eng.flush().unwrap();
        assert!(flushed.is_some());
        // Nothing left to flush.
        assert!(eng.flush().unwrap().is_none());
    }
}
