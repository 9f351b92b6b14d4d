//! Risk-manager interface.
//!
//! The risk manager books exposure on every placement and modification
//! and unwinds it on cancellation and rejection. A real booking may be
//! declined (the placement is then aborted before anything is
//! allocated); unwind calls are best-effort and never abort a
//! reconciliation in progress.

use thiserror::Error;

use omx_core::{Execution, Instrument, Price, Qty, TimeStamp};

/// Risk-manager rejection.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Limit breached: {0}")]
    LimitBreached(String),

    #[error("Risk manager unavailable: {0}")]
    Unavailable(String),
}

/// One exposure update passed to the risk manager.
///
/// `is_real` distinguishes a genuine booking (new exposure requested by
/// the client) from an unwind (a cancel, reject or failed modify
/// restoring the previous terms). For a booking, `old_*` carry the
/// terms being replaced (zero for a first placement); for an unwind,
/// `new_*` carry the restored terms.
#[derive(Debug, Clone)]
pub struct RiskOrderUpdate<'a> {
    pub is_real: bool,
    pub instrument: &'a Instrument,
    pub is_buy: bool,
    pub new_px: Option<Price>,
    pub new_qty: Qty,
    pub old_px: Option<Price>,
    pub old_qty: Qty,
    pub ts: Option<TimeStamp>,
}

/// Risk-manager collaborator consumed by the order manager.
pub trait RiskManager {
    /// Book or unwind order exposure. An `Err` from a real booking
    /// aborts the operation; errors from unwinds are logged and
    /// swallowed.
    fn on_order(&mut self, update: &RiskOrderUpdate<'_>) -> Result<(), RiskError>;

    /// Called exactly once per newly recorded execution.
    fn on_trade(&mut self, exec: &Execution);
}
