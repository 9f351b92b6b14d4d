//! Strategy callback interface.
//!
//! Strategies are notified synchronously, on the engine thread, and
//! must not re-enter the engine from inside a callback. A callback
//! returning an error is logged and otherwise ignored; it never aborts
//! the reconciliation that triggered it.

use omx_core::{Execution, Order, Request, TimeStamp};

/// Order-lifecycle callbacks exposed to the owning strategy.
pub trait Strategy {
    /// The first time a request reaches Confirmed.
    fn on_confirm(&mut self, req: &Request) -> anyhow::Result<()>;

    /// The order was cancelled (the whole order is now inactive).
    fn on_cancel(
        &mut self,
        order: &Order,
        exch_time: Option<TimeStamp>,
        recv_time: TimeStamp,
    ) -> anyhow::Result<()>;

    /// A new execution was recorded for one of the strategy's orders.
    fn on_own_trade(&mut self, exec: &Execution) -> anyhow::Result<()>;

    /// A request failed: venue rejection, failed cancel/modify, or
    /// session-level rejection. `probably_filled` signals that the
    /// failure suggests the target was actually filled.
    #[allow(clippy::too_many_arguments)]
    fn on_order_error(
        &mut self,
        req: &Request,
        code: i32,
        text: &str,
        probably_filled: bool,
        exch_time: Option<TimeStamp>,
        recv_time: TimeStamp,
    ) -> anyhow::Result<()>;
}
