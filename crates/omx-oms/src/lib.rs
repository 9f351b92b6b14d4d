//! Order-management engine for the omx trading gateway.
//!
//! This crate is the order-management core: it represents a client's
//! trading intent as it travels through submission, venue
//! acknowledgement, modification, cancellation, rejection and
//! execution over an external wire protocol, and keeps a single
//! consistent, queryable picture of every outstanding order while the
//! transport is lossy, reordering and only partially observable.
//!
//! It is a library with no I/O of its own: venue-specific connectors
//! implement [`ProtocolEngine`] and drive the [`OrderManager`] from
//! their event loop.
//!
//! ```no_run
//! use omx_core::{EventTimes, Instrument, OrderType, Price, Qty, Side, StrategyId};
//! use omx_oms::{OmsConfig, OrderManager, PlaceOrder, RecordingEngine};
//! use rust_decimal::Decimal;
//!
//! let mut engine = RecordingEngine::new();
//! let mut oms = OrderManager::new(OmsConfig::default()).unwrap();
//! let _order = oms
//!     .place_order(
//!         &mut engine,
//!         PlaceOrder {
//!             owner: StrategyId::from_name("demo"),
//!             instrument: Instrument::new("EUR/USD", Decimal::new(1, 5)),
//!             side: Side::Buy,
//!             order_type: OrderType::Limit,
//!             price: Some(Price::new(Decimal::new(110, 2))),
//!             qty: Qty::new(Decimal::from(100)),
//!             qty_show: None,
//!             qty_min: None,
//!             is_aggressive: false,
//!             time_in_force: None,
//!             expire_date: 0,
//!             event_times: EventTimes::none(),
//!             batch: false,
//!         },
//!     )
//!     .unwrap();
//! ```

pub mod arena;
pub mod classify;
pub mod config;
pub mod error;
pub mod indications;
pub mod manager;
pub mod protocol;
pub mod ready;
pub mod reconcile;
pub mod risk;
pub mod strategy;
pub mod submit;
pub mod throttle;

pub use arena::{Arena, ArenaState};
pub use classify::{classify, FillDecision};
pub use config::{OmsConfig, PipelinePolicy};
pub use error::{OmsError, Result};
pub use indications::IndicationQueue;
pub use manager::OrderManager;
pub use protocol::{
    MassCancelFilter, ProtocolEngine, ProtocolError, RecordingEngine, SendStamp, SentKind,
    SentRecord,
};
pub use ready::Readiness;
pub use reconcile::{
    CancelRejectReport, CancelReport, ConfirmReport, RejectReport, ReplaceReport, SessionRef,
    SessionRejectReport, TradeReport,
};
pub use risk::{RiskError, RiskManager, RiskOrderUpdate};
pub use strategy::Strategy;
pub use submit::{Amendment, PlaceOrder};
pub use throttle::Throttler;
