//! Core domain types for the omx order-management gateway.
//!
//! This crate provides the data model shared by the engine and by
//! venue-specific connectors:
//! - `OrderId`, `ReqId`, `ExecId`: monotonically increasing identifiers
//! - `Price`, `Qty`: precision-safe numeric types
//! - `Instrument`: the tradable-instrument slice the engine reads
//! - `Order`, `Request`, `Execution`: the order lifecycle records

pub mod decimal;
pub mod error;
pub mod execution;
pub mod ids;
pub mod instrument;
pub mod order;
pub mod request;
pub mod time;

pub use decimal::{Price, Qty};
pub use error::{CoreError, Result};
pub use execution::Execution;
pub use ids::{ExecId, OrderId, ReqId, SeqNum, StrategyId};
pub use instrument::Instrument;
pub use order::{Order, OrderType, Side, TimeInForce};
pub use request::{ReqKind, ReqStatus, Request, RequestDraft};
pub use time::{EventTimes, TimeStamp};
