//! Order-level types: side, order type, time-in-force, and the `Order`
//! record itself.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::ids::{ExecId, OrderId, ReqId, StrategyId};
use crate::instrument::Instrument;
use crate::Qty;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns 1 for buy, -1 for sell (for position calculations).
    pub fn sign(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Limit order. Requires a price.
    Limit,
    /// Market order. Carries no price; only supported by some venues.
    Market,
    /// Stop order. Requires a (trigger) price.
    Stop,
}

impl OrderType {
    /// Whether orders of this type carry a price.
    pub fn has_price(&self) -> bool {
        !matches!(self, Self::Market)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limit => write!(f, "limit"),
            Self::Market => write!(f, "market"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

/// Time-in-force for orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good for the trading day.
    #[serde(rename = "Day")]
    Day,
    /// Good-til-cancelled.
    #[default]
    #[serde(rename = "Gtc")]
    GoodTillCancel,
    /// Immediate-or-cancel. Forced for market orders.
    #[serde(rename = "Ioc")]
    ImmediateOrCancel,
    /// Fill-or-kill.
    #[serde(rename = "Fok")]
    FillOrKill,
    /// Good until the order's expiry date.
    #[serde(rename = "Gtd")]
    GoodTillDate,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Day => write!(f, "Day"),
            Self::GoodTillCancel => write!(f, "Gtc"),
            Self::ImmediateOrCancel => write!(f, "Ioc"),
            Self::FillOrKill => write!(f, "Fok"),
            Self::GoodTillDate => write!(f, "Gtd"),
        }
    }
}

/// One logical client order across its whole lifetime.
///
/// An `Order` ties together the chronological chain of `Request`s made
/// against it and the `Execution`s it received. It is created by
/// placement and mutated only by the reconciliation engine thereafter;
/// it is never destroyed within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Arena id, strictly increasing with allocation order.
    pub id: OrderId,
    pub instrument: Instrument,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    /// Expiry date as YYYYMMDD; 0 unless `TimeInForce::GoodTillDate`.
    pub expire_date: u32,
    /// Strategy that owns this order.
    pub owner: StrategyId,
    /// An order submitted as an iceberg (shown qty < qty) stays an
    /// iceberg for its whole lifetime, even if later fully visible.
    pub is_iceberg: bool,
    /// Write-once-true: set when the order is filled, cancelled or
    /// failed, never cleared.
    pub inactive: bool,
    /// Id of the outstanding cancel request, if any. Cleared when the
    /// order goes inactive or the cancel fails.
    pub pending_cancel: Option<ReqId>,
    /// Cumulative filled quantity, monotonically non-decreasing.
    pub cum_filled_qty: Qty,
    /// Number of failed requests recorded against this order.
    pub fail_count: u32,
    /// Most ancient request in the chain.
    pub first_req: Option<ReqId>,
    /// Most recent request in the chain.
    pub last_req: Option<ReqId>,
    /// Most recent execution recorded for this order.
    pub last_exec: Option<ExecId>,
}

impl Order {
    /// Build a fresh order record.
    ///
    /// Market orders are forced to immediate-or-cancel; requesting any
    /// other explicit time-in-force for a market order is an argument
    /// error.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: OrderId,
        instrument: Instrument,
        side: Side,
        order_type: OrderType,
        time_in_force: Option<TimeInForce>,
        expire_date: u32,
        owner: StrategyId,
        is_iceberg: bool,
    ) -> Result<Self, CoreError> {
        let tif = match (order_type, time_in_force) {
            (OrderType::Market, None | Some(TimeInForce::ImmediateOrCancel)) => {
                TimeInForce::ImmediateOrCancel
            }
            (OrderType::Market, Some(other)) => {
                return Err(CoreError::InvalidArgument(format!(
                    "TimeInForce={other} is incompatible with a market order"
                )))
            }
            (_, tif) => tif.unwrap_or_default(),
        };
        if tif == TimeInForce::GoodTillDate && expire_date == 0 {
            return Err(CoreError::InvalidArgument(
                "GoodTillDate order requires an expiry date".into(),
            ));
        }
        Ok(Self {
            id,
            instrument,
            side,
            order_type,
            time_in_force: tif,
            expire_date,
            owner,
            is_iceberg,
            inactive: false,
            pending_cancel: None,
            cum_filled_qty: Qty::ZERO,
            fail_count: 0,
            first_req: None,
            last_req: None,
            last_exec: None,
        })
    }
}
