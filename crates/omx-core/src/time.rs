//! Timestamp types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// UTC timestamp used throughout the engine.
pub type TimeStamp = DateTime<Utc>;

/// Timestamps of the market-data event that triggered a submission.
///
/// All three are optional: operational submissions (e.g. mass-cancel)
/// carry no triggering event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTimes {
    /// Exchange time of the triggering event.
    pub exch: Option<TimeStamp>,
    /// When the triggering event was received by the connector.
    pub conn: Option<TimeStamp>,
    /// When the triggering event was seen by the strategy.
    pub strat: Option<TimeStamp>,
}

impl EventTimes {
    /// No triggering event.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(exch: Option<TimeStamp>, conn: Option<TimeStamp>, strat: Option<TimeStamp>) -> Self {
        Self { exch, conn, strat }
    }
}
