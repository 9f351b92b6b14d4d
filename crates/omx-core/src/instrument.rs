//! Tradable-instrument description.
//!
//! This is the slice of the venue security definition the engine reads:
//! tick rounding, fee estimation, settlement-date verification, and
//! mass-cancel filtering. Full security definitions live in the
//! connector layer.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instrument descriptor attached to every order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Canonical symbol (e.g. "EUR/USD", "BTC-PERP").
    pub symbol: String,
    /// Venue segment or board the instrument trades on.
    #[serde(default)]
    pub segment: String,
    /// Minimum price increment. Submitted prices are rounded to a
    /// multiple of this step.
    pub price_step: Decimal,
    /// Minimum quantity increment (informational; the engine does not
    /// re-lot quantities).
    #[serde(default)]
    pub lot_size: Decimal,
    /// Settlement date as YYYYMMDD, 0 if not applicable.
    #[serde(default)]
    pub settl_date: u32,
    /// Fee rate applied to aggressive (liquidity-taking) fills.
    #[serde(default)]
    pub aggr_fee_rate: Option<Decimal>,
    /// Fee rate applied to passive (liquidity-adding) fills.
    #[serde(default)]
    pub pass_fee_rate: Option<Decimal>,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, price_step: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            segment: String::new(),
            price_step,
            lot_size: Decimal::ZERO,
            settl_date: 0,
            aggr_fee_rate: None,
            pass_fee_rate: None,
        }
    }

    /// Fee rate for a fill, by whether our side was the aggressor.
    pub fn fee_rate(&self, aggressive: bool) -> Option<Decimal> {
        if aggressive {
            self.aggr_fee_rate
        } else {
            self.pass_fee_rate
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fee_rate_by_aggression() {
        let mut instr = Instrument::new("EUR/USD", dec!(0.00001));
        instr.aggr_fee_rate = Some(dec!(0.0002));
        instr.pass_fee_rate = Some(dec!(0.0001));

        assert_eq!(instr.fee_rate(true), Some(dec!(0.0002)));
        assert_eq!(instr.fee_rate(false), Some(dec!(0.0001)));
    }
}
