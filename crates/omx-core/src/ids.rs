//! Identifier types for orders, requests, executions and strategies.
//!
//! All ids are process-unique, strictly increasing integers allocated by
//! the arena. Id 0 is never allocated; "no reference" is expressed as
//! `Option<_>` rather than a zero sentinel.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            #[inline]
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            #[inline]
            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

id_type! {
    /// Identifier of one logical client order (one `Order` record).
    OrderId
}

id_type! {
    /// Identifier of one discrete request against an order.
    ///
    /// Request ids strictly increase with submission order, so an id's
    /// ordinal position also orders it in time.
    ReqId
}

id_type! {
    /// Identifier of one recorded execution.
    ExecId
}

id_type! {
    /// Transport-level sequence number stamped on transmission.
    SeqNum
}

/// Identifier of the strategy owning an order.
///
/// Derived from the strategy name with a stable hash so the id survives
/// process restarts alongside the persisted arena counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyId(pub u64);

impl StrategyId {
    #[inline]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Stable FNV-1a hash of the strategy name.
    pub fn from_name(name: &str) -> Self {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        let mut h = OFFSET;
        for b in name.as_bytes() {
            h ^= u64::from(*b);
            h = h.wrapping_mul(PRIME);
        }
        Self(h)
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_order_by_value() {
        assert!(ReqId(1) < ReqId(2));
        assert!(OrderId(7) > OrderId(3));
    }

    #[test]
    fn test_strategy_id_stable() {
        let a = StrategyId::from_name("mm-main");
        let b = StrategyId::from_name("mm-main");
        let c = StrategyId::from_name("mm-shadow");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
