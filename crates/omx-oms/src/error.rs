//! Error types for the order-management engine.
//!
//! The taxonomy follows the engine's failure modes:
//! - caller argument errors are surfaced synchronously, no state mutated;
//! - arena capacity exhaustion panics (a sizing misconfiguration is not
//!   a recoverable condition);
//! - protocol inconsistencies (unknown ids, mismatched params) are hard
//!   errors by default, degraded to warnings in relaxed mode;
//! - business-level rejections are not errors at all: they drive
//!   ordinary state transitions and strategy callbacks.

use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::risk::RiskError;
use omx_core::CoreError;

/// Engine error type.
#[derive(Debug, Error)]
pub enum OmsError {
    /// Invalid arguments from the caller; nothing was mutated.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An inbound event references state inconsistent with ours. This
    /// indicates desynchronization with the venue.
    #[error("State desync: {0}")]
    Desync(String),

    /// The wire-facing engine failed to serialize or transmit.
    #[error("Protocol send failed: {0}")]
    Protocol(#[from] ProtocolError),

    /// The risk manager declined the operation.
    #[error("Risk check failed: {0}")]
    Risk(#[from] RiskError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl OmsError {
    pub(crate) fn desync(where_: &str, what: impl std::fmt::Display) -> Self {
        Self::Desync(format!("{where_}: {what}"))
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, OmsError>;
