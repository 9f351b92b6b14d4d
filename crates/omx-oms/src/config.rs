//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::{OmsError, Result};

/// How eagerly a dependent request may be sent relative to its target's
/// confirmation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePolicy {
    /// Fully pipelined: a cancel or modify may be sent before its
    /// target is confirmed. Incompatible with `send_venue_ids`, since
    /// venue-assigned ids only become known on confirmation.
    Full,
    /// Wait for the target to be confirmed before sending a dependent.
    #[default]
    WaitConfirm,
    /// Tandem venues only: additionally wait for the previous cancel
    /// leg to be confirmed before sending a new leg, so two live "new"
    /// requests can never coexist (and both get filled).
    WaitCancelConfirm,
}

/// Order-management engine configuration.
///
/// Loaded from TOML; every field has a serde default so a partial file
/// (or none at all) yields a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmsConfig {
    /// Request-pipelining policy.
    #[serde(default)]
    pub pipeline_policy: PipelinePolicy,

    /// The venue requires the server-assigned order id on dependent
    /// requests; dependents cannot be sent before it is known.
    #[serde(default)]
    pub send_venue_ids: bool,

    /// Maintain a venue-id -> request map for lookup of inbound events
    /// that carry only the venue id. Only useful on venues that do not
    /// leave venue ids unchanged across modifications.
    #[serde(default)]
    pub use_venue_id_map: bool,

    /// The venue supports native atomic cancel-replace. When false,
    /// modifications are emulated with a cancel-leg/new-leg tandem.
    #[serde(default = "default_true")]
    pub has_atomic_modify: bool,

    /// The venue allows modifying a partially filled order.
    #[serde(default = "default_true")]
    pub has_part_filled_modify: bool,

    /// The venue reports unique execution ids. Disables execution
    /// de-duplication when false (very unusual).
    #[serde(default = "default_true")]
    pub has_exec_ids: bool,

    /// The venue supports market orders.
    #[serde(default)]
    pub has_market_orders: bool,

    /// Venue-level exemption of cancels from request-rate throttling,
    /// in addition to the protocol engine's own free-cancel capability.
    #[serde(default)]
    pub cancels_not_throttled: bool,

    /// Throttling window length in seconds.
    #[serde(default = "default_throttle_window_secs")]
    pub throttle_window_secs: u64,

    /// Maximum requests transmitted per window; 0 disables throttling.
    #[serde(default)]
    pub max_reqs_per_window: u32,

    /// Tolerate protocol inconsistencies: log and continue with the
    /// best-available match instead of raising a desync error.
    #[serde(default)]
    pub relaxed: bool,

    /// Arena capacities. Exhaustion is fatal: it signals a sizing
    /// misconfiguration, not a recoverable condition.
    #[serde(default = "default_max_orders")]
    pub max_orders: usize,
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_max_executions")]
    pub max_executions: usize,

    /// Upper bound on queued (unsent) indications.
    #[serde(default = "default_max_indications")]
    pub max_indications: usize,

    /// Period of the indication retry timer, in milliseconds. The
    /// embedding event loop is expected to call `on_timer` at this
    /// period.
    #[serde(default = "default_indication_retry_ms")]
    pub indication_retry_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_throttle_window_secs() -> u64 {
    60
}

fn default_max_orders() -> usize {
    65_536
}

fn default_max_requests() -> usize {
    262_144
}

fn default_max_executions() -> usize {
    262_144
}

fn default_max_indications() -> usize {
    65_536
}

fn default_indication_retry_ms() -> u64 {
    5
}

impl Default for OmsConfig {
    fn default() -> Self {
        // serde defaults double as the programmatic defaults.
        toml::from_str("").expect("empty config must deserialize")
    }
}

impl OmsConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OmsError::InvalidArgument(format!("Failed to read config: {e}")))?;
        let cfg: Self = toml::from_str(&content)
            .map_err(|e| OmsError::InvalidArgument(format!("Failed to parse config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline_policy == PipelinePolicy::Full && self.send_venue_ids {
            return Err(OmsError::InvalidArgument(
                "pipeline_policy=full is incompatible with send_venue_ids".into(),
            ));
        }
        if self.pipeline_policy == PipelinePolicy::WaitCancelConfirm && self.has_atomic_modify {
            return Err(OmsError::InvalidArgument(
                "pipeline_policy=wait_cancel_confirm only applies without atomic modify".into(),
            ));
        }
        if self.max_orders == 0 || self.max_requests == 0 || self.max_executions == 0 {
            return Err(OmsError::InvalidArgument(
                "arena capacities must be positive".into(),
            ));
        }
        if self.max_indications == 0 {
            return Err(OmsError::InvalidArgument(
                "max_indications must be positive".into(),
            ));
        }
        Ok(())
    }
}
