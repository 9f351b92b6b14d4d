//! Request-rate throttling.
//!
//! Sliding-window counter bounding the number of requests transmitted
//! per configured period. The engine is single-threaded, so no locking
//! is needed; `refresh` is called with every inbound event's receive
//! time to keep the window accurate.

use std::collections::VecDeque;
use std::time::Duration;

use omx_core::TimeStamp;
use tracing::warn;

/// Sliding-window request-rate throttler.
#[derive(Debug)]
pub struct Throttler {
    /// Maximum sends per window; 0 disables throttling.
    max_per_window: u32,
    /// Window length.
    window: Duration,
    /// Send times within the current window, oldest first.
    sends: VecDeque<TimeStamp>,
}

impl Throttler {
    pub fn new(max_per_window: u32, window_secs: u64) -> Self {
        Self {
            max_per_window,
            window: Duration::from_secs(window_secs),
            sends: VecDeque::with_capacity(max_per_window as usize),
        }
    }

    /// Whether throttling is configured at all.
    pub fn enabled(&self) -> bool {
        self.max_per_window > 0
    }

    /// Drop send records that have left the window.
    pub fn refresh(&mut self, now: TimeStamp) {
        let window = chrono::Duration::from_std(self.window).expect("window fits");
        let cutoff = now - window;
        while self.sends.front().is_some_and(|&t| t < cutoff) {
            self.sends.pop_front();
        }
    }

    /// Whether one more send would fit in the window.
    pub fn would_allow(&mut self, now: TimeStamp) -> bool {
        if !self.enabled() {
            return true;
        }
        self.refresh(now);
        let ok = self.sends.len() < self.max_per_window as usize;
        if !ok {
            warn!(
                count = self.sends.len(),
                max = self.max_per_window,
                "Request rate throttled"
            );
        }
        ok
    }

    /// Record one transmission.
    pub fn record(&mut self, now: TimeStamp) {
        self.record_n(now, 1);
    }

    /// Record `n` transmissions at once (tandem legs).
    pub fn record_n(&mut self, now: TimeStamp, n: u32) {
        if !self.enabled() {
            return;
        }
        for _ in 0..n {
            self.sends.push_back(now);
        }
    }

    /// Sends currently inside the window.
    pub fn current_count(&mut self, now: TimeStamp) -> u32 {
        self.refresh(now);
        self.sends.len() as u32
    }

    /// Remaining window capacity.
    pub fn remaining(&mut self, now: TimeStamp) -> u32 {
        let used = self.current_count(now);
        self.max_per_window.saturating_sub(used)
    }
}
