//! Poll bookkeeping: the auto-update flag, the shared failure counter, and
//! the end-of-cycle scheduling decision.
//!
//! DESIGN
//! ======
//! The decision is taken only after both fetches of a cycle have resolved,
//! so the counter it reads always includes the cycle that just finished.

use std::time::Duration;

use crate::config::TIMEOUT_MULTIPLIER_MS;

/// Terminal notice shown once the failure ceiling stops polling.
pub const MAX_FAILURE_NOTICE: &str = "Maximum failure count reached, so stopped fetching messages.";

/// What the poll task does once a cycle has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleDecision {
    /// Sleep for the interval, then run another cycle.
    Reschedule,
    /// Auto-update was switched off; exit quietly.
    Idle,
    /// Too many failures. Auto-update is now off and the counter reset.
    CeilingReached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollState {
    pub interval_secs: u64,
    pub is_auto_updating: bool,
    pub failure_count: u32,
    /// A poll task is scheduled. Only ever true while auto-updating.
    pub pending: bool,
}

impl PollState {
    #[must_use]
    pub fn new(interval_secs: u64) -> Self {
        Self { interval_secs, is_auto_updating: true, failure_count: 0, pending: false }
    }

    /// Sleep between the end of one cycle and the start of the next.
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.interval_secs.saturating_mul(TIMEOUT_MULTIPLIER_MS))
    }

    pub fn record_success(&mut self) {
        self.failure_count = 0;
    }

    pub fn record_failure(&mut self) {
        self.failure_count = self.failure_count.saturating_add(1);
    }

    /// Decide whether another cycle should run.
    pub fn decide(&mut self, max_failure_count: u32) -> CycleDecision {
        if self.failure_count >= max_failure_count {
            self.is_auto_updating = false;
            self.failure_count = 0;
            self.pending = false;
            return CycleDecision::CeilingReached;
        }
        if self.is_auto_updating {
            CycleDecision::Reschedule
        } else {
            self.pending = false;
            CycleDecision::Idle
        }
    }
}

#[cfg(test)]
#[path = "poll_test.rs"]
mod poll_test;
