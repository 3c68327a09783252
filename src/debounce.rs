//! Stability debouncer for failback candidacy
//!
//! A device set has to stay fully present for a whole threshold before it counts. Any
//! gap restarts the window from scratch.

use std::time::Duration;
use tokio::time::Instant;

/// Result of one debouncer tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceSignal {
    /// Not fully present
    Idle,
    /// Fully present for the first time since the window was last cleared
    Detected,
    /// Present, window still running
    Verifying,
    /// Present for at least the threshold; emitted once, then the window resets
    Stable,
}

#[derive(Debug, Clone)]
pub struct StabilityDebouncer {
    stable_since: Option<Instant>,
    threshold: Duration,
}

impl StabilityDebouncer {
    pub fn new(threshold: Duration) -> Self {
        Self {
            stable_since: None,
            threshold,
        }
    }

    pub fn tick(&mut self, fully_present: bool, now: Instant) -> DebounceSignal {
        if !fully_present {
            self.stable_since = None;
            return DebounceSignal::Idle;
        }

        match self.stable_since {
            None => {
                self.stable_since = Some(now);
                DebounceSignal::Detected
            },
            Some(since) if now.saturating_duration_since(since) >= self.threshold => {
                self.stable_since = None;
                DebounceSignal::Stable
            },
            Some(_) => DebounceSignal::Verifying,
        }
    }

    #[cfg(test)]
    fn stable_since(&self) -> Option<Instant> {
        self.stable_since
    }
}
