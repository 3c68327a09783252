//! Activity tracking for the traffic indicator
//!
//! Keeps the last Sending / Receiving timestamp in a DashMap so the sequencer and the
//! relay drainers can record traffic concurrently without locking each other out.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use super::ActivityDirection;

/// Activity tracker for monitoring message flow
pub struct ActivityTracker {
    /// Timestamp of the last activity per direction
    activity_map: DashMap<ActivityDirection, Instant>,

    /// How long the indicator stays lit after the last message
    window: Duration,
}

impl ActivityTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            activity_map: DashMap::new(),
            window,
        }
    }

    /// Record activity in `direction`.
    ///
    /// Returns true when the direction was idle before this call, i.e. the indicator
    /// just turned on and the presentation layer should hear about it.
    pub fn record(&self, direction: ActivityDirection) -> bool {
        let now = Instant::now();
        let previous = self.activity_map.insert(direction, now);

        trace!("Activity: {:?}", direction);

        match previous {
            Some(last) => now.duration_since(last) >= self.window,
            None => true,
        }
    }

    /// Whether activity was recorded within the window.
    pub fn is_active(&self, direction: ActivityDirection) -> bool {
        self.activity_map
            .get(&direction)
            .map(|entry| entry.value().elapsed() < self.window)
            .unwrap_or(false)
    }
}
