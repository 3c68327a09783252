//! Presence monitor: one bounded device enumeration per poll tick.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::drivers::DeviceEnumerator;
use crate::error::EnumerationError;

/// Devices visible at one instant. Immutable; replaced every tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSnapshot {
    devices: BTreeSet<String>,
}

impl PresenceSnapshot {
    pub fn new(devices: BTreeSet<String>) -> Self {
        Self { devices }
    }

    pub fn contains(&self, device: &str) -> bool {
        self.devices.contains(device)
    }

    pub fn contains_all<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> bool {
        required.into_iter().all(|d| self.contains(d))
    }

    /// Required devices not in this snapshot, sorted
    pub fn missing<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        required
            .into_iter()
            .filter(|d| !self.contains(d))
            .map(str::to_string)
            .collect()
    }

    pub fn devices(&self) -> &BTreeSet<String> {
        &self.devices
    }
}

impl<S: Into<String>> FromIterator<S> for PresenceSnapshot {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

/// Wraps an enumerator with the per-poll timeout.
#[derive(Clone)]
pub struct PresenceMonitor {
    enumerator: Arc<dyn DeviceEnumerator>,
    timeout: Duration,
}

impl PresenceMonitor {
    pub fn new(enumerator: Arc<dyn DeviceEnumerator>, timeout: Duration) -> Self {
        Self { enumerator, timeout }
    }

    pub async fn poll(&self) -> Result<PresenceSnapshot, EnumerationError> {
        let devices = tokio::time::timeout(self.timeout, self.enumerator.enumerate())
            .await
            .map_err(|_| EnumerationError::Timeout(self.timeout))??;

        debug!(
            backend = self.enumerator.name(),
            count = devices.len(),
            "Presence poll complete"
        );
        Ok(PresenceSnapshot::new(devices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::fakes::FakeEnumerator;

    #[test]
    fn test_snapshot_queries() {
        let snapshot: PresenceSnapshot = ["QC", "MC8"].into_iter().collect();
        assert!(snapshot.contains_all(["QC", "MC8"]));
        assert!(!snapshot.contains_all(["QC", "BT"]));
        assert_eq!(snapshot.missing(["BT", "QC", "X"]), vec!["BT", "X"]);
        assert!(snapshot.contains_all(std::iter::empty::<&str>()));
    }

    #[tokio::test]
    async fn test_poll_returns_snapshot() {
        let fake = FakeEnumerator::with_devices(&["loopMIDI Port", "MC8"]);
        let monitor = PresenceMonitor::new(fake.clone(), Duration::from_secs(3));

        let snapshot = monitor.poll().await.unwrap();
        assert!(snapshot.contains("MC8"));
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out() {
        let fake = FakeEnumerator::with_devices(&["MC8"]);
        fake.set_delay(Some(Duration::from_secs(10)));
        let monitor = PresenceMonitor::new(fake, Duration::from_secs(3));

        assert!(matches!(
            monitor.poll().await,
            Err(EnumerationError::Timeout(d)) if d == Duration::from_secs(3)
        ));
    }

    #[tokio::test]
    async fn test_poll_propagates_failure() {
        let fake = FakeEnumerator::with_devices(&[]);
        fake.set_failing(true);
        let monitor = PresenceMonitor::new(fake, Duration::from_secs(3));
        assert!(matches!(monitor.poll().await, Err(EnumerationError::Backend(_))));
    }
}
