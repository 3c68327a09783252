//! Notification channel to the presentation layer
//!
//! The controller never calls into a UI. Everything a user should see (toasts, status,
//! prompts, traffic indicators) is pushed as a [`Notification`] onto an unbounded
//! channel that the binary renders.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

use crate::mode::ConnectionMode;

pub mod activity;

pub use activity::ActivityTracker;

/// Toast colour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// Direction of MIDI traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActivityDirection {
    /// A command was handed to the send tool
    Sending,
    /// The relay printed a line it forwarded
    Receiving,
}

/// Per-tick controller summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub mode: ConnectionMode,
    /// e.g. "HYBRID (CH1 REROUTED to CH2)"
    pub route: String,
    pub ch1_present: bool,
    pub ch2_present: bool,
    pub bluetooth_present: bool,
    pub ch1_override: bool,
    pub locked: bool,
}

impl StatusReport {
    /// Both USB controllers visible
    pub fn usb_available(&self) -> bool {
        self.ch1_present && self.ch2_present
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | CH1 {} | CH2 {} | override {} | lock {}",
            self.route,
            if self.ch1_present { "up" } else { "down" },
            if self.ch2_present { "up" } else { "down" },
            if self.ch1_override { "on" } else { "off" },
            if self.locked { "on" } else { "off" },
        )
    }
}

/// Answer to a failback prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailbackChoice {
    UsbDirect,
    Hybrid,
    /// Stay on Bluetooth (also used when the prompt is dismissed)
    Stay,
}

impl FailbackChoice {
    pub fn target_mode(self) -> Option<ConnectionMode> {
        match self {
            FailbackChoice::UsbDirect => Some(ConnectionMode::UsbDirect),
            FailbackChoice::Hybrid => Some(ConnectionMode::Hybrid),
            FailbackChoice::Stay => None,
        }
    }
}

/// Everything the controller tells the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Toast { message: String, severity: Severity },
    StatusUpdate(StatusReport),
    /// A USB mode lost a required device and is falling back to Bluetooth
    FailoverPrompt { from: ConnectionMode, missing: Vec<String> },
    /// USB devices have been stable long enough; answer with a [`FailbackChoice`]
    FailbackPrompt { available: Vec<String> },
    Activity(ActivityDirection),
    PatchStarted { label: String },
    PatchCompleted { label: String },
    BluetoothLost { device: String },
    /// The process must relaunch in `mode`
    RestartRequested { mode: ConnectionMode },
}

/// Sending side of the notification channel, cheap to clone into workers.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
    activity: Arc<ActivityTracker>,
}

impl Notifier {
    /// Create a notifier and the receiver the presentation layer drains.
    pub fn channel(activity_window: Duration) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = Self {
            tx,
            activity: Arc::new(ActivityTracker::new(activity_window)),
        };
        (notifier, rx)
    }

    pub fn notify(&self, notification: Notification) {
        // Receiver gone means the process is shutting down
        if self.tx.send(notification).is_err() {
            trace!("Notification dropped, no receiver");
        }
    }

    pub fn toast(&self, message: impl Into<String>, severity: Severity) {
        self.notify(Notification::Toast {
            message: message.into(),
            severity,
        });
    }

    /// Record traffic; only the idle → active edge is forwarded.
    pub fn activity(&self, direction: ActivityDirection) {
        if self.activity.record(direction) {
            self.notify(Notification::Activity(direction));
        }
    }

    pub fn is_active(&self, direction: ActivityDirection) -> bool {
        self.activity.is_active(direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_toast_delivery() {
        let (notifier, mut rx) = Notifier::channel(Duration::from_millis(250));
        notifier.toast("hello", Severity::Warning);

        assert_eq!(
            rx.recv().await,
            Some(Notification::Toast {
                message: "hello".into(),
                severity: Severity::Warning,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_edges_only() {
        let (notifier, mut rx) = Notifier::channel(Duration::from_millis(250));
        notifier.activity(ActivityDirection::Sending);
        notifier.activity(ActivityDirection::Sending);
        notifier.activity(ActivityDirection::Receiving);

        assert_eq!(rx.try_recv().ok(), Some(Notification::Activity(ActivityDirection::Sending)));
        assert_eq!(rx.try_recv().ok(), Some(Notification::Activity(ActivityDirection::Receiving)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_notify_without_receiver_is_silent() {
        let (notifier, rx) = Notifier::channel(Duration::from_millis(250));
        drop(rx);
        notifier.toast("nobody listening", Severity::Info);
    }

    #[test]
    fn test_failback_choice_targets() {
        assert_eq!(FailbackChoice::Hybrid.target_mode(), Some(ConnectionMode::Hybrid));
        assert_eq!(FailbackChoice::Stay.target_mode(), None);
    }
}
