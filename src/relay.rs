//! Relay process supervisor
//!
//! Owns at most one running relay plus the two tasks draining its output. Every start
//! goes through stop first, and stop never force-kills: a relay that ignores the
//! terminate request is abandoned after the timeout. Once the halt signal is raised
//! (restart requested or shutdown) no new relay is launched for the rest of the run.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::drivers::{RelayLauncher, RelayOutput, RelayProcess};
use crate::error::RelayError;
use crate::events::{ActivityDirection, Notifier};

/// Supervisor shared by the controller and sequencer workers; the mutex serializes
/// stop/start.
pub type SharedRelay = Arc<Mutex<RelaySupervisor>>;

struct RelayHandle {
    from: String,
    to: String,
    process: Box<dyn RelayProcess>,
    drainers: Vec<JoinHandle<()>>,
}

pub struct RelaySupervisor {
    launcher: Arc<dyn RelayLauncher>,
    notifier: Notifier,
    stop_timeout: Duration,
    drain_join_timeout: Duration,
    halt: watch::Receiver<bool>,
    active: Option<RelayHandle>,
}

impl RelaySupervisor {
    pub fn new(
        launcher: Arc<dyn RelayLauncher>,
        notifier: Notifier,
        stop_timeout: Duration,
        drain_join_timeout: Duration,
    ) -> Self {
        Self {
            launcher,
            notifier,
            stop_timeout,
            drain_join_timeout,
            halt: watch::channel(false).1,
            active: None,
        }
    }

    /// Refuse to launch once `halt` reads true.
    pub fn with_halt(mut self, halt: watch::Receiver<bool>) -> Self {
        self.halt = halt;
        self
    }

    pub fn shared(self) -> SharedRelay {
        Arc::new(Mutex::new(self))
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Launch a relay forwarding `from` → `to`, replacing any running one.
    pub async fn start(&mut self, from: &str, to: &str) -> Result<(), RelayError> {
        self.stop().await;
        if *self.halt.borrow() {
            debug!("Relay halted, not launching {} -> {}", from, to);
            return Err(RelayError::Halted);
        }

        let child = self.launcher.launch(from, to)?;
        info!(pid = ?child.process.id(), "Relay started: {} -> {}", from, to);

        let drainers = vec![
            tokio::spawn(drain(child.stdout, "stdout", self.notifier.clone())),
            tokio::spawn(drain(child.stderr, "stderr", self.notifier.clone())),
        ];

        self.active = Some(RelayHandle {
            from: from.to_string(),
            to: to.to_string(),
            process: child.process,
            drainers,
        });
        Ok(())
    }

    /// Terminate the running relay, if any. Never fails.
    pub async fn stop(&mut self) {
        let Some(mut handle) = self.active.take() else {
            return;
        };

        debug!("Stopping relay {} -> {}", handle.from, handle.to);

        if let Err(e) = handle.process.terminate() {
            warn!("Relay terminate request failed: {}", e);
        }

        match tokio::time::timeout(self.stop_timeout, handle.process.wait()).await {
            Ok(Ok(())) => info!("Relay stopped"),
            Ok(Err(e)) => warn!("Waiting for relay exit failed: {}", e),
            Err(_) => warn!(
                "Relay did not exit within {:?}, abandoning it",
                self.stop_timeout
            ),
        }

        for mut drainer in handle.drainers {
            if tokio::time::timeout(self.drain_join_timeout, &mut drainer)
                .await
                .is_err()
            {
                warn!("Relay output reader did not finish, detaching");
                drainer.abort();
            }
        }
    }
}

async fn drain(stream: RelayOutput, label: &'static str, notifier: Notifier) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                trace!(stream = label, "relay: {}", line.trim());
                notifier.activity(ActivityDirection::Receiving);
            },
            Ok(None) => break,
            Err(e) => {
                debug!(stream = label, "Relay output closed: {}", e);
                break;
            },
        }
    }
    trace!(stream = label, "Relay reader finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::fakes::FakeRelayLauncher;
    use crate::events::Notification;

    fn supervisor(launcher: Arc<FakeRelayLauncher>) -> (RelaySupervisor, tokio::sync::mpsc::UnboundedReceiver<Notification>) {
        let (notifier, rx) = Notifier::channel(Duration::from_millis(250));
        let sup = RelaySupervisor::new(
            launcher,
            notifier,
            Duration::from_secs(2),
            Duration::from_secs(1),
        );
        (sup, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_replaces_running_relay() {
        let launcher = FakeRelayLauncher::new();
        let (mut sup, _rx) = supervisor(launcher.clone());

        sup.start("MC8", "QC").await.unwrap();
        sup.start("MC8", "QC").await.unwrap();

        assert!(sup.is_running());
        assert_eq!(launcher.launches().len(), 2);
        assert_eq!(launcher.terminates(), 1);
        assert_eq!(launcher.running(), 1);

        sup.stop().await;
        assert!(!sup.is_running());
        assert_eq!(launcher.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_stubborn_relay() {
        let launcher = FakeRelayLauncher::new();
        launcher.set_stubborn(true);
        let (mut sup, _rx) = supervisor(launcher.clone());

        sup.start("MC8", "QC").await.unwrap();

        let started = tokio::time::Instant::now();
        sup.stop().await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(5));
        assert!(!sup.is_running());
        assert_eq!(launcher.terminates(), 1);
    }

    #[tokio::test]
    async fn test_stop_without_relay_is_noop() {
        let launcher = FakeRelayLauncher::new();
        let (mut sup, _rx) = supervisor(launcher.clone());
        sup.stop().await;
        assert_eq!(launcher.terminates(), 0);
    }

    #[tokio::test]
    async fn test_launch_failure_leaves_nothing_running() {
        let launcher = FakeRelayLauncher::new();
        launcher.set_failing(true);
        let (mut sup, _rx) = supervisor(launcher);

        assert!(matches!(
            sup.start("MC8", "QC").await,
            Err(RelayError::NotFound(_))
        ));
        assert!(!sup.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_halt_stops_and_blocks_restart() {
        let launcher = FakeRelayLauncher::new();
        let (halt_tx, halt_rx) = watch::channel(false);
        let (sup, _rx) = supervisor(launcher.clone());
        let mut sup = sup.with_halt(halt_rx);

        sup.start("MC8", "QC").await.unwrap();
        halt_tx.send_replace(true);

        assert!(matches!(sup.start("MC8", "QC").await, Err(RelayError::Halted)));
        assert!(!sup.is_running());
        assert_eq!(launcher.launches().len(), 1);
        assert_eq!(launcher.running(), 0);
    }

    #[tokio::test]
    async fn test_drained_output_reports_activity() {
        let launcher = FakeRelayLauncher::new();
        launcher.set_output(&["90 3C 7F", "80 3C 00"]);
        let (mut sup, mut rx) = supervisor(launcher);

        sup.start("MC8", "QC").await.unwrap();

        let notification = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(
            notification,
            Some(Notification::Activity(ActivityDirection::Receiving))
        );
        sup.stop().await;
    }
}
