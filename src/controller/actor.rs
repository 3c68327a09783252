//! ControllerActor - single owner of the mode state machine
//!
//! One task owns every piece of mutable controller state. It wakes up on the poll
//! interval or on a command, and executes the effects the state machine returns.
//! Presence polls and patch sends run on their own tasks and report back through the
//! same command channel, so nothing here ever blocks on device I/O. Relay teardown
//! for a mode change runs on its own task as well; only shutdown waits for it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::commands::ControllerCommand;
use super::machine::{Action, ModeMachine};
use crate::error::{Error, RelayError, Result};
use crate::events::{ActivityDirection, Notification, Notifier, Severity};
use crate::midi::Patch;
use crate::mode::DeviceRole;
use crate::presence::{PresenceMonitor, PresenceSnapshot};
use crate::relay::SharedRelay;
use crate::sequencer::Sequencer;
use crate::state::StateStore;

pub struct ControllerActor {
    machine: ModeMachine,
    monitor: PresenceMonitor,
    store: Arc<dyn StateStore>,
    relay: SharedRelay,
    sequencer: Sequencer,
    notifier: Notifier,
    /// Raised once a restart is requested or the actor shuts down; the relay and
    /// in-flight sequencer runs watch it
    halt: watch::Sender<bool>,

    poll_interval: Duration,
    patch_debounce: Duration,

    command_rx: mpsc::UnboundedReceiver<ControllerCommand>,
    /// Weak so that dropping every handle ends the loop
    command_tx: mpsc::WeakUnboundedSender<ControllerCommand>,

    poll_in_flight: bool,
    patch_in_flight: bool,
    last_patch_at: Option<Instant>,
}

impl ControllerActor {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        machine: ModeMachine,
        monitor: PresenceMonitor,
        store: Arc<dyn StateStore>,
        relay: SharedRelay,
        sequencer: Sequencer,
        notifier: Notifier,
        halt: watch::Sender<bool>,
        poll_interval: Duration,
        patch_debounce: Duration,
        command_rx: mpsc::UnboundedReceiver<ControllerCommand>,
        command_tx: mpsc::WeakUnboundedSender<ControllerCommand>,
    ) -> Self {
        Self {
            machine,
            monitor,
            store,
            relay,
            sequencer,
            notifier,
            halt,
            poll_interval,
            patch_debounce,
            command_rx,
            command_tx,
            poll_in_flight: false,
            patch_in_flight: false,
            last_patch_at: None,
        }
    }

    /// Main run loop for the actor
    ///
    /// Processes commands until shutdown or until every handle is dropped.
    pub(super) async fn run(mut self) {
        info!(mode = %self.machine.mode(), "Controller started");

        let actions = self.machine.on_start();
        self.apply(actions).await;

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.start_poll(),
                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("All controller handles dropped");
                        self.halt.send_replace(true);
                        self.relay.lock().await.stop().await;
                        break;
                    };
                    trace!(?cmd, "Processing command");

                    if !self.handle(cmd).await {
                        break;
                    }
                },
            }
        }

        debug!("Controller run loop exited");
    }

    /// Returns false once the loop should exit.
    async fn handle(&mut self, cmd: ControllerCommand) -> bool {
        match cmd {
            ControllerCommand::SetLock(locked) => {
                let actions = self.machine.set_lock(locked);
                self.apply(actions).await;
            },
            ControllerCommand::SetOverride(enabled) => {
                let actions = self.machine.set_override(enabled);
                self.apply(actions).await;
            },
            ControllerCommand::SetDebug(enabled) => {
                let actions = self.machine.set_debug(enabled);
                self.apply(actions).await;
            },
            ControllerCommand::SetMode { mode, device } => {
                let actions = self.machine.set_mode(mode, device);
                self.apply(actions).await;
            },
            ControllerCommand::AnswerFailback(choice) => {
                let actions = self.machine.answer_failback(choice);
                self.apply(actions).await;
            },
            ControllerCommand::SendPatch { patch, response } => {
                let result = self.accept_patch(patch);
                let _ = response.send(result);
            },
            ControllerCommand::Snapshot { response } => {
                let mut snapshot = self.machine.snapshot(self.patch_in_flight);
                snapshot.sending = self.notifier.is_active(ActivityDirection::Sending);
                snapshot.receiving = self.notifier.is_active(ActivityDirection::Receiving);
                let _ = response.send(snapshot);
            },
            ControllerCommand::PollFinished(result) => {
                self.poll_in_flight = false;
                match result {
                    Ok(snapshot) => {
                        trace!(devices = ?snapshot.devices(), "Device check finished");
                        self.on_presence(snapshot).await
                    },
                    Err(e) => {
                        warn!("Device check failed: {}", e);
                        self.notifier
                            .toast(format!("Device check failed: {}", e), Severity::Error);
                    },
                }
            },
            ControllerCommand::PatchFinished => {
                self.patch_in_flight = false;
            },
            ControllerCommand::Shutdown { response } => {
                info!("Controller shutting down");
                self.halt.send_replace(true);
                // Waits for any teardown already in progress (the relay mutex serializes it)
                self.relay.lock().await.stop().await;
                let _ = response.send(());
                return false;
            },
        }
        true
    }

    fn start_poll(&mut self) {
        if self.machine.restart_pending() {
            return;
        }
        if self.poll_in_flight {
            warn!("Previous device check still running, skipping this tick");
            return;
        }
        let Some(tx) = self.command_tx.upgrade() else {
            return;
        };

        self.poll_in_flight = true;
        let monitor = self.monitor.clone();
        tokio::spawn(async move {
            let result = monitor.poll().await;
            let _ = tx.send(ControllerCommand::PollFinished(result));
        });
    }

    async fn on_presence(&mut self, snapshot: PresenceSnapshot) {
        let actions = self.machine.on_presence(snapshot, Instant::now());
        self.apply(actions).await;
    }

    fn accept_patch(&mut self, patch: Patch) -> Result<()> {
        if self.machine.restart_pending() {
            return Err(Error::RestartPending);
        }
        if patch.is_empty() {
            return Err(Error::InvalidCommand(format!(
                "patch '{}' has no commands",
                patch.label()
            )));
        }
        if self.patch_in_flight {
            debug!(label = patch.label(), "Patch rejected, previous one still sending");
            return Err(Error::PatchInFlight);
        }
        let now = Instant::now();
        if let Some(last) = self.last_patch_at {
            if now.duration_since(last) < self.patch_debounce {
                debug!(label = patch.label(), "Patch rejected by debounce");
                return Err(Error::PatchDebounced(self.patch_debounce));
            }
        }
        let tx = self.command_tx.upgrade().ok_or(Error::ControllerGone)?;

        self.patch_in_flight = true;
        self.last_patch_at = Some(now);

        let ctx = self.machine.sequence_context();
        self.sequencer.spawn(patch, ctx, move || {
            let _ = tx.send(ControllerCommand::PatchFinished);
        });
        Ok(())
    }

    fn start_relay(&self) {
        let bindings = self.machine.bindings();
        let from = bindings.device(DeviceRole::Channel2).to_string();
        let to = bindings.device(DeviceRole::Channel1).to_string();
        let relay = self.relay.clone();
        let notifier = self.notifier.clone();

        tokio::spawn(async move {
            match relay.lock().await.start(&from, &to).await {
                Ok(()) | Err(RelayError::Halted) => {},
                Err(e) => {
                    warn!("Relay start failed: {}", e);
                    notifier.toast(format!("Relay failed: {}", e), Severity::Error);
                },
            }
        });
    }

    async fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Notify(notification) => self.notifier.notify(notification),
                Action::StartRelay => self.start_relay(),
                Action::StopRelay => {
                    self.halt.send_replace(true);
                    let relay = self.relay.clone();
                    tokio::spawn(async move { relay.lock().await.stop().await });
                },
                Action::Persist(state) => {
                    if let Err(e) = self.store.save(&state).await {
                        warn!("Could not save state: {}", e);
                        self.notifier
                            .toast(format!("Could not save state: {}", e), Severity::Warning);
                    }
                },
                Action::Restart(mode) => {
                    info!(%mode, "Restart requested");
                    self.notifier.notify(Notification::RestartRequested { mode });
                },
            }
        }
    }
}
