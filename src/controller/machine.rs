//! Mode state machine
//!
//! Pure decision logic: every input (a presence snapshot, a user action) returns the
//! list of effects to carry out, in order. The actor executes them. Nothing here
//! sleeps, spawns or touches the filesystem.

use tokio::time::Instant;
use tracing::{debug, info};

use crate::debounce::{DebounceSignal, StabilityDebouncer};
use crate::events::{FailbackChoice, Notification, Severity, StatusReport};
use crate::mode::{ConnectionMode, DeviceRole, RoleBindings};
use crate::presence::PresenceSnapshot;
use crate::routing;
use crate::sequencer::SequenceContext;
use crate::state::PersistedState;

/// Effect requested by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Notify(Notification),
    /// Bring up the CH2 → CH1 relay
    StartRelay,
    /// Tear the relay down for the rest of this run
    StopRelay,
    Persist(PersistedState),
    /// Relaunch the process in this mode
    Restart(ConnectionMode),
}

/// Read-only copy of the controller state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSnapshot {
    pub mode: ConnectionMode,
    pub custom_device: Option<String>,
    pub locked: bool,
    pub ch1_override: bool,
    pub debug_enabled: bool,
    pub declined: bool,
    pub awaiting_failback: bool,
    pub restart_pending: bool,
    pub patch_in_flight: bool,
    pub bindings: RoleBindings,
    pub last_status: Option<StatusReport>,
    /// Commands went out within the activity window
    pub sending: bool,
    /// The relay forwarded traffic within the activity window
    pub receiving: bool,
}

pub struct ModeMachine {
    mode: ConnectionMode,
    custom_device: Option<String>,
    locked: bool,
    ch1_override: bool,
    debug_enabled: bool,
    bindings: RoleBindings,
    debouncer: StabilityDebouncer,
    /// User answered "stay" this Bluetooth session
    declined: bool,
    awaiting_failback: bool,
    lock_warning_shown: bool,
    bluetooth_lost_shown: bool,
    /// Mode already persisted for the next launch
    restart_target: Option<ConnectionMode>,
    last_snapshot: Option<PresenceSnapshot>,
}

impl ModeMachine {
    pub fn new(
        persisted: &PersistedState,
        bindings: RoleBindings,
        debouncer: StabilityDebouncer,
    ) -> Self {
        Self {
            mode: persisted.mode,
            custom_device: persisted.custom_device.clone(),
            locked: persisted.autoswitch_locked,
            ch1_override: persisted.ch1_override,
            debug_enabled: persisted.debug_enabled,
            bindings,
            debouncer,
            declined: false,
            awaiting_failback: false,
            lock_warning_shown: false,
            bluetooth_lost_shown: false,
            restart_target: None,
            last_snapshot: None,
        }
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn bindings(&self) -> &RoleBindings {
        &self.bindings
    }

    pub fn restart_pending(&self) -> bool {
        self.restart_target.is_some()
    }

    /// Whether the CH1 device was present at the last poll. Assumed present until the
    /// first poll completes.
    pub fn ch1_present(&self) -> bool {
        self.last_snapshot
            .as_ref()
            .map(|s| s.contains(self.bindings.device(DeviceRole::Channel1)))
            .unwrap_or(true)
    }

    fn persisted(&self, mode: ConnectionMode, pending_restart: bool) -> PersistedState {
        PersistedState {
            mode,
            custom_device: self.custom_device.clone(),
            autoswitch_locked: self.locked,
            ch1_override: self.ch1_override,
            pending_restart,
            debug_enabled: self.debug_enabled,
            last_run: None,
        }
    }

    /// State to save after a toggle. Keeps a mode switch that is waiting for its restart.
    fn persisted_toggles(&self) -> PersistedState {
        match self.restart_target {
            Some(mode) => self.persisted(mode, true),
            None => self.persisted(self.mode, false),
        }
    }

    fn status(&self, snapshot: &PresenceSnapshot) -> StatusReport {
        let ch1_present = snapshot.contains(self.bindings.device(DeviceRole::Channel1));
        StatusReport {
            mode: self.mode,
            route: routing::route_label(self.mode, self.ch1_override, ch1_present),
            ch1_present,
            ch2_present: snapshot.contains(self.bindings.device(DeviceRole::Channel2)),
            bluetooth_present: snapshot.contains(self.bindings.device(DeviceRole::Bluetooth)),
            ch1_override: self.ch1_override,
            locked: self.locked,
        }
    }

    pub fn sequence_context(&self) -> SequenceContext {
        SequenceContext {
            mode: self.mode,
            ch1_override: self.ch1_override,
            ch1_present: self.ch1_present(),
            bindings: self.bindings.clone(),
        }
    }

    pub fn snapshot(&self, patch_in_flight: bool) -> ControllerSnapshot {
        ControllerSnapshot {
            mode: self.mode,
            custom_device: self.custom_device.clone(),
            locked: self.locked,
            ch1_override: self.ch1_override,
            debug_enabled: self.debug_enabled,
            declined: self.declined,
            awaiting_failback: self.awaiting_failback,
            restart_pending: self.restart_pending(),
            patch_in_flight,
            bindings: self.bindings.clone(),
            last_status: self.last_snapshot.as_ref().map(|s| self.status(s)),
            sending: false,
            receiving: false,
        }
    }

    /// Effects for a fresh run: USB_DIRECT forwards CH2 traffic from the start.
    pub fn on_start(&self) -> Vec<Action> {
        if self.mode.needs_relay() {
            vec![Action::StartRelay]
        } else {
            Vec::new()
        }
    }

    /// One successful presence poll.
    pub fn on_presence(&mut self, snapshot: PresenceSnapshot, now: Instant) -> Vec<Action> {
        if self.restart_pending() {
            debug!("Restart pending, ignoring presence tick");
            return Vec::new();
        }

        let mut actions = vec![Action::Notify(Notification::StatusUpdate(self.status(&snapshot)))];

        match self.mode {
            ConnectionMode::UsbDirect | ConnectionMode::Hybrid => {
                self.check_failover(&snapshot, &mut actions);
            },
            ConnectionMode::Bluetooth => {
                self.check_bluetooth_device(&snapshot, &mut actions);
                self.check_failback(&snapshot, now, &mut actions);
            },
            ConnectionMode::Custom => {},
        }

        self.last_snapshot = Some(snapshot);
        actions
    }

    fn check_failover(&mut self, snapshot: &PresenceSnapshot, actions: &mut Vec<Action>) {
        let missing = snapshot.missing(self.bindings.required_for(self.mode));
        if missing.is_empty() {
            self.lock_warning_shown = false;
            return;
        }

        if self.locked {
            if !self.lock_warning_shown {
                let message = if self.mode == ConnectionMode::UsbDirect {
                    "USB device(s) disconnected! Switch to BT prevented by lock.".to_string()
                } else {
                    format!("{} disconnected! Switch to BT prevented by lock.", missing.join(", "))
                };
                actions.push(Action::Notify(Notification::Toast {
                    message,
                    severity: Severity::Error,
                }));
                self.lock_warning_shown = true;
            }
            return;
        }

        info!(from = %self.mode, ?missing, "Required device lost, failing over to Bluetooth");
        self.restart_target = Some(ConnectionMode::Bluetooth);
        actions.push(Action::StopRelay);
        actions.push(Action::Persist(self.persisted(ConnectionMode::Bluetooth, true)));
        actions.push(Action::Notify(Notification::FailoverPrompt {
            from: self.mode,
            missing,
        }));
        actions.push(Action::Restart(ConnectionMode::Bluetooth));
    }

    fn check_bluetooth_device(&mut self, snapshot: &PresenceSnapshot, actions: &mut Vec<Action>) {
        let device = self.bindings.device(DeviceRole::Bluetooth);
        if snapshot.contains(device) {
            self.bluetooth_lost_shown = false;
        } else if !self.bluetooth_lost_shown {
            actions.push(Action::Notify(Notification::BluetoothLost {
                device: device.to_string(),
            }));
            self.bluetooth_lost_shown = true;
        }
    }

    fn check_failback(&mut self, snapshot: &PresenceSnapshot, now: Instant, actions: &mut Vec<Action>) {
        if self.awaiting_failback {
            return;
        }

        let candidates = self.bindings.failback_candidates();
        let fully_present = snapshot.contains_all(candidates.iter().copied());

        match self.debouncer.tick(fully_present, now) {
            DebounceSignal::Detected => {
                actions.push(Action::Notify(Notification::Toast {
                    message: "USB devices detected. Checking for stability...".into(),
                    severity: Severity::Info,
                }));
            },
            DebounceSignal::Stable if self.locked || self.declined => {
                actions.push(Action::Notify(Notification::Toast {
                    message: "USB devices available, but switch declined/locked.".into(),
                    severity: Severity::Info,
                }));
            },
            DebounceSignal::Stable => {
                info!("USB devices stable, offering failback");
                self.awaiting_failback = true;
                actions.push(Action::Notify(Notification::FailbackPrompt {
                    available: candidates.into_iter().map(str::to_string).collect(),
                }));
            },
            DebounceSignal::Verifying | DebounceSignal::Idle => {},
        }
    }

    /// The user's answer to the failback prompt.
    pub fn answer_failback(&mut self, choice: FailbackChoice) -> Vec<Action> {
        if !self.awaiting_failback {
            debug!(?choice, "No failback prompt outstanding, ignoring answer");
            return Vec::new();
        }
        self.awaiting_failback = false;

        match choice.target_mode() {
            Some(mode) => self.transition(mode),
            None => {
                info!("Failback declined, staying on Bluetooth");
                self.declined = true;
                Vec::new()
            },
        }
    }

    /// Manual switch; bypasses debouncing and the lock.
    pub fn set_mode(&mut self, mode: ConnectionMode, device: Option<String>) -> Vec<Action> {
        if let (ConnectionMode::Custom, Some(device)) = (mode, device) {
            self.custom_device = Some(device);
        }
        self.transition(mode)
    }

    fn transition(&mut self, mode: ConnectionMode) -> Vec<Action> {
        info!(from = %self.mode, to = %mode, "Mode change requested");
        self.restart_target = Some(mode);
        vec![
            Action::StopRelay,
            Action::Persist(self.persisted(mode, true)),
            Action::Restart(mode),
        ]
    }

    pub fn set_lock(&mut self, locked: bool) -> Vec<Action> {
        self.locked = locked;
        if !locked {
            self.lock_warning_shown = false;
        }
        vec![
            Action::Persist(self.persisted_toggles()),
            Action::Notify(Notification::Toast {
                message: format!("Auto-switch {}", if locked { "locked" } else { "unlocked" }),
                severity: Severity::Info,
            }),
        ]
    }

    pub fn set_override(&mut self, enabled: bool) -> Vec<Action> {
        self.ch1_override = enabled;
        let mut actions = vec![Action::Persist(self.persisted_toggles())];
        if let Some(snapshot) = &self.last_snapshot {
            actions.push(Action::Notify(Notification::StatusUpdate(self.status(snapshot))));
        }
        actions
    }

    pub fn set_debug(&mut self, enabled: bool) -> Vec<Action> {
        self.debug_enabled = enabled;
        vec![Action::Persist(self.persisted_toggles())]
    }
}
