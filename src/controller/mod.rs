//! Failover controller
//!
//! Wires the presence monitor, the mode state machine, the relay supervisor and the
//! command sequencer into one actor and hands out a cloneable handle to it.

mod actor;
mod commands;
mod handle;
mod machine;


use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub use handle::ControllerHandle;
pub use machine::{Action, ControllerSnapshot, ModeMachine};

use actor::ControllerActor;

use crate::config::AppConfig;
use crate::debounce::StabilityDebouncer;
use crate::drivers::{CommandSender, DeviceEnumerator, RelayLauncher};
use crate::error::Result;
use crate::events::Notifier;
use crate::mode::RoleBindings;
use crate::presence::PresenceMonitor;
use crate::relay::RelaySupervisor;
use crate::sequencer::{Sequencer, SequencerTiming};
use crate::state::{PersistedState, StateStore};

/// External collaborators the controller drives
#[derive(Clone)]
pub struct Collaborators {
    pub enumerator: Arc<dyn DeviceEnumerator>,
    pub sender: Arc<dyn CommandSender>,
    pub launcher: Arc<dyn RelayLauncher>,
    pub store: Arc<dyn StateStore>,
}

/// Spawn the controller for one run.
///
/// `persisted` is the state loaded at startup; role bindings are fixed from it and
/// `config` for the lifetime of the returned handle.
pub fn spawn(
    config: &AppConfig,
    persisted: &PersistedState,
    collaborators: Collaborators,
    notifier: Notifier,
) -> Result<ControllerHandle> {
    let timing = &config.timing;
    let (halt_tx, halt_rx) = watch::channel(false);
    let bindings =
        RoleBindings::for_run(&config.devices, persisted.mode, persisted.custom_device.as_deref());

    let relay = RelaySupervisor::new(
        collaborators.launcher,
        notifier.clone(),
        timing.relay_stop_timeout(),
        timing.drain_join_timeout(),
    )
    .with_halt(halt_rx.clone())
    .shared();

    let sequencer = Sequencer::new(
        collaborators.sender,
        relay.clone(),
        notifier.clone(),
        SequencerTiming::default(),
    )
    .with_halt(halt_rx)
    .configure(config)?;

    let machine = ModeMachine::new(
        persisted,
        bindings,
        StabilityDebouncer::new(timing.stability_threshold()),
    );
    let monitor = PresenceMonitor::new(collaborators.enumerator, config.enumeration.timeout());

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let actor = ControllerActor::new(
        machine,
        monitor,
        collaborators.store,
        relay,
        sequencer,
        notifier,
        halt_tx,
        timing.poll_interval(),
        timing.patch_debounce(),
        cmd_rx,
        cmd_tx.downgrade(),
    );

    tokio::spawn(actor.run());

    Ok(ControllerHandle::new(cmd_tx))
}
