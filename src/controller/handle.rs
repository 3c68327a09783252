//! ControllerHandle - public API for the controller actor
//!
//! Fire-and-forget methods for user toggles, async methods with oneshot replies for
//! anything that returns data.

use tokio::sync::{mpsc, oneshot};

use super::commands::ControllerCommand;
use super::machine::ControllerSnapshot;
use crate::error::{Error, Result};
use crate::events::FailbackChoice;
use crate::midi::Patch;
use crate::mode::ConnectionMode;

#[derive(Clone)]
pub struct ControllerHandle {
    cmd_tx: mpsc::UnboundedSender<ControllerCommand>,
}

impl ControllerHandle {
    pub(super) fn new(cmd_tx: mpsc::UnboundedSender<ControllerCommand>) -> Self {
        Self { cmd_tx }
    }

    fn send(&self, cmd: ControllerCommand) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| Error::ControllerGone)
    }

    /// Lock or unlock automatic mode switching
    pub fn set_lock(&self, locked: bool) -> Result<()> {
        self.send(ControllerCommand::SetLock(locked))
    }

    /// Force channel-1 traffic through the CH2 controller in HYBRID mode
    pub fn set_override(&self, enabled: bool) -> Result<()> {
        self.send(ControllerCommand::SetOverride(enabled))
    }

    /// Persist the verbose-logging preference (applied on next launch)
    pub fn set_debug(&self, enabled: bool) -> Result<()> {
        self.send(ControllerCommand::SetDebug(enabled))
    }

    /// Switch mode manually. `device` names the sink for CUSTOM mode.
    ///
    /// The switch is not applied in place: the new mode is persisted and a
    /// `RestartRequested` notification follows.
    pub fn set_mode(&self, mode: ConnectionMode, device: Option<String>) -> Result<()> {
        self.send(ControllerCommand::SetMode { mode, device })
    }

    pub fn answer_failback(&self, choice: FailbackChoice) -> Result<()> {
        self.send(ControllerCommand::AnswerFailback(choice))
    }

    /// Queue a patch. Resolves as soon as the controller accepts or rejects it; the
    /// commands themselves go out in the background.
    pub async fn send_patch(&self, patch: Patch) -> Result<()> {
        let (response, rx) = oneshot::channel();
        self.send(ControllerCommand::SendPatch { patch, response })?;
        rx.await.map_err(|_| Error::ControllerGone)?
    }

    pub async fn snapshot(&self) -> Result<ControllerSnapshot> {
        let (response, rx) = oneshot::channel();
        self.send(ControllerCommand::Snapshot { response })?;
        rx.await.map_err(|_| Error::ControllerGone)
    }

    /// Stop the relay and the controller task. Idempotent.
    pub async fn shutdown(&self) {
        let (response, rx) = oneshot::channel();
        if self.send(ControllerCommand::Shutdown { response }).is_ok() {
            let _ = rx.await;
        }
    }
}
