//! Commands for the controller actor
//!
//! User-facing commands come from [`super::ControllerHandle`]; the internal ones are
//! posted back by the tasks the actor spawns (presence polls, patch workers).

use tokio::sync::oneshot;

use super::machine::ControllerSnapshot;
use crate::error::{EnumerationError, Result};
use crate::events::FailbackChoice;
use crate::midi::Patch;
use crate::mode::ConnectionMode;
use crate::presence::PresenceSnapshot;

pub enum ControllerCommand {
    // -------------------------------------------------------------------------
    // User commands (fire and forget)
    // -------------------------------------------------------------------------
    SetLock(bool),
    SetOverride(bool),
    SetDebug(bool),
    SetMode {
        mode: ConnectionMode,
        device: Option<String>,
    },
    AnswerFailback(FailbackChoice),

    // -------------------------------------------------------------------------
    // Request-response
    // -------------------------------------------------------------------------
    /// Accepted or rejected immediately; the patch itself runs on its own task
    SendPatch {
        patch: Patch,
        response: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        response: oneshot::Sender<ControllerSnapshot>,
    },
    /// Stop the relay and exit the actor loop
    Shutdown { response: oneshot::Sender<()> },

    // -------------------------------------------------------------------------
    // Internal
    // -------------------------------------------------------------------------
    PollFinished(std::result::Result<PresenceSnapshot, EnumerationError>),
    PatchFinished,
}

impl std::fmt::Debug for ControllerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetLock(v) => write!(f, "SetLock({})", v),
            Self::SetOverride(v) => write!(f, "SetOverride({})", v),
            Self::SetDebug(v) => write!(f, "SetDebug({})", v),
            Self::SetMode { mode, device } => write!(f, "SetMode({}, {:?})", mode, device),
            Self::AnswerFailback(choice) => write!(f, "AnswerFailback({:?})", choice),
            Self::SendPatch { patch, .. } => write!(f, "SendPatch({})", patch.label()),
            Self::Snapshot { .. } => write!(f, "Snapshot"),
            Self::Shutdown { .. } => write!(f, "Shutdown"),
            Self::PollFinished(result) => write!(f, "PollFinished(ok={})", result.is_ok()),
            Self::PatchFinished => write!(f, "PatchFinished"),
        }
    }
}
