//! External MIDI collaborators
//!
//! The controller never touches MIDI bytes itself. It talks to three seams: something
//! that lists devices, something that sends one command to one device, and something
//! that launches the CH2 → CH1 relay process. Production implementations shell out to
//! the `sendmidi` / `receivemidi` tools or list ports through midir; tests swap in
//! in-memory fakes.

use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio::io::AsyncRead;

use crate::error::{EnumerationError, RelayError, SendError};
use crate::midi::Command;

/// Lists the MIDI devices currently visible to the system.
///
/// Note: implementations should not apply their own timeout; the presence monitor
/// bounds every call.
#[async_trait]
pub trait DeviceEnumerator: Send + Sync {
    /// Backend name for logs (e.g., "sendmidi", "midir")
    fn name(&self) -> &str;

    async fn enumerate(&self) -> Result<BTreeSet<String>, EnumerationError>;
}

/// Delivers one command to one named device.
#[async_trait]
pub trait CommandSender: Send + Sync {
    async fn send(&self, device: &str, command: &Command) -> Result<(), SendError>;
}

/// Starts the relay that forwards everything arriving on one device to another.
pub trait RelayLauncher: Send + Sync {
    fn launch(&self, from: &str, to: &str) -> Result<RelayChild, RelayError>;
}

/// A running relay process.
#[async_trait]
pub trait RelayProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Ask the process to exit (SIGTERM on unix). Never a force kill.
    fn terminate(&mut self) -> std::io::Result<()>;

    /// Wait for the process to exit.
    async fn wait(&mut self) -> std::io::Result<()>;
}

pub type RelayOutput = Box<dyn AsyncRead + Send + Unpin>;

/// A launched relay with both of its output streams captured.
pub struct RelayChild {
    pub process: Box<dyn RelayProcess>,
    pub stdout: RelayOutput,
    pub stderr: RelayOutput,
}

pub mod ports;
pub mod receivemidi;
pub mod sendmidi;

pub use ports::MidirEnumerator;
pub use receivemidi::ReceiveMidiRelay;
pub use sendmidi::SendMidiTool;

#[cfg(test)]
pub(crate) mod fakes;
