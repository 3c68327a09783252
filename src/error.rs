//! Error taxonomy for the failover controller.
//!
//! None of these are fatal to the process: each one is logged and surfaced to
//! the presentation layer as a notification while the controller keeps running.

use std::time::Duration;
use thiserror::Error;

/// Device enumeration failed; polling continues on the next tick.
#[derive(Error, Debug)]
pub enum EnumerationError {
    #[error("device enumeration timed out after {0:?}")]
    Timeout(Duration),

    #[error("device list tool unavailable: {0}")]
    ToolUnavailable(#[source] std::io::Error),

    #[error("device list tool exited with {status}: {stderr}")]
    ToolFailed { status: String, stderr: String },

    #[error("MIDI backend error: {0}")]
    Backend(String),
}

/// A single command could not be delivered; sequencing continues.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("send tool unavailable: {0}")]
    ToolUnavailable(#[source] std::io::Error),

    #[error("sending to '{device}' failed with {status}: {stderr}")]
    Rejected {
        device: String,
        status: String,
        stderr: String,
    },
}

/// The relay process could not be started; traffic degrades to best-effort.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("relay tool not found at {0}")]
    NotFound(String),

    #[error("failed to launch relay: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("relay launched without captured {0}")]
    MissingPipe(&'static str),

    #[error("relay disabled, a restart or shutdown is pending")]
    Halted,
}

/// Persisted state could not be read or written; in-memory state stays authoritative.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

/// Crate-level error wrapping every subsystem error so `?` propagates naturally.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Enumeration(#[from] EnumerationError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("a patch is already being sent")]
    PatchInFlight,

    #[error("patch ignored, previous one was less than {0:?} ago")]
    PatchDebounced(Duration),

    #[error("a restart is pending, patch ignored")]
    RestartPending,

    #[error("controller is no longer running")]
    ControllerGone,
}

pub type Result<T> = std::result::Result<T, Error>;
