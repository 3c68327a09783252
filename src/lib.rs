//! Patch GW - failover-aware MIDI patch router
//!
//! Sends footswitch patches to a pair of MIDI controllers over whichever transport is
//! currently healthy: a Bluetooth-bridged virtual port, both controllers over USB with a
//! CH2 → CH1 relay, or a hybrid of the two. A polling controller watches device
//! presence and fails over to Bluetooth (or offers to fail back to USB) by persisting
//! the new mode and asking the process to relaunch.

pub mod config;
pub mod controller;
pub mod debounce;
pub mod drivers;
pub mod error;
pub mod events;
pub mod midi;
pub mod mode;
pub mod paths;
pub mod presence;
pub mod relay;
pub mod routing;
pub mod sequencer;
pub mod state;

pub use error::{Error, Result};
