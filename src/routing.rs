//! Per-channel routing resolver.
//!
//! Pure functions only: given the current mode and flags, decide which device role a
//! command on a given channel is delivered to.

use crate::midi::Channel;
use crate::mode::{ConnectionMode, DeviceRole};

/// Resolve the device role for a command on `channel`.
///
/// * BLUETOOTH and CUSTOM always use the single sink.
/// * Channel 2 in USB_DIRECT/HYBRID always goes to the CH2 controller.
/// * Channel 1 in USB_DIRECT goes direct.
/// * Channel 1 in HYBRID is rerouted through CH2 when overridden or when CH1 is absent.
pub fn resolve(
    mode: ConnectionMode,
    channel: Channel,
    ch1_override: bool,
    ch1_present: bool,
) -> DeviceRole {
    match (mode, channel) {
        (ConnectionMode::Bluetooth, _) | (ConnectionMode::Custom, _) => DeviceRole::Bluetooth,
        (ConnectionMode::UsbDirect, Channel::Two) | (ConnectionMode::Hybrid, Channel::Two) => {
            DeviceRole::Channel2
        },
        (ConnectionMode::UsbDirect, Channel::One) => DeviceRole::Channel1,
        (ConnectionMode::Hybrid, Channel::One) => {
            if ch1_override || !ch1_present {
                DeviceRole::Channel2
            } else {
                DeviceRole::Channel1
            }
        },
    }
}

/// Human-readable route description for status displays.
pub fn route_label(mode: ConnectionMode, ch1_override: bool, ch1_present: bool) -> String {
    match mode {
        ConnectionMode::Hybrid if ch1_override => format!("{} (CH1 OVERRIDE to CH2)", mode),
        ConnectionMode::Hybrid if !ch1_present => format!("{} (CH1 REROUTED to CH2)", mode),
        ConnectionMode::Hybrid => format!("{} (CH1 DIRECT)", mode),
        _ => mode.to_string(),
    }
}
